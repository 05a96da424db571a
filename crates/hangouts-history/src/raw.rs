//! Unprocessed message records
//!
//! Both the history store and the live feed hand out `RawMessage`s. Fields are
//! kept loose (optional address, string-or-integer timestamp) because the
//! sources disagree on shape; the engine's normalizer tightens them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical partition of historical messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mailbox {
    Inbox,
    Sent,
}

impl Mailbox {
    /// Query order used by bulk loads. Inbox first, so that inbox records win
    /// timestamp ties after a stable sort.
    pub const ALL: [Mailbox; 2] = [Mailbox::Inbox, Mailbox::Sent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mailbox::Inbox => "inbox",
            Mailbox::Sent => "sent",
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mailbox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbox" => Ok(Mailbox::Inbox),
            "sent" => Ok(Mailbox::Sent),
            _ => Err(format!("Invalid mailbox: {}. Must be 'inbox' or 'sent'", s)),
        }
    }
}

/// Timestamp as delivered by a source: integer millis, or a string of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl RawTimestamp {
    /// Milliseconds since epoch, or `None` when the value does not parse
    pub fn millis(&self) -> Option<i64> {
        match self {
            RawTimestamp::Millis(ms) => Some(*ms),
            RawTimestamp::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl Default for RawTimestamp {
    fn default() -> Self {
        RawTimestamp::Text(String::new())
    }
}

impl From<i64> for RawTimestamp {
    fn from(ms: i64) -> Self {
        RawTimestamp::Millis(ms)
    }
}

impl From<&str> for RawTimestamp {
    fn from(s: &str) -> Self {
        RawTimestamp::Text(s.to_string())
    }
}

/// A message record exactly as a source produced it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawMessage {
    /// Source-assigned identifier, when the source has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Counterparty phone number or identifier
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default, alias = "date")]
    pub timestamp: RawTimestamp,
    /// Box the record was read from; unset for live deliveries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailbox: Option<Mailbox>,
}

impl RawMessage {
    pub fn new(
        address: impl Into<String>,
        body: impl Into<String>,
        timestamp: impl Into<RawTimestamp>,
    ) -> Self {
        Self {
            id: None,
            address: Some(address.into()),
            body: body.into(),
            timestamp: timestamp.into(),
            mailbox: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn in_mailbox(mut self, mailbox: Mailbox) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    /// True when this record belongs to `address`
    pub fn is_from(&self, address: &str) -> bool {
        self.address.as_deref() == Some(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_from_str() {
        assert_eq!(Mailbox::from_str("inbox").unwrap(), Mailbox::Inbox);
        assert_eq!(Mailbox::from_str("sent").unwrap(), Mailbox::Sent);
        assert!(Mailbox::from_str("outbox").is_err());
    }

    #[test]
    fn test_timestamp_parsing() {
        assert_eq!(RawTimestamp::from(1_700_000_000_000).millis(), Some(1_700_000_000_000));
        assert_eq!(RawTimestamp::from(" 1700 ").millis(), Some(1700));
        assert_eq!(RawTimestamp::from("yesterday").millis(), None);
        assert_eq!(RawTimestamp::default().millis(), None);
    }

    #[test]
    fn test_deserialize_accepts_date_alias_and_string_millis() {
        let raw: RawMessage =
            serde_json::from_str(r#"{"address":"+33600000001","body":"salut","date":"1700"}"#)
                .unwrap();
        assert_eq!(raw.timestamp.millis(), Some(1700));
        assert!(raw.is_from("+33600000001"));
        assert_eq!(raw.mailbox, None);
    }

    #[test]
    fn test_deserialize_tolerates_missing_address() {
        let raw: RawMessage = serde_json::from_str(r#"{"body":"orphan","timestamp":5}"#).unwrap();
        assert_eq!(raw.address, None);
        assert!(!raw.is_from(""));
    }
}
