//! SMS export loader
//!
//! Reads the JSON produced by Android SMS listing tools, either as a flat
//! array where each row carries a `type` column (1 = inbox, 2 = sent), or as
//! an object with separate `inbox` and `sent` arrays:
//!
//! ```json
//! [{"_id": 41, "address": "+33600000001", "body": "salut", "date": "1700000000000", "type": 1}]
//! ```
//!
//! Rows of any other type (drafts, outbox, failed) are skipped.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::{HistoryError, Mailbox, RawMessage, RawTimestamp};

/// Android `type` column value for received messages
const TYPE_INBOX: i64 = 1;
/// Android `type` column value for sent messages
const TYPE_SENT: i64 = 2;

#[derive(Debug, Deserialize)]
struct ExportRow {
    #[serde(rename = "_id", default)]
    id: Option<Value>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    date: Option<Value>,
    #[serde(rename = "type", default)]
    message_type: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Flat(Vec<ExportRow>),
    Boxed {
        #[serde(default)]
        inbox: Vec<ExportRow>,
        #[serde(default)]
        sent: Vec<ExportRow>,
    },
}

/// Parse an export document into (box, record) pairs
pub fn parse_export(json: &str) -> Result<Vec<(Mailbox, RawMessage)>, HistoryError> {
    let file: ExportFile = serde_json::from_str(json)?;

    let records = match file {
        ExportFile::Flat(rows) => rows
            .into_iter()
            .filter_map(|row| {
                let mailbox = match row.message_type {
                    Some(TYPE_INBOX) => Mailbox::Inbox,
                    Some(TYPE_SENT) => Mailbox::Sent,
                    other => {
                        debug!("Skipping export row with type {:?}", other);
                        return None;
                    }
                };
                Some((mailbox, row.into_raw(mailbox)))
            })
            .collect(),
        ExportFile::Boxed { inbox, sent } => inbox
            .into_iter()
            .map(|row| (Mailbox::Inbox, row.into_raw(Mailbox::Inbox)))
            .chain(
                sent.into_iter()
                    .map(|row| (Mailbox::Sent, row.into_raw(Mailbox::Sent))),
            )
            .collect(),
    };

    Ok(records)
}

/// Read and parse an export file from disk
pub fn load_export(path: &Path) -> Result<Vec<(Mailbox, RawMessage)>, HistoryError> {
    let json = std::fs::read_to_string(path)?;
    parse_export(&json)
}

impl ExportRow {
    fn into_raw(self, mailbox: Mailbox) -> RawMessage {
        RawMessage {
            id: self.id.and_then(scalar_to_string),
            address: self.address,
            body: self.body.unwrap_or_default(),
            timestamp: match self.date {
                Some(Value::Number(n)) => n
                    .as_i64()
                    .map(RawTimestamp::Millis)
                    .unwrap_or_else(|| RawTimestamp::Text(n.to_string())),
                Some(Value::String(s)) => RawTimestamp::Text(s),
                _ => RawTimestamp::default(),
            },
            mailbox: Some(mailbox),
        }
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
