//! In-memory two-box history store
//!
//! Stands in for the phone's SMS database. Records are appended to a box and
//! handed back as snapshots. Availability can be switched off to model a
//! revoked read permission.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{export, HistoryError, HistorySource, Mailbox, RawMessage};

pub struct MemoryHistory {
    boxes: RwLock<HashMap<Mailbox, Vec<RawMessage>>>,
    available: AtomicBool,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            boxes: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Build a store seeded from an SMS export file
    pub fn from_export(path: &Path) -> Result<Self, HistoryError> {
        let records = export::load_export(path)?;
        let history = Self::new();
        let count = records.len();
        for (mailbox, raw) in records {
            history.record(mailbox, raw);
        }
        info!("Seeded history with {} records from {}", count, path.display());
        Ok(history)
    }

    /// Append a record to a box. The record's own mailbox tag is overwritten.
    pub fn record(&self, mailbox: Mailbox, raw: RawMessage) {
        let raw = raw.in_mailbox(mailbox);
        match self.boxes.write() {
            Ok(mut boxes) => boxes.entry(mailbox).or_default().push(raw),
            Err(e) => warn!("History lock poisoned, dropping record: {}", e),
        }
    }

    /// Toggle read access. While unavailable every query fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of records in a box
    pub fn len(&self, mailbox: Mailbox) -> usize {
        self.boxes
            .read()
            .map(|boxes| boxes.get(&mailbox).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        Mailbox::ALL.iter().all(|mailbox| self.len(*mailbox) == 0)
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistorySource for MemoryHistory {
    async fn query(
        &self,
        mailbox: Mailbox,
        address: Option<&str>,
    ) -> Result<Vec<RawMessage>, HistoryError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(HistoryError::Unavailable {
                mailbox,
                reason: "read access not granted".to_string(),
            });
        }

        let boxes = self.boxes.read().map_err(|e| HistoryError::Unavailable {
            mailbox,
            reason: format!("Lock error: {}", e),
        })?;

        let records: Vec<RawMessage> = boxes
            .get(&mailbox)
            .map(|records| {
                records
                    .iter()
                    .filter(|raw| address.map_or(true, |a| raw.is_from(a)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            "History query {} (filter={:?}) returned {} records",
            mailbox,
            address,
            records.len()
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryHistory {
        let history = MemoryHistory::new();
        history.record(Mailbox::Inbox, RawMessage::new("+1555", "hi", 100));
        history.record(Mailbox::Inbox, RawMessage::new("+1666", "yo", 110));
        history.record(Mailbox::Sent, RawMessage::new("+1555", "hello", 120));
        history
    }

    #[tokio::test]
    async fn test_query_by_box() {
        let history = seeded();
        let inbox = history.query(Mailbox::Inbox, None).await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert!(inbox.iter().all(|r| r.mailbox == Some(Mailbox::Inbox)));

        let sent = history.query(Mailbox::Sent, None).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mailbox, Some(Mailbox::Sent));
    }

    #[tokio::test]
    async fn test_query_with_address_filter() {
        let history = seeded();
        let inbox = history.query(Mailbox::Inbox, Some("+1555")).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].body, "hi");

        let none = history.query(Mailbox::Sent, Some("+1666")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_history_fails_queries() {
        let history = seeded();
        history.set_available(false);
        let err = history.query(Mailbox::Inbox, None).await.unwrap_err();
        assert!(matches!(err, HistoryError::Unavailable { mailbox: Mailbox::Inbox, .. }));

        history.set_available(true);
        assert!(history.query(Mailbox::Inbox, None).await.is_ok());
    }

    #[test]
    fn test_len_and_is_empty() {
        let history = MemoryHistory::new();
        assert!(history.is_empty());
        history.record(Mailbox::Sent, RawMessage::new("+1555", "x", 1));
        assert_eq!(history.len(Mailbox::Sent), 1);
        assert_eq!(history.len(Mailbox::Inbox), 0);
        assert!(!history.is_empty());
    }
}
