//! Loopback outbound sender
//!
//! Files every accepted message into the history's sent box, the way the
//! phone's SMS provider records what it transmits. Can be taken offline to
//! exercise send-failure paths.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{log_preview, HistoryError, Mailbox, MemoryHistory, RawMessage, SmsSender};

pub struct LoopbackSender {
    history: Arc<MemoryHistory>,
    online: AtomicBool,
}

impl LoopbackSender {
    pub fn new(history: Arc<MemoryHistory>) -> Self {
        Self {
            history,
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl SmsSender for LoopbackSender {
    async fn send(&self, address: &str, body: &str) -> Result<(), HistoryError> {
        if address.trim().is_empty() {
            return Err(HistoryError::Rejected {
                address: address.to_string(),
                reason: "empty recipient".to_string(),
            });
        }

        if !self.online.load(Ordering::SeqCst) {
            warn!("Loopback sender offline, rejecting message to {}", address);
            return Err(HistoryError::Rejected {
                address: address.to_string(),
                reason: "transport offline".to_string(),
            });
        }

        let raw = RawMessage::new(address, body, Utc::now().timestamp_millis());
        self.history.record(Mailbox::Sent, raw);

        info!("Sent message to {}: {}...", address, log_preview(body, 50));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistorySource;

    #[tokio::test]
    async fn test_send_files_into_sent_box() {
        let history = Arc::new(MemoryHistory::new());
        let sender = LoopbackSender::new(history.clone());

        sender.send("+1555", "on my way").await.unwrap();

        let sent = history.query(Mailbox::Sent, Some("+1555")).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "on my way");
        assert!(sent[0].timestamp.millis().unwrap() > 0);
    }

    #[test]
    fn test_offline_sender_rejects() {
        let history = Arc::new(MemoryHistory::new());
        let sender = LoopbackSender::new(history.clone());
        sender.set_online(false);

        let result = tokio_test::block_on(sender.send("+1555", "lost"));
        assert!(matches!(result, Err(HistoryError::Rejected { .. })));
        assert!(history.is_empty());
    }

    #[test]
    fn test_empty_recipient_rejected() {
        let sender = LoopbackSender::new(Arc::new(MemoryHistory::new()));
        let result = tokio_test::block_on(sender.send("  ", "hello"));
        assert!(result.is_err());
    }
}
