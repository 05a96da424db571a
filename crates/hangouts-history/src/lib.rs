//! Hangouts History - the message sources the conversation engine reads from
//!
//! Sources are organized by role:
//! - raw: the unprocessed record shape shared by history and live delivery
//! - memory: in-memory two-box history store
//! - export: loader for Android-style SMS export files
//! - loopback: outbound sender that files messages into the sent box

pub mod error;
pub mod export;
pub mod loopback;
pub mod memory;
pub mod raw;

pub use error::HistoryError;
pub use loopback::LoopbackSender;
pub use memory::MemoryHistory;
pub use raw::{Mailbox, RawMessage, RawTimestamp};

use async_trait::async_trait;

/// Queryable store of historical messages, partitioned into boxes.
///
/// Snapshots come back in no particular order; callers sort.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn query(
        &self,
        mailbox: Mailbox,
        address: Option<&str>,
    ) -> Result<Vec<RawMessage>, HistoryError>;
}

/// Outbound transport for a composed message
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, address: &str, body: &str) -> Result<(), HistoryError>;
}

/// Cut `text` to at most `max_len` bytes without splitting a UTF-8 sequence.
/// Used for log previews.
pub fn log_preview(text: &str, max_len: usize) -> &str {
    let mut end = max_len.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
