use thiserror::Error;

use crate::Mailbox;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("{mailbox} box unavailable: {reason}")]
    Unavailable { mailbox: Mailbox, reason: String },
    #[error("send to {address} rejected: {reason}")]
    Rejected { address: String, reason: String },
    #[error("failed to read export: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed export: {0}")]
    Json(#[from] serde_json::Error),
}
