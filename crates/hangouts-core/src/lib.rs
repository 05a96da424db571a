//! Hangouts Core Library
//!
//! Conversation engine for an SMS client: groups message history into
//! per-contact conversations, keeps an inbox-style list and single threads
//! current as live messages arrive, and serves them over HTTP.
//!
//! Modules by layer:
//! - message: normalized message model and ordering helpers
//! - aggregator: grouping, previews and ranking
//! - thread / list: stateful views driven by the live feed
//! - store: SQLite contact directory

pub mod aggregator;
pub mod config;
pub mod contact;
pub mod error;
pub mod feed;
pub mod list;
pub mod message;
pub mod schema;
pub mod server;
pub mod store;
pub mod thread;

// Re-export key types for convenience
pub use aggregator::{Aggregator, Conversation, ConversationPreview, DedupPolicy};
pub use config::Config;
pub use contact::{Contact, ContactDirectory};
pub use error::{EngineError, EngineResult};
pub use feed::{ChannelFeed, LiveFeed, Subscription};
pub use list::{ConversationListView, ListUpdate};
pub use message::{Direction, Message, Origin};
pub use store::{ContactDraft, ContactStore};
pub use thread::{SendOutcome, ThreadView};
