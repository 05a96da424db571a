//! Canonical message shape and the normalizer that produces it
//!
//! History records, live deliveries and locally composed messages all end up
//! as a `Message`. Normalization never fails: an unparseable timestamp becomes
//! `0` (sorts as oldest) and a missing address becomes the empty string, which
//! matches no contact and no open thread.

use hangouts_history::{Mailbox, RawMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Which side of the exchange wrote the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

impl From<Option<Mailbox>> for Direction {
    fn from(mailbox: Option<Mailbox>) -> Self {
        match mailbox {
            Some(Mailbox::Sent) => Direction::Sent,
            Some(Mailbox::Inbox) | None => Direction::Received,
        }
    }
}

/// Where the engine got the message from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    History,
    Live,
    LocalPending,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::History => "history",
            Origin::Live => "live",
            Origin::LocalPending => "local-pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub address: String,
    pub body: String,
    pub timestamp_millis: i64,
    pub direction: Direction,
    pub origin: Origin,
}

impl Message {
    /// A message the user just composed, before the transport has seen it
    pub fn local_pending(
        address: impl Into<String>,
        body: impl Into<String>,
        timestamp_millis: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            address: address.into(),
            body: body.into(),
            timestamp_millis,
            direction: Direction::Sent,
            origin: Origin::LocalPending,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }
}

/// Convert a raw record into a `Message`.
///
/// Ids: a source id is kept, prefixed by its box. A history record without one
/// gets a name-based UUID over its content, so reloading the same snapshot
/// yields the same ids. Everything else gets a random UUID.
pub fn normalize(raw: RawMessage, origin: Origin) -> Message {
    let timestamp_millis = raw.timestamp.millis().unwrap_or_else(|| {
        debug!(
            "Unparseable timestamp {:?} from {:?}, treating as 0",
            raw.timestamp, raw.address
        );
        0
    });

    let direction = Direction::from(raw.mailbox);
    let address = raw.address.unwrap_or_default();
    let scope = raw.mailbox.map_or("live", |m| m.as_str());

    let id = match (raw.id, origin) {
        (Some(source_id), _) => format!("{}:{}", scope, source_id),
        (None, Origin::History) => {
            let name = format!(
                "{}\u{1f}{}\u{1f}{}\u{1f}{}",
                scope, address, timestamp_millis, raw.body
            );
            Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
        }
        (None, _) => Uuid::new_v4().to_string(),
    };

    Message {
        id,
        address,
        body: raw.body,
        timestamp_millis,
        direction,
        origin,
    }
}

/// Normalize a whole snapshot, keeping ids unique within it.
///
/// Identical records would otherwise share a content-derived id; repeats get
/// an occurrence suffix (`#1`, `#2`, ...) in the order they appear.
pub fn normalize_batch(raws: Vec<RawMessage>, origin: Origin) -> Vec<Message> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    raws.into_iter()
        .map(|raw| {
            let mut message = normalize(raw, origin);
            let count = seen.entry(message.id.clone()).or_insert(0);
            if *count > 0 {
                message.id = format!("{}#{}", message.id, count);
            }
            *count += 1;
            message
        })
        .collect()
}

/// Index at which `message` keeps `messages` sorted newest-first.
/// Equal timestamps go after the ones already present.
pub fn sorted_position(messages: &[Message], timestamp_millis: i64) -> usize {
    messages.partition_point(|m| m.timestamp_millis >= timestamp_millis)
}

/// Sort newest-first. Stable, so equal timestamps keep their input order.
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.timestamp_millis.cmp(&a.timestamp_millis));
}
