//! Conversation aggregation
//!
//! Groups normalized messages by counterparty into an explicit
//! address -> `Conversation` map. The map is rebuilt from scratch by
//! `load_all` and otherwise only changes through `merge_live_message`.
//!
//! Only counterparties whose address matches a contact's phone are kept;
//! messages from unknown senders never reach the aggregated view (a thread
//! can still be opened on them directly, see `thread`).

use hangouts_history::{HistorySource, Mailbox, RawMessage};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::contact::{Contact, ContactIndex};
use crate::error::{EngineError, EngineResult};
use crate::message::{
    normalize, normalize_batch, sort_newest_first, sorted_position, Direction, Message, Origin,
};

/// Preview bodies are cut to this many characters
pub const PREVIEW_MAX_CHARS: usize = 30;
pub const PREVIEW_ELLIPSIS: &str = "...";
/// Marks a preview whose latest message was written by the user
pub const SENT_PREFIX: &str = "You: ";

/// Derived summary of a conversation's most recent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationPreview {
    pub counterparty_address: String,
    pub display_name: String,
    pub most_recent_message: Message,
    pub truncated_body: String,
    pub last_activity_timestamp: i64,
}

impl ConversationPreview {
    pub fn new(address: &str, contact: Option<&Contact>, most_recent: &Message) -> Self {
        Self {
            counterparty_address: address.to_string(),
            display_name: contact
                .and_then(Contact::full_name)
                .unwrap_or_else(|| address.to_string()),
            most_recent_message: most_recent.clone(),
            truncated_body: truncate_body(&most_recent.body, most_recent.direction),
            last_activity_timestamp: most_recent.timestamp_millis,
        }
    }
}

/// Shorten `body` for list display: at most `PREVIEW_MAX_CHARS` characters,
/// an ellipsis when cut, and the sent prefix for outgoing messages.
pub fn truncate_body(body: &str, direction: Direction) -> String {
    let mut preview: String = body.chars().take(PREVIEW_MAX_CHARS).collect();
    if body.chars().count() > PREVIEW_MAX_CHARS {
        preview.push_str(PREVIEW_ELLIPSIS);
    }
    match direction {
        Direction::Sent => format!("{}{}", SENT_PREFIX, preview),
        Direction::Received => preview,
    }
}

/// Whether a live insertion that looks like an existing message is dropped.
///
/// `Off` keeps the plain behavior: a message seen live and again through a
/// later path is stored twice. `Window(ms)` drops an insertion matching an
/// existing message on address, body and direction with timestamps no more
/// than `ms` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    #[default]
    Off,
    Window(i64),
}

impl DedupPolicy {
    pub fn is_duplicate(&self, existing: &[Message], candidate: &Message) -> bool {
        match self {
            DedupPolicy::Off => false,
            DedupPolicy::Window(window_ms) => existing.iter().any(|m| {
                m.address == candidate.address
                    && m.direction == candidate.direction
                    && m.body == candidate.body
                    && u64::try_from(*window_ms).is_ok_and(|window| {
                        m.timestamp_millis.abs_diff(candidate.timestamp_millis) <= window
                    })
            }),
        }
    }
}

/// All messages exchanged with one counterparty, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub counterparty_address: String,
    pub resolved_contact: Option<Contact>,
    pub messages: Vec<Message>,
    pub preview: ConversationPreview,
}

impl Conversation {
    /// Build from an already sorted, non-empty message list
    fn from_sorted(
        address: String,
        contact: Option<Contact>,
        messages: Vec<Message>,
    ) -> Option<Self> {
        let preview = ConversationPreview::new(&address, contact.as_ref(), messages.first()?);
        Some(Self {
            counterparty_address: address,
            resolved_contact: contact,
            messages,
            preview,
        })
    }

    /// Insert at the sorted position and refresh the preview
    fn insert(&mut self, message: Message) {
        let position = sorted_position(&self.messages, message.timestamp_millis);
        self.messages.insert(position, message);
        self.refresh_preview();
    }

    fn refresh_preview(&mut self) {
        if let Some(head) = self.messages.first() {
            self.preview = ConversationPreview::new(
                &self.counterparty_address,
                self.resolved_contact.as_ref(),
                head,
            );
        }
    }
}

/// Newest activity first; ties by address so repeated loads come out
/// identical regardless of map iteration order.
pub fn by_recency(a: &ConversationPreview, b: &ConversationPreview) -> Ordering {
    b.last_activity_timestamp
        .cmp(&a.last_activity_timestamp)
        .then_with(|| a.counterparty_address.cmp(&b.counterparty_address))
}

fn rank<'a>(conversations: impl Iterator<Item = &'a Conversation>) -> Vec<&'a Conversation> {
    let mut ranked: Vec<&Conversation> = conversations.collect();
    ranked.sort_by(|a, b| by_recency(&a.preview, &b.preview));
    ranked
}

#[derive(Debug, Default)]
pub struct Aggregator {
    conversations: HashMap<String, Conversation>,
    dedup: DedupPolicy,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedup(dedup: DedupPolicy) -> Self {
        Self {
            conversations: HashMap::new(),
            dedup,
        }
    }

    /// Rebuild every conversation from the history source.
    ///
    /// Both boxes are fetched concurrently. On failure the previous state is
    /// dropped, never served stale, and the error is returned.
    pub async fn load_all<H>(
        &mut self,
        history: &H,
        contacts: &[Contact],
    ) -> EngineResult<Vec<&Conversation>>
    where
        H: HistorySource + ?Sized,
    {
        self.conversations.clear();

        let (inbox, sent) = tokio::try_join!(
            history.query(Mailbox::Inbox, None),
            history.query(Mailbox::Sent, None),
        )
        .map_err(|e| {
            warn!("History load failed: {}", e);
            EngineError::SourceUnavailable(e)
        })?;

        let total = inbox.len() + sent.len();
        let index = ContactIndex::new(contacts);

        // Inbox before sent, so the stable sort below breaks ties that way
        let mut groups: HashMap<String, Vec<Message>> = HashMap::new();
        for message in normalize_batch(inbox.into_iter().chain(sent).collect(), Origin::History) {
            if !index.is_known(&message.address) {
                continue;
            }
            groups
                .entry(message.address.clone())
                .or_default()
                .push(message);
        }

        for (address, mut messages) in groups {
            sort_newest_first(&mut messages);
            let contact = index.resolve(&address).cloned();
            if let Some(conversation) = Conversation::from_sorted(address.clone(), contact, messages)
            {
                self.conversations.insert(address, conversation);
            }
        }

        info!(
            "Loaded {} conversations from {} history records",
            self.conversations.len(),
            total
        );
        Ok(self.ranked())
    }

    /// Fold one live event into its loaded conversation.
    ///
    /// Returns the refreshed preview, or `None` when no conversation for that
    /// address has been loaded. In that case nothing is created and the caller
    /// should run `load_all` again.
    pub fn merge_live_message(
        &mut self,
        raw: RawMessage,
        contacts: &[Contact],
    ) -> Option<(String, ConversationPreview)> {
        let message = normalize(raw, Origin::Live);

        let Some(conversation) = self.conversations.get_mut(&message.address) else {
            debug!(
                "Live message from {:?} has no loaded conversation",
                message.address
            );
            return None;
        };

        conversation.resolved_contact = ContactIndex::new(contacts)
            .resolve(&message.address)
            .cloned();

        if self.dedup.is_duplicate(&conversation.messages, &message) {
            debug!("Dropping duplicate live message {}", message.id);
            conversation.refresh_preview();
        } else {
            conversation.insert(message);
        }

        Some((
            conversation.counterparty_address.clone(),
            conversation.preview.clone(),
        ))
    }

    pub fn get(&self, address: &str) -> Option<&Conversation> {
        self.conversations.get(address)
    }

    /// Conversations by most recent activity
    pub fn ranked(&self) -> Vec<&Conversation> {
        rank(self.conversations.values())
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::contact;
    use hangouts_history::MemoryHistory;

    const ADA: &str = "+15550001";
    const BOB: &str = "+15550002";
    const STRANGER: &str = "+15559999";

    fn contacts() -> Vec<Contact> {
        vec![contact(1, "Ada", "Lovelace", ADA), contact(2, "Bob", "Marley", BOB)]
    }

    fn history() -> MemoryHistory {
        let history = MemoryHistory::new();
        history.record(Mailbox::Inbox, RawMessage::new(ADA, "first", "100"));
        history.record(Mailbox::Sent, RawMessage::new(ADA, "reply", "300"));
        history.record(Mailbox::Inbox, RawMessage::new(ADA, "second", "200"));
        history.record(Mailbox::Inbox, RawMessage::new(BOB, "hey", "250"));
        history.record(Mailbox::Inbox, RawMessage::new(STRANGER, "spam", "999"));
        history
    }

    fn timestamps(conversation: &Conversation) -> Vec<i64> {
        conversation
            .messages
            .iter()
            .map(|m| m.timestamp_millis)
            .collect()
    }

    #[test]
    fn test_truncate_body_boundaries() {
        let thirty = "a".repeat(30);
        let thirty_one = "a".repeat(31);

        assert_eq!(truncate_body(&thirty, Direction::Received), thirty);
        assert_eq!(
            truncate_body(&thirty_one, Direction::Received),
            format!("{}...", thirty)
        );
    }

    #[test]
    fn test_truncate_body_counts_characters_not_bytes() {
        let body = "é".repeat(31);
        let preview = truncate_body(&body, Direction::Received);
        assert_eq!(preview, format!("{}...", "é".repeat(30)));
    }

    #[test]
    fn test_sent_prefix() {
        assert!(truncate_body("hi", Direction::Sent).starts_with(SENT_PREFIX));
        assert!(!truncate_body("hi", Direction::Received).starts_with(SENT_PREFIX));
    }

    #[tokio::test]
    async fn test_load_all_groups_sorts_and_filters() {
        let mut aggregator = Aggregator::new();
        let contacts = contacts();
        let ranked = aggregator.load_all(&history(), &contacts).await.unwrap();

        let addresses: Vec<&str> = ranked
            .iter()
            .map(|c| c.counterparty_address.as_str())
            .collect();
        assert_eq!(addresses, vec![ADA, BOB]);

        let ada = aggregator.get(ADA).unwrap();
        assert_eq!(timestamps(ada), vec![300, 200, 100]);
        assert_eq!(ada.preview.display_name, "Ada Lovelace");
        assert_eq!(ada.preview.truncated_body, "You: reply");
        assert_eq!(ada.preview.last_activity_timestamp, 300);

        assert!(aggregator.get(STRANGER).is_none());
    }

    #[tokio::test]
    async fn test_load_all_strictly_descending_for_distinct_timestamps() {
        let history = MemoryHistory::new();
        for ts in [5, 42, 17, 3, 99, 64] {
            let mailbox = if ts % 2 == 0 { Mailbox::Sent } else { Mailbox::Inbox };
            history.record(mailbox, RawMessage::new(ADA, format!("m{}", ts), ts));
        }

        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history, &contacts()).await.unwrap();

        let ts = timestamps(aggregator.get(ADA).unwrap());
        assert!(ts.windows(2).all(|w| w[0] > w[1]));
    }

    #[tokio::test]
    async fn test_ties_put_inbox_before_sent() {
        let history = MemoryHistory::new();
        history.record(Mailbox::Sent, RawMessage::new(ADA, "mine", 100));
        history.record(Mailbox::Inbox, RawMessage::new(ADA, "theirs", 100));

        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history, &contacts()).await.unwrap();

        let ada = aggregator.get(ADA).unwrap();
        assert_eq!(ada.messages[0].body, "theirs");
        assert_eq!(ada.messages[1].body, "mine");
    }

    #[tokio::test]
    async fn test_load_all_is_idempotent() {
        let history = history();
        history.record(Mailbox::Inbox, RawMessage::new(BOB, "hey", "250"));
        let contacts = contacts();
        let mut aggregator = Aggregator::new();

        let first: Vec<Conversation> = aggregator
            .load_all(&history, &contacts)
            .await
            .unwrap()
            .into_iter()
            .cloned()
            .collect();
        let second: Vec<Conversation> = aggregator
            .load_all(&history, &contacts)
            .await
            .unwrap()
            .into_iter()
            .cloned()
            .collect();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_ranking_ties_break_by_address() {
        let history = MemoryHistory::new();
        history.record(Mailbox::Inbox, RawMessage::new(BOB, "b", 500));
        history.record(Mailbox::Inbox, RawMessage::new(ADA, "a", 500));

        let mut aggregator = Aggregator::new();
        let ranked = aggregator.load_all(&history, &contacts()).await.unwrap();
        assert_eq!(ranked[0].counterparty_address, ADA);
        assert_eq!(ranked[1].counterparty_address, BOB);
    }

    #[tokio::test]
    async fn test_merge_inserts_mid_sequence() {
        let history = MemoryHistory::new();
        history.record(Mailbox::Inbox, RawMessage::new(ADA, "a", 100));
        history.record(Mailbox::Inbox, RawMessage::new(ADA, "b", 90));
        let contacts = contacts();

        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history, &contacts).await.unwrap();

        let (address, preview) = aggregator
            .merge_live_message(RawMessage::new(ADA, "late", 95), &contacts)
            .unwrap();

        assert_eq!(address, ADA);
        assert_eq!(timestamps(aggregator.get(ADA).unwrap()), vec![100, 95, 90]);
        // head unchanged, so the preview still shows t=100
        assert_eq!(preview.last_activity_timestamp, 100);
        assert_eq!(preview.truncated_body, "a");
    }

    #[tokio::test]
    async fn test_merge_newer_message_updates_preview() {
        let contacts = contacts();
        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history(), &contacts).await.unwrap();

        let (_, preview) = aggregator
            .merge_live_message(RawMessage::new(BOB, "new here", 1_000), &contacts)
            .unwrap();

        assert_eq!(preview.truncated_body, "new here");
        assert_eq!(preview.most_recent_message.origin, Origin::Live);
        assert_eq!(aggregator.ranked()[0].counterparty_address, BOB);
    }

    #[test]
    fn test_merge_without_load_returns_none() {
        let mut aggregator = Aggregator::new();
        let result = aggregator.merge_live_message(RawMessage::new(ADA, "hi", 1), &contacts());

        assert!(result.is_none());
        assert!(aggregator.is_empty());
    }

    #[tokio::test]
    async fn test_merge_for_unloaded_address_creates_nothing() {
        let contacts = contacts();
        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history(), &contacts).await.unwrap();

        assert!(aggregator
            .merge_live_message(RawMessage::new(STRANGER, "hi", 1_000), &contacts)
            .is_none());
        assert_eq!(aggregator.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_uses_contacts_supplied_at_call_time() {
        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history(), &contacts()).await.unwrap();

        let renamed = vec![contact(1, "Augusta", "King", ADA)];
        let (_, preview) = aggregator
            .merge_live_message(RawMessage::new(ADA, "hello", 1_000), &renamed)
            .unwrap();
        assert_eq!(preview.display_name, "Augusta King");

        let (_, preview) = aggregator
            .merge_live_message(RawMessage::new(ADA, "again", 1_001), &[])
            .unwrap();
        assert_eq!(preview.display_name, ADA);
    }

    #[tokio::test]
    async fn test_duplicates_kept_by_default() {
        let contacts = contacts();
        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history(), &contacts).await.unwrap();

        aggregator.merge_live_message(RawMessage::new(BOB, "hey", 250), &contacts);
        assert_eq!(aggregator.get(BOB).unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_dedup_window_drops_near_duplicates() {
        let contacts = contacts();
        let mut aggregator = Aggregator::with_dedup(DedupPolicy::Window(2_000));
        aggregator.load_all(&history(), &contacts).await.unwrap();

        let merged = aggregator.merge_live_message(RawMessage::new(BOB, "hey", 1_250), &contacts);
        assert!(merged.is_some());
        assert_eq!(aggregator.get(BOB).unwrap().messages.len(), 1);

        aggregator.merge_live_message(RawMessage::new(BOB, "hey", 9_000), &contacts);
        assert_eq!(aggregator.get(BOB).unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_dedup_window_handles_extreme_timestamps() {
        let contacts = contacts();
        let mut aggregator = Aggregator::with_dedup(DedupPolicy::Window(1_000));
        aggregator.load_all(&history(), &contacts).await.unwrap();

        aggregator.merge_live_message(RawMessage::new(BOB, "hey", i64::MIN), &contacts);
        aggregator.merge_live_message(RawMessage::new(BOB, "hey", i64::MAX), &contacts);

        let bob = aggregator.get(BOB).unwrap();
        assert_eq!(timestamps(bob), vec![i64::MAX, 250, i64::MIN]);
    }

    #[test]
    fn test_negative_dedup_window_matches_nothing() {
        let existing = vec![normalize(RawMessage::new(BOB, "hey", 10), Origin::Live)];
        let candidate = normalize(RawMessage::new(BOB, "hey", 10), Origin::Live);

        assert!(DedupPolicy::Window(0).is_duplicate(&existing, &candidate));
        assert!(!DedupPolicy::Window(-1).is_duplicate(&existing, &candidate));
    }

    #[tokio::test]
    async fn test_unavailable_source_clears_state() {
        let history = history();
        let contacts = contacts();
        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history, &contacts).await.unwrap();
        assert!(!aggregator.is_empty());

        history.set_available(false);
        let result = aggregator.load_all(&history, &contacts).await;

        assert!(matches!(result, Err(EngineError::SourceUnavailable(_))));
        assert!(aggregator.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_records_do_not_abort_the_batch() {
        let history = history();
        history.record(Mailbox::Inbox, RawMessage::new(BOB, "garbled", "n/a"));
        history.record(
            Mailbox::Inbox,
            RawMessage {
                body: "no address".to_string(),
                timestamp: 5.into(),
                ..Default::default()
            },
        );

        let mut aggregator = Aggregator::new();
        aggregator.load_all(&history, &contacts()).await.unwrap();

        let bob = aggregator.get(BOB).unwrap();
        assert_eq!(timestamps(bob), vec![250, 0]);
        assert_eq!(aggregator.len(), 2);
    }
}
