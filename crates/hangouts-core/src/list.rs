//! Inbox-style conversation list
//!
//! Keeps one preview per known counterparty, ranked by recency, on top of an
//! `Aggregator`. Live events patch a single entry and re-rank the whole list;
//! events for conversations that were never loaded come back as
//! `ListUpdate::Unchanged`, meaning the caller owes a `refresh`.

use hangouts_history::{HistorySource, RawMessage};
use tracing::{debug, info};

use crate::aggregator::{by_recency, Aggregator, ConversationPreview, DedupPolicy};
use crate::contact::Contact;
use crate::error::EngineResult;
use crate::feed::{LiveFeed, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListUpdate {
    /// The list after applying the event
    Reordered(Vec<ConversationPreview>),
    /// The event's conversation is not loaded; refresh to pick it up
    Unchanged,
}

#[derive(Default)]
pub struct ConversationListView {
    aggregator: Aggregator,
    previews: Vec<ConversationPreview>,
    subscription: Option<Subscription>,
}

impl ConversationListView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedup(dedup: DedupPolicy) -> Self {
        Self {
            aggregator: Aggregator::with_dedup(dedup),
            ..Self::default()
        }
    }

    /// Reload everything. On failure the list is left empty.
    pub async fn refresh<H>(
        &mut self,
        history: &H,
        contacts: &[Contact],
    ) -> EngineResult<Vec<ConversationPreview>>
    where
        H: HistorySource + ?Sized,
    {
        self.previews.clear();
        let previews: Vec<ConversationPreview> = self
            .aggregator
            .load_all(history, contacts)
            .await?
            .into_iter()
            .map(|conversation| conversation.preview.clone())
            .collect();

        self.previews = previews.clone();
        Ok(previews)
    }

    pub fn apply_live_message(&mut self, raw: RawMessage, contacts: &[Contact]) -> ListUpdate {
        let Some((address, preview)) = self.aggregator.merge_live_message(raw, contacts) else {
            return ListUpdate::Unchanged;
        };

        match self
            .previews
            .iter_mut()
            .find(|p| p.counterparty_address == address)
        {
            Some(existing) => *existing = preview,
            None => self.previews.push(preview),
        }
        self.previews.sort_by(by_recency);

        ListUpdate::Reordered(self.previews.clone())
    }

    pub fn previews(&self) -> &[ConversationPreview] {
        &self.previews
    }

    pub fn follow(&mut self, feed: &dyn LiveFeed) {
        self.subscription = Some(feed.subscribe());
    }

    pub fn is_following(&self) -> bool {
        self.subscription.is_some()
    }

    /// Apply every queued live event, refreshing once at the end if any of
    /// them hit an unloaded conversation. Returns how many events were read.
    pub async fn drain_live<H>(&mut self, history: &H, contacts: &[Contact]) -> EngineResult<usize>
    where
        H: HistorySource + ?Sized,
    {
        let mut pending = Vec::new();
        if let Some(subscription) = self.subscription.as_mut() {
            while let Some(raw) = subscription.try_recv() {
                pending.push(raw);
            }
        }

        let count = pending.len();
        let mut needs_refresh = false;
        for raw in pending {
            if self.apply_live_message(raw, contacts) == ListUpdate::Unchanged {
                needs_refresh = true;
            }
        }

        if needs_refresh {
            debug!("Live event for an unloaded conversation, refreshing list");
            self.refresh(history, contacts).await?;
        }
        Ok(count)
    }

    /// Stop live delivery and drop the cached list
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.previews.clear();
        info!("Conversation list closed");
    }
}
