//! Single-conversation thread view
//!
//! Holds the full message list for one counterparty, newest first. Unlike the
//! conversation list it does not consult the contact directory: a thread can
//! be opened on any address.
//!
//! Messages the user composes are inserted immediately as `local-pending`
//! and stay that way for as long as the thread is open, whether or not the
//! transport accepts them.

use chrono::Utc;
use hangouts_history::{log_preview, HistorySource, Mailbox, RawMessage, SmsSender};
use tracing::{debug, info, warn};

use crate::aggregator::DedupPolicy;
use crate::error::{EngineError, EngineResult};
use crate::feed::{LiveFeed, Subscription};
use crate::message::{
    normalize, normalize_batch, sort_newest_first, sorted_position, Message, Origin,
};

/// Result of composing and sending a message
#[derive(Debug)]
pub struct SendOutcome {
    /// The local-pending message already shown in the thread
    pub message: Message,
    /// What the transport said. A failure does not remove `message`.
    pub delivery: EngineResult<()>,
}

pub struct ThreadView {
    address: String,
    messages: Vec<Message>,
    subscription: Option<Subscription>,
    dedup: DedupPolicy,
}

impl ThreadView {
    /// Load both boxes for `address` and sort them newest first
    pub async fn open<H>(history: &H, address: &str) -> EngineResult<Self>
    where
        H: HistorySource + ?Sized,
    {
        let (inbox, sent) = tokio::try_join!(
            history.query(Mailbox::Inbox, Some(address)),
            history.query(Mailbox::Sent, Some(address)),
        )
        .map_err(|e| {
            warn!("Failed to open thread with {}: {}", address, e);
            EngineError::SourceUnavailable(e)
        })?;

        let mut messages: Vec<Message> =
            normalize_batch(inbox.into_iter().chain(sent).collect(), Origin::History)
                .into_iter()
                .filter(|m| m.address == address)
                .collect();
        sort_newest_first(&mut messages);

        info!("Opened thread with {} ({} messages)", address, messages.len());

        Ok(Self {
            address: address.to_string(),
            messages,
            subscription: None,
            dedup: DedupPolicy::Off,
        })
    }

    /// Subscribe to `feed` before loading, so a message published while the
    /// snapshot is taken is queued for `drain_live` instead of lost.
    pub async fn open_following<H>(
        history: &H,
        address: &str,
        feed: &dyn LiveFeed,
    ) -> EngineResult<Self>
    where
        H: HistorySource + ?Sized,
    {
        let subscription = feed.subscribe();
        let mut view = Self::open(history, address).await?;
        view.subscription = Some(subscription);
        Ok(view)
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Newest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Start receiving live events. Replaces any earlier subscription.
    pub fn follow(&mut self, feed: &dyn LiveFeed) {
        self.subscription = Some(feed.subscribe());
    }

    pub fn is_following(&self) -> bool {
        self.subscription.is_some()
    }

    /// Insert a live event if it belongs to this thread.
    /// Returns whether the thread changed.
    pub fn on_live_message(&mut self, raw: RawMessage) -> bool {
        self.insert_live(raw).is_some()
    }

    fn insert_live(&mut self, raw: RawMessage) -> Option<usize> {
        if !raw.is_from(&self.address) {
            return None;
        }

        let message = normalize(raw, Origin::Live);
        if self.dedup.is_duplicate(&self.messages, &message) {
            debug!("Dropping duplicate live message in thread {}", self.address);
            return None;
        }

        let position = sorted_position(&self.messages, message.timestamp_millis);
        self.messages.insert(position, message);
        Some(position)
    }

    /// Apply every event queued on the subscription. Returns how many
    /// changed the thread.
    pub fn drain_live(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(subscription) = self.subscription.as_mut() {
            while let Some(raw) = subscription.try_recv() {
                pending.push(raw);
            }
        }

        let mut applied = 0;
        for raw in pending {
            if self.on_live_message(raw) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next live event for this thread and apply it.
    /// `None` when not following or the feed has gone away.
    pub async fn next_live(&mut self) -> Option<&Message> {
        loop {
            let raw = self.subscription.as_mut()?.recv().await?;
            if let Some(position) = self.insert_live(raw) {
                return self.messages.get(position);
            }
        }
    }

    /// Show a composed message at the head right away
    pub fn on_local_send(&mut self, body: &str) -> Message {
        let message = Message::local_pending(
            self.address.clone(),
            body,
            Utc::now().timestamp_millis(),
        );
        self.messages.insert(0, message.clone());
        debug!("Local message queued for {}: {}", self.address, log_preview(body, 50));
        message
    }

    /// Compose and hand to the transport. The message stays in the thread
    /// even if sending fails.
    pub async fn send<S>(&mut self, sender: &S, body: &str) -> SendOutcome
    where
        S: SmsSender + ?Sized,
    {
        let message = self.on_local_send(body);

        let delivery = sender
            .send(&self.address, body)
            .await
            .map_err(|e| {
                warn!("Send to {} failed: {}", self.address, e);
                EngineError::SendFailure {
                    address: self.address.clone(),
                    source: e,
                }
            });

        SendOutcome { message, delivery }
    }

    /// Tear down: stop live delivery and release the message list
    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        info!("Closed thread with {}", self.address);
    }
}
