//! HTTP surface over the conversation engine
//!
//! The conversation list and open threads live in shared state and are fed
//! by the in-process live feed. Queued live events are applied when a view is
//! read, so there is no background task per view.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hangouts_history::{log_preview, Mailbox, MemoryHistory, RawMessage, SmsSender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::aggregator::{ConversationPreview, DedupPolicy};
use crate::contact::{Contact, ContactDirectory};
use crate::error::EngineError;
use crate::feed::ChannelFeed;
use crate::list::ConversationListView;
use crate::message::Message;
use crate::store::{ContactDraft, ContactStore, InvalidContact};
use crate::thread::ThreadView;

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// An open thread behind its own lock, so a slow load or send on one
/// address does not hold up the others. `None` until the first load succeeds.
type ThreadSlot = Arc<Mutex<Option<ThreadView>>>;

pub struct AppState {
    pub contacts: Arc<ContactStore>,
    pub history: Arc<MemoryHistory>,
    pub sender: Arc<dyn SmsSender>,
    pub feed: ChannelFeed,
    dedup: DedupPolicy,
    list: Mutex<ConversationListView>,
    threads: Mutex<HashMap<String, ThreadSlot>>,
    /// Set when something the live feed does not carry changed the list
    list_stale: AtomicBool,
}

impl AppState {
    pub fn new(
        contacts: Arc<ContactStore>,
        history: Arc<MemoryHistory>,
        sender: Arc<dyn SmsSender>,
        feed: ChannelFeed,
        dedup: DedupPolicy,
    ) -> Self {
        Self {
            contacts,
            history,
            sender,
            feed,
            dedup,
            list: Mutex::new(ConversationListView::with_dedup(dedup)),
            threads: Mutex::new(HashMap::new()),
            list_stale: AtomicBool::new(true),
        }
    }

    fn mark_list_stale(&self) {
        self.list_stale.store(true, Ordering::SeqCst);
    }

    async fn thread_slot(&self, address: &str) -> ThreadSlot {
        self.threads
            .lock()
            .await
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    fn contact_snapshot(&self) -> ApiResult<Vec<Contact>> {
        self.contacts.list_all().map_err(internal)
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadResponse {
    pub address: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub message: Message,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboundResponse {
    pub subscribers: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/conversations", get(list_conversations))
        .route("/threads/{address}", get(get_thread).delete(close_thread))
        .route("/threads/{address}/messages", post(send_message))
        .route("/inbound", post(inbound))
        .route("/contacts", get(list_contacts).post(create_contact))
        .route(
            "/contacts/{id}",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn engine_error(e: EngineError) -> (StatusCode, String) {
    let status = match e {
        EngineError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::SendFailure { .. } => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!("Request failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn invalid_contact(e: InvalidContact) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn not_found(what: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{} not found", what))
}

/// Health check endpoint - returns 200 OK when the service is running
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ConversationPreview>>> {
    let contacts = state.contact_snapshot()?;
    let mut list = state.list.lock().await;

    if !list.is_following() {
        // subscribe before loading so nothing published in between is lost
        list.follow(&state.feed);
    }

    // drain even when reloading: queued events are already in history
    let stale = state.list_stale.swap(false, Ordering::SeqCst);
    let result = match list.drain_live(state.history.as_ref(), &contacts).await {
        Ok(_) if stale => list
            .refresh(state.history.as_ref(), &contacts)
            .await
            .map(|_| ()),
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        state.mark_list_stale();
        return Err(engine_error(e));
    }

    Ok(Json(list.previews().to_vec()))
}

/// Open the thread in `slot` if needed and apply queued live events
async fn ready_thread<'a>(
    state: &AppState,
    slot: &'a mut Option<ThreadView>,
    address: &str,
) -> ApiResult<&'a mut ThreadView> {
    if slot.is_none() {
        let view = ThreadView::open_following(state.history.as_ref(), address, &state.feed)
            .await
            .map_err(engine_error)?
            .with_dedup(state.dedup);
        *slot = Some(view);
    }

    let view = slot.as_mut().ok_or_else(|| not_found("Thread"))?;
    let applied = view.drain_live();
    if applied > 0 {
        debug!("Applied {} live messages to thread {}", applied, address);
    }
    Ok(view)
}

async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ApiResult<Json<ThreadResponse>> {
    let slot = state.thread_slot(&address).await;
    let mut slot = slot.lock().await;
    let view = ready_thread(&state, &mut slot, &address).await?;
    let messages = view.messages().to_vec();
    Ok(Json(ThreadResponse { address, messages }))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(request): Json<SendRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.body.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "body cannot be empty".to_string()));
    }

    // load, catch up and compose under the one thread lock
    let outcome = {
        let slot = state.thread_slot(&address).await;
        let mut slot = slot.lock().await;
        let view = ready_thread(&state, &mut slot, &address).await?;
        view.send(state.sender.as_ref(), &request.body).await
    };

    state.mark_list_stale();

    let (status, error) = match outcome.delivery {
        Ok(()) => {
            info!("📤 Sent to {}: {}", address, log_preview(&request.body, 50));
            (StatusCode::CREATED, None)
        }
        Err(e) => {
            warn!("Delivery to {} failed, message left pending", address);
            let (status, reason) = engine_error(e);
            (status, Some(reason))
        }
    };

    Ok((
        status,
        Json(SendResponse {
            message: outcome.message,
            delivered: error.is_none(),
            error,
        }),
    ))
}

async fn close_thread(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ApiResult<StatusCode> {
    let slot = state
        .threads
        .lock()
        .await
        .remove(&address)
        .ok_or_else(|| not_found("Thread"))?;
    // waits for any request still using the thread
    let view = slot.lock().await.take().ok_or_else(|| not_found("Thread"))?;
    view.close();
    Ok(StatusCode::NO_CONTENT)
}

/// A message arriving from the network: file it in the inbox, then announce it
async fn inbound(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<RawMessage>,
) -> ApiResult<impl IntoResponse> {
    if raw.address.as_deref().map_or(true, |a| a.trim().is_empty()) {
        return Err((StatusCode::BAD_REQUEST, "address is required".to_string()));
    }

    let raw = raw.in_mailbox(Mailbox::Inbox);
    state.history.record(Mailbox::Inbox, raw.clone());
    info!(
        "📨 Inbound from {:?}: {}",
        raw.address,
        log_preview(&raw.body, 50)
    );
    let subscribers = state.feed.publish(raw);

    Ok((StatusCode::ACCEPTED, Json(InboundResponse { subscribers })))
}

async fn list_contacts(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Contact>>> {
    Ok(Json(state.contact_snapshot()?))
}

async fn create_contact(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<ContactDraft>,
) -> ApiResult<impl IntoResponse> {
    let draft = draft.validate().map_err(invalid_contact)?;
    let contact = state.contacts.create(&draft).map_err(internal)?;
    state.mark_list_stale();
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn get_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Contact>> {
    state
        .contacts
        .get(id)
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("Contact"))
}

async fn update_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(draft): Json<ContactDraft>,
) -> ApiResult<Json<Contact>> {
    let draft = draft.validate().map_err(invalid_contact)?;
    let contact = state
        .contacts
        .update(id, &draft)
        .map_err(internal)?
        .ok_or_else(|| not_found("Contact"))?;
    state.mark_list_stale();
    Ok(Json(contact))
}

async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> ApiResult<StatusCode> {
    if !state.contacts.delete(id).map_err(internal)? {
        return Err(not_found("Contact"));
    }
    state.mark_list_stale();
    Ok(StatusCode::NO_CONTENT)
}
