use anyhow::{Context, Result};
use hangouts_core::server::{self, AppState};
use hangouts_core::{ChannelFeed, Config, ContactDirectory, ContactStore};
use hangouts_history::{LoopbackSender, Mailbox, MemoryHistory};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hangouts=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("💬 Hangouts starting up...");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Configuration loaded");
    info!("  Database: {}", config.database_url);
    info!("  Dedup: {:?}", config.dedup);

    let contacts = Arc::new(ContactStore::open(&config.database_url)?);
    info!("Contact directory ready ({} contacts)", contacts.list_all()?.len());

    let history = match &config.sms_export_path {
        Some(path) => MemoryHistory::from_export(path)
            .with_context(|| format!("Failed to load SMS export {}", path.display()))?,
        None => MemoryHistory::new(),
    };
    let history = Arc::new(history);
    info!(
        "History ready: {} inbox, {} sent",
        history.len(Mailbox::Inbox),
        history.len(Mailbox::Sent)
    );

    let sender = Arc::new(LoopbackSender::new(history.clone()));
    let state = Arc::new(AppState::new(
        contacts,
        history,
        sender,
        ChannelFeed::new(),
        config.dedup,
    ));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("💬 Hangouts listening on port {}", config.http_port);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}
