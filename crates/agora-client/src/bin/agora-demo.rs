//! # agora-demo
//!
//! Runs two chat sessions against an in-process hub and logs what each one
//! sees: the message log of the bound channel, who is online, and a search.
//!
//! Set `AGORA_HUB_DB_PATH` to keep the hub's documents between runs.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use agora_client::{ChatSession, SearchOutcome, SessionConfig};
use agora_hub::{spawn_hub, HubConfig, HubHandle};
use agora_shared::constants::APP_NAME;
use agora_shared::models::LocalProfile;
use agora_shared::text::escape_html;
use agora_shared::types::ChannelId;

/// Apply deliveries until the session has been quiet for a moment.
async fn settle(session: &mut ChatSession<HubHandle>) {
    while let Ok(true) = tokio::time::timeout(Duration::from_millis(100), session.pump()).await {}
}

fn log_view(who: &str, session: &ChatSession<HubHandle>) {
    let channel = session
        .current_channel()
        .map(|c| c.to_string())
        .unwrap_or_default();

    info!(session = who, channel = %channel, messages = session.message_log().len(), "Message log");
    for entry in session.message_log().entries() {
        let sent = entry
            .message
            .sent_time()
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "pending".into());
        info!(
            session = who,
            author = %entry.message.author_display_name,
            state = ?entry.delivery,
            sent = %sent,
            "  {}",
            escape_html(&entry.message.text)
        );
    }

    let online: Vec<&str> = session
        .presence()
        .entries()
        .iter()
        .map(|e| e.display_name.as_str())
        .collect();
    info!(session = who, ?online, "Presence");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agora_client::logging::init();
    info!("Starting {} demo v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let hub_config = HubConfig::from_env();
    let session_config = SessionConfig::from_env();
    info!(?hub_config, ?session_config, "Loaded configuration");

    let hub = Arc::new(spawn_hub(hub_config).await?);

    let mut ada = ChatSession::new(hub.clone(), session_config.clone());
    let mut bea = ChatSession::new(hub.clone(), session_config);

    ada.on_message_log_changed(|log| {
        tracing::debug!(entries = log.len(), "ada: message log changed");
    });

    ada.sign_in(LocalProfile::new("ada", "Ada", "ada@example.com"))
        .await?;
    bea.sign_in(LocalProfile::new("bea", "Bea", "bea@example.com"))
        .await?;

    ada.send_message("Morning! Deploy is at noon.").await?;
    bea.send_message("Thanks, I'll watch the dashboards").await?;
    ada.send_message("<b>not bold</b> stays plain text").await?;

    settle(&mut ada).await;
    settle(&mut bea).await;
    log_view("ada", &ada);
    log_view("bea", &bea);

    let ideas = ChannelId::new("ideas");
    ada.switch_channel(ideas.clone()).await?;
    ada.send_message("What about a dark theme?").await?;
    settle(&mut ada).await;
    log_view("ada", &ada);

    bea.switch_channel(ideas).await?;
    settle(&mut bea).await;
    match bea.search("theme") {
        SearchOutcome::Matches(found) => {
            for message in &found {
                info!(author = %message.author_display_name, "Search hit: {}", message.text);
            }
        }
        other => info!(?other, "Search finished without matches"),
    }

    ada.sign_out().await?;
    settle(&mut bea).await;
    log_view("bea", &bea);

    bea.sign_out().await?;

    let stats = hub.stats().await?;
    info!(
        messages = stats.messages,
        users = stats.users,
        subscriptions = stats.subscriptions,
        "Hub totals"
    );

    hub.shutdown().await;
    info!("Demo finished");
    Ok(())
}
