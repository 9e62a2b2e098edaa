use anyhow::Context;
use squadlink_chat::{init_tracing, ChatSession, ClientConfig, HttpBackend, SessionEvent};
use squadlink_messaging::{Participant, UserId};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env()?;
    let user_id = config
        .user_id
        .clone()
        .context("SQUADLINK_USER_ID must be set")?;
    let user_name = config.user_name.clone().unwrap_or_else(|| user_id.clone());
    let me = Participant::new(UserId::new(user_id), user_name);

    let backend = HttpBackend::from_config(&config)?;
    info!(api_url = %config.api_url, user = %me.id, "starting Squadlink chat client");

    let mut session = ChatSession::new(Arc::new(backend), me, config.session.clone());
    if let Err(err) = session.refresh_conversations().await {
        warn!(%err, "initial conversation refresh failed");
    }
    for conversation in session.conversations() {
        let with = conversation
            .counterpart(&session.me().id)
            .map(|p| p.display_name.as_str())
            .unwrap_or("?");
        let preview = conversation
            .last_message
            .as_ref()
            .map(|m| m.summary())
            .unwrap_or("");
        info!(
            conversation_id = %conversation.id,
            with,
            unread = conversation.unread_count,
            preview,
            "conversation"
        );
    }

    session.start_polling();
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            event = session.next_event() => event,
        };
        match event {
            Some(SessionEvent::UnreadUpdated(summary)) => {
                info!(has_unread = summary.has_unread, total_unread = summary.total_unread, "unread");
            }
            Some(SessionEvent::PollFailed(err)) if !session.is_polling() => {
                error!(%err, "polling stopped");
                break;
            }
            Some(other) => debug!(?other, "session event"),
            None => break,
        }
    }

    session.teardown();
    info!("session closed");
    Ok(())
}
