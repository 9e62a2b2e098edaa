//! Conversation and message state core of the Squadlink chat client.
//!
//! [`ChatSession`] is the entry point: it turns user intents into optimistic
//! store updates, reconciles them with a [`ChatBackend`] and exposes a
//! [`ViewModel`] for presentation.

pub mod attachments;
pub mod backend;
pub mod config;
pub mod conversations;
pub mod error;
pub mod mutation;
pub mod poller;
pub mod search;
pub mod session;
pub mod thread;
pub mod view;

pub use backend::{ChatBackend, HttpBackend, MemoryBackend};
pub use config::{ClientConfig, SessionConfig};
pub use error::{ChatError, Result};
pub use session::{ChatSession, SessionEvent};
pub use view::{DisplayMessage, Notice, NoticeId, ViewModel};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
