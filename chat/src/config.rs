use anyhow::bail;
use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";

/// Tunables of a chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the unread poller refreshes the conversation list.
    pub poll_interval: Duration,
    /// Quiet period before a typed search query runs.
    pub search_debounce: Duration,
    /// How long presentation should keep a search hit highlighted.
    pub highlight_duration: Duration,
    pub image_size_limit: u64,
    pub file_size_limit: u64,
    pub request_timeout: Duration,
}

impl SessionConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_search_debounce(mut self, debounce: Duration) -> Self {
        self.search_debounce = debounce;
        self
    }

    pub fn with_size_limits(mut self, image: u64, file: u64) -> Self {
        self.image_size_limit = image;
        self.file_size_limit = file;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            search_debounce: Duration::from_millis(300),
            highlight_duration: Duration::from_secs(2),
            image_size_limit: 5 * 1024 * 1024,
            file_size_limit: 10 * 1024 * 1024,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Runtime configuration for a client process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub session: SessionConfig,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = env::var("SQUADLINK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_token = env::var("SQUADLINK_API_TOKEN").ok().filter(|t| !t.is_empty());
        let user_id = env::var("SQUADLINK_USER_ID").ok().filter(|u| !u.is_empty());
        let user_name = env::var("SQUADLINK_USER_NAME").ok().filter(|u| !u.is_empty());

        let mut session = SessionConfig::default();
        if let Ok(raw) = env::var("SQUADLINK_POLL_SECS") {
            let secs: u64 = raw.parse()?;
            if secs == 0 {
                bail!("SQUADLINK_POLL_SECS must be at least 1");
            }
            session = session.with_poll_interval(Duration::from_secs(secs));
        }

        Ok(Self {
            api_url,
            api_token,
            user_id,
            user_name,
            session,
        })
    }
}
