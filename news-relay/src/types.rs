use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// One configured syndication endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub icon: String,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            icon: icon.into(),
        }
    }
}

/// A normalized feed entry. `link` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub content: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub source: String,
    pub source_icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub link: String,
    pub title: String,
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: i64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub by_source: HashMap<String, i64>,
    pub last_24h: i64,
}

/// Counters for a single run. Only the orchestrator mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub items_found: usize,
    pub items_new: usize,
    pub items_processed: usize,
    pub items_failed: usize,
    pub errors: Vec<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            items_found: 0,
            items_new: 0,
            items_processed: 0,
            items_failed: 0,
            errors: Vec::new(),
            finished_at: None,
        }
    }

    /// A run fails when nothing was delivered and something went wrong:
    /// every attempted item failed, or the run aborted with an error.
    pub fn is_failure(&self) -> bool {
        self.items_processed == 0 && (self.items_failed > 0 || !self.errors.is_empty())
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub feed_timeout: Duration,
    pub page_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            feed_timeout: Duration::from_secs(20),
            page_timeout: Duration::from_secs(15),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            max_redirects: 5,
        }
    }
}

/// Per-run tunables. Defaults match the production deployment.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_items_per_run: usize,
    pub max_items_per_feed: usize,
    pub max_text_chars: usize,
    pub max_prompt_body_chars: usize,
    pub image_prefix_bytes: usize,
    pub publish_pause: Duration,
    pub generation_timeout: Duration,
    pub retention_days: Option<u32>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_items_per_run: 5,
            max_items_per_feed: 10,
            max_text_chars: 2000,
            max_prompt_body_chars: 1500,
            image_prefix_bytes: 50_000,
            publish_pause: Duration::from_secs(3),
            generation_timeout: Duration::from_secs(60),
            retention_days: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation blocked: {0}")]
    Blocked(String),

    #[error("Messaging API rejected request: {0}")]
    Api(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
