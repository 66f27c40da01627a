use crate::types::Result;
use async_trait::async_trait;

/// Pulls raw syndication documents.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetch the full feed document at `url`.
    async fn fetch_feed(&self, url: &str) -> Result<String>;
}

/// Fetches HTML pages for metadata scraping.
#[async_trait]
pub trait PageClient: Send + Sync {
    /// Fetch at most `max_bytes` from the start of the page body.
    async fn fetch_prefix(&self, url: &str, max_bytes: usize) -> Result<String>;

    async fn close(&self) {}
}

/// External text-generation service.
///
/// Implementations return `RelayError::Blocked` when the service refuses to
/// answer and `RelayError::Generation` for any other service-side failure.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> String;

    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String>;
}

/// Identity reported by the messaging destination during the handshake.
#[derive(Debug, Clone)]
pub struct ChannelIdentity {
    pub id: i64,
    pub username: Option<String>,
}

/// Delivery primitives of the downstream messaging destination.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn get_me(&self) -> Result<ChannelIdentity>;

    async fn send_text(&self, text: &str, parse_mode: &str, disable_preview: bool) -> Result<()>;

    async fn send_photo(&self, photo_url: &str, caption: &str, parse_mode: &str) -> Result<()>;

    /// Release held connections. Called once per run during cleanup.
    async fn close(&self) {}
}
