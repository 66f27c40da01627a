use crate::traits::{ChannelIdentity, MessagingChannel};
use crate::types::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'a str,
}

/// Telegram Bot API transport for a single channel.
pub struct TelegramClient {
    client: Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(token: &str, chat_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::with_api_url(DEFAULT_API_URL, token, chat_id, timeout)
    }

    pub fn with_api_url(api_url: &str, token: &str, chat_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            chat_id: chat_id.into(),
        })
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(&self, method: &str, body: Option<&B>) -> Result<T> {
        let url = format!("{}/{}", self.endpoint, method);
        let request = match body {
            Some(body) => self.client.post(&url).json(body),
            None => self.client.get(&url),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(RelayError::Api(format!("{} returned HTTP {}: {}", method, status.as_u16(), text)));
        }

        let parsed: ApiResponse<T> = serde_json::from_str(&text)?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(RelayError::Api(format!(
                "{} failed: {}",
                method,
                parsed.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }
}

#[async_trait]
impl MessagingChannel for TelegramClient {
    async fn get_me(&self) -> Result<ChannelIdentity> {
        let user: BotUser = self.call::<(), _>("getMe", None).await?;
        Ok(ChannelIdentity {
            id: user.id,
            username: user.username,
        })
    }

    async fn send_text(&self, text: &str, parse_mode: &str, disable_preview: bool) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode,
            disable_web_page_preview: disable_preview,
        };
        self.call::<_, serde_json::Value>("sendMessage", Some(&body)).await?;
        Ok(())
    }

    async fn send_photo(&self, photo_url: &str, caption: &str, parse_mode: &str) -> Result<()> {
        let body = SendPhoto {
            chat_id: &self.chat_id,
            photo: photo_url,
            caption,
            parse_mode,
        };
        self.call::<_, serde_json::Value>("sendPhoto", Some(&body)).await?;
        Ok(())
    }

    async fn close(&self) {
        debug!("Telegram session closed for {}", self.chat_id);
    }
}
