use crate::text::{char_len, truncate_html};
use crate::traits::MessagingChannel;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const CAPTION_LIMIT: usize = 1024;
pub const MESSAGE_LIMIT: usize = 4096;
/// Length kept when a message has to be cut, leaving room for the marker.
pub const MESSAGE_KEEP: usize = 4000;
pub const TRUNCATION_MARKER: &str = "\n\n<i>... (message truncated)</i>";

const PARSE_MODE: &str = "HTML";

/// Delivers posts to the channel, degrading from photo+caption to text.
pub struct Publisher {
    channel: Arc<dyn MessagingChannel>,
    disable_preview: bool,
}

impl Publisher {
    pub fn new(channel: Arc<dyn MessagingChannel>) -> Self {
        Self {
            channel,
            disable_preview: false,
        }
    }

    pub fn with_disable_preview(mut self, disable_preview: bool) -> Self {
        self.disable_preview = disable_preview;
        self
    }

    pub async fn test_connectivity(&self) -> bool {
        match self.channel.get_me().await {
            Ok(identity) => {
                info!(
                    "Connected as @{} ({})",
                    identity.username.as_deref().unwrap_or("unknown"),
                    identity.id
                );
                true
            }
            Err(e) => {
                error!("Messaging connectivity check failed: {}", e);
                false
            }
        }
    }

    /// `false` only when the text-only delivery fails. A rejected photo
    /// followed by a delivered text message counts as success.
    pub async fn post(&self, text: &str, image_url: Option<&str>) -> bool {
        if let Some(image_url) = image_url {
            let caption = caption_for(text);
            match self.channel.send_photo(image_url, &caption, PARSE_MODE).await {
                Ok(()) => return true,
                Err(e) => warn!("Photo delivery failed, falling back to text: {}", e),
            }
        }

        let message = message_for(text);
        match self.channel.send_text(&message, PARSE_MODE, self.disable_preview).await {
            Ok(()) => true,
            Err(e) => {
                error!("Text delivery failed: {}", e);
                false
            }
        }
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

pub fn caption_for(text: &str) -> String {
    truncate_html(text, CAPTION_LIMIT)
}

pub fn message_for(text: &str) -> String {
    if char_len(text) <= MESSAGE_LIMIT {
        return text.to_string();
    }
    warn!("Message cut to fit the {} char limit", MESSAGE_LIMIT);
    format!("{}{}", truncate_html(text, MESSAGE_KEEP), TRUNCATION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChannelIdentity;
    use crate::types::{RelayError, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        photo_fails: bool,
        text_fails: bool,
        photos: Mutex<Vec<(String, String)>>,
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessagingChannel for Recorder {
        async fn get_me(&self) -> Result<ChannelIdentity> {
            Ok(ChannelIdentity { id: 1, username: Some("bot".into()) })
        }

        async fn send_text(&self, text: &str, _parse_mode: &str, _disable_preview: bool) -> Result<()> {
            self.texts.lock().unwrap().push(text.to_string());
            if self.text_fails {
                Err(RelayError::Api("text rejected".into()))
            } else {
                Ok(())
            }
        }

        async fn send_photo(&self, photo_url: &str, caption: &str, _parse_mode: &str) -> Result<()> {
            self.photos.lock().unwrap().push((photo_url.to_string(), caption.to_string()));
            if self.photo_fails {
                Err(RelayError::Api("photo rejected".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn photo_success_skips_text() {
        let channel = Arc::new(Recorder::default());
        let publisher = Publisher::new(channel.clone());

        assert!(publisher.post("hello", Some("https://x/a.jpg")).await);
        assert_eq!(channel.photos.lock().unwrap().len(), 1);
        assert!(channel.texts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_photo_falls_back_to_full_text() {
        let channel = Arc::new(Recorder { photo_fails: true, ..Default::default() });
        let publisher = Publisher::new(channel.clone());
        let text = "a".repeat(2000);

        assert!(publisher.post(&text, Some("https://x/a.jpg")).await);

        let photos = channel.photos.lock().unwrap();
        assert_eq!(char_len(&photos[0].1), CAPTION_LIMIT);
        assert_eq!(channel.texts.lock().unwrap()[0], text);
    }

    #[tokio::test]
    async fn both_failing_is_failure() {
        let channel = Arc::new(Recorder { photo_fails: true, text_fails: true, ..Default::default() });
        let publisher = Publisher::new(channel);

        assert!(!publisher.post("hello", Some("https://x/a.jpg")).await);
    }

    #[tokio::test]
    async fn text_only_when_no_image() {
        let channel = Arc::new(Recorder::default());
        let publisher = Publisher::new(channel.clone());

        assert!(publisher.post("hello", None).await);
        assert!(channel.photos.lock().unwrap().is_empty());
        assert_eq!(channel.texts.lock().unwrap().as_slice(), ["hello"]);
    }

    #[test]
    fn long_text_is_cut_with_marker() {
        let text = "я".repeat(5000);
        let message = message_for(&text);

        assert!(message.ends_with(TRUNCATION_MARKER));
        assert!(char_len(&message) <= MESSAGE_LIMIT);
        assert_eq!(char_len(&message), MESSAGE_KEEP + char_len(TRUNCATION_MARKER));
    }

    #[test]
    fn cut_message_keeps_markup_balanced() {
        let text = format!("<b>Headline</b>\n\n<i>{}</i>", "word ".repeat(1000));
        let message = message_for(&text);

        assert!(char_len(&message) <= MESSAGE_LIMIT);
        assert!(message.ends_with(&format!("</i>{}", TRUNCATION_MARKER)));

        let caption = caption_for(&text);
        assert!(char_len(&caption) <= CAPTION_LIMIT);
        assert!(caption.ends_with("</i>"));
    }

    #[test]
    fn text_at_limit_is_untouched() {
        let text = "b".repeat(MESSAGE_LIMIT);
        assert_eq!(message_for(&text), text);
        assert_eq!(caption_for("short"), "short");
    }
}
