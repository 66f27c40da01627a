use crate::text::truncate_chars;
use crate::traits::TextGenerator;
use crate::types::{Item, RelayError};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, error, warn};

static OPENING_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^```(?:html?)?[ \t]*\n?").unwrap());
static CLOSING_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)\n?```[ \t]*$").unwrap());

const DEFAULT_AUTHOR: &str = "Editorial staff";

/// Turns an [`Item`] into a ready-to-post channel message.
pub struct SummaryGenerator {
    generator: Arc<dyn TextGenerator>,
    language: String,
    max_body_chars: usize,
    timeout: Duration,
}

impl SummaryGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, language: impl Into<String>, max_body_chars: usize, timeout: Duration) -> Self {
        Self {
            generator,
            language: language.into(),
            max_body_chars,
            timeout,
        }
    }

    pub fn system_instruction(&self) -> String {
        format!(
            "You are the editor of a Telegram news channel about technology and business.\n\
             Your job is to turn news items into short, informative and engaging posts.\n\n\
             RULES:\n\
             - Write in {}\n\
             - Use only Telegram HTML: <b>bold</b>, <i>italic</i>, <a href=\"url\">link</a>\n\
             - Do NOT use Markdown (**, ##, ```)\n\
             - Be concise but informative\n\
             - Use emoji where it fits\n\
             - Focus on what happened and why it matters",
            self.language
        )
    }

    pub fn build_prompt(&self, item: &Item) -> String {
        let body = if item.content.is_empty() { &item.summary } else { &item.content };

        format!(
            "Turn this news item into a post for the Telegram channel.\n\n\
             POST STRUCTURE:\n\
             1. {icon} <b>Catchy headline</b> (at most 10 words)\n\
             2. Empty line\n\
             3. The gist (2-3 sentences, 50-80 words)\n\
             4. Why it matters (1-2 sentences)\n\
             5. Empty line\n\
             6. 2-3 relevant hashtags (#AI #Tech #Business)\n\
             7. \u{1F517} <a href=\"{link}\">Read more</a>\n\n\
             STYLE:\n\
             - Businesslike but lively\n\
             - Concrete numbers and facts\n\
             - No filler or cliches\n\n\
             ---\n\
             SOURCE: {source}\n\
             TITLE: {title}\n\
             AUTHOR: {author}\n\
             CONTENT: {content}\n\
             ---\n\n\
             Write the post (HTML only, no commentary):",
            icon = item.source_icon,
            link = item.link,
            source = item.source,
            title = item.title,
            author = item.author.as_deref().unwrap_or(DEFAULT_AUTHOR),
            content = truncate_chars(body, self.max_body_chars),
        )
    }

    /// The generated post, or `None` on any generation problem.
    ///
    /// The call runs on its own task so a slow service never stalls the
    /// caller's other work; it is abandoned after the configured timeout.
    pub async fn summarize(&self, item: &Item) -> Option<String> {
        let system = self.system_instruction();
        let prompt = self.build_prompt(item);
        let generator = Arc::clone(&self.generator);
        debug!("Summarizing {} with {}", item.link, generator.model_name());

        let mut handle = tokio::spawn(async move { generator.generate(&system, &prompt).await });

        let outcome = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                warn!("Generation timed out after {:?} for {}", self.timeout, item.link);
                return None;
            }
        };

        match outcome {
            Ok(Ok(raw)) => {
                let cleaned = clean_response(&raw);
                if cleaned.is_empty() {
                    warn!("Empty generation for {}", item.link);
                    None
                } else {
                    debug!("Generated {} chars for {}", cleaned.chars().count(), item.link);
                    Some(cleaned)
                }
            }
            Ok(Err(RelayError::Blocked(reason))) => {
                warn!("Generation blocked for {}: {}", item.link, reason);
                None
            }
            Ok(Err(e)) => {
                error!("Generation failed for {}: {}", item.link, e);
                None
            }
            Err(e) => {
                error!("Generation task died for {}: {}", item.link, e);
                None
            }
        }
    }
}

/// Strip code fences the model sometimes wraps its answer in.
pub fn clean_response(text: &str) -> String {
    let without_open = OPENING_FENCE_RE.replace_all(text, "");
    CLOSING_FENCE_RE.replace_all(&without_open, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct Scripted {
        reply: Mutex<Option<Result<String>>>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        fn model_name(&self) -> String {
            "scripted".to_string()
        }

        async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(self.delay).await;
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(RelayError::Generation("exhausted".into())))
        }
    }

    fn item() -> Item {
        Item {
            title: "Chip maker doubles output".to_string(),
            link: "https://example.com/chips".to_string(),
            summary: "short".to_string(),
            content: "x".repeat(3000),
            author: None,
            published_at: Utc::now(),
            source: "Example".to_string(),
            source_icon: "*".to_string(),
        }
    }

    fn summarizer(generator: Arc<dyn TextGenerator>) -> SummaryGenerator {
        SummaryGenerator::new(generator, "English", 1500, Duration::from_secs(5))
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(clean_response("```html\n<b>Hi</b>\n```"), "<b>Hi</b>");
        assert_eq!(clean_response("```\n<b>Hi</b>\n```  "), "<b>Hi</b>");
        assert_eq!(clean_response("  plain text  "), "plain text");
    }

    #[test]
    fn prompt_carries_item_fields_and_truncates_body() {
        let s = summarizer(Scripted::new(Ok(String::new())));
        let prompt = s.build_prompt(&item());

        assert!(prompt.contains("SOURCE: Example"));
        assert!(prompt.contains("TITLE: Chip maker doubles output"));
        assert!(prompt.contains("AUTHOR: Editorial staff"));
        assert!(prompt.contains("href=\"https://example.com/chips\""));
        assert!(prompt.contains(&format!("CONTENT: {}\n", "x".repeat(1500))));
        assert!(!prompt.contains(&"x".repeat(1501)));
    }

    #[tokio::test]
    async fn returns_cleaned_summary() {
        let generator = Scripted::new(Ok("```html\n<b>Post</b>\n```".to_string()));
        let s = summarizer(generator.clone());

        assert_eq!(s.summarize(&item()).await.as_deref(), Some("<b>Post</b>"));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blocked_and_failed_generation_yield_none() {
        let blocked = summarizer(Scripted::new(Err(RelayError::Blocked("SAFETY".into()))));
        assert_eq!(blocked.summarize(&item()).await, None);

        let failed = summarizer(Scripted::new(Err(RelayError::Generation("quota".into()))));
        assert_eq!(failed.summarize(&item()).await, None);

        let empty = summarizer(Scripted::new(Ok("```\n```".to_string())));
        assert_eq!(empty.summarize(&item()).await, None);
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        let generator = Arc::new(Scripted {
            reply: Mutex::new(Some(Ok("late".to_string()))),
            delay: Duration::from_secs(10),
            prompts: Mutex::new(Vec::new()),
        });
        let s = SummaryGenerator::new(generator, "English", 1500, Duration::from_millis(50));

        assert_eq!(s.summarize(&item()).await, None);
    }

    /// Serves Gemini-shaped answers, except that requests for `stalled`
    /// never get a response.
    async fn stalling_gemini(stalled: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 4096];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }

                    if String::from_utf8_lossy(&head).contains(&format!("/models/{}:", stalled)) {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return;
                    }

                    let body = r#"{"candidates":[{"content":{"parts":[{"text":"fallback ok"}]}}]}"#;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn stalled_primary_model_leaves_time_for_fallback() {
        let vars: std::collections::HashMap<String, String> = [
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("GEMINI_API_KEY", "k"),
            ("CHANNEL_ID", "@c"),
            ("GEMINI_FALLBACK_MODEL", "secondary"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mut config = crate::config::RelayConfig::from_vars(&vars).unwrap();
        config.pipeline.generation_timeout = Duration::from_millis(300);

        let gemini = crate::gemini::GeminiClient::new("k", "primary", config.pipeline.generation_timeout)
            .unwrap()
            .with_base_url(stalling_gemini("primary").await)
            .with_fallback_model(config.gemini_fallback_model.clone());
        let s = SummaryGenerator::new(Arc::new(gemini), "English", 1500, config.summary_timeout());

        assert_eq!(s.summarize(&item()).await.as_deref(), Some("fallback ok"));
    }
}
