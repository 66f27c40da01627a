use crate::types::{FeedSource, PipelineSettings, RelayError, Result};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_DATABASE_PATH: &str = "processed.db";
pub const DEFAULT_LANGUAGE: &str = "Russian";
const DEFAULT_ICON: &str = "\u{1F4F0}";
/// Headroom on top of the per-attempt generation timeouts.
const SUMMARY_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

pub fn default_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::new("TechCrunch", "https://techcrunch.com/feed/", "\u{1F536}"),
        FeedSource::new("The Verge", "https://www.theverge.com/rss/index.xml", "\u{1F537}"),
        FeedSource::new("Ars Technica", "https://feeds.arstechnica.com/arstechnica/index", "\u{1F7E0}"),
    ]
}

/// Everything the binary needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub telegram_token: String,
    pub channel_id: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_fallback_model: Option<String>,
    pub summary_language: String,
    pub database_path: String,
    pub feeds: Vec<FeedSource>,
    pub messaging_timeout: Duration,
    pub pipeline: PipelineSettings,
}

impl RelayConfig {
    /// Read the process environment (after loading any `.env` file).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build from an explicit variable map. All missing required variables
    /// are reported together.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()).map(String::from);

        let telegram_token = get("TELEGRAM_BOT_TOKEN").or_else(|| get("TG_TOKEN"));
        let gemini_api_key = get("GEMINI_API_KEY");
        let channel_id = get("CHANNEL_ID");

        let mut missing = Vec::new();
        if telegram_token.is_none() {
            missing.push("TELEGRAM_BOT_TOKEN or TG_TOKEN");
        }
        if gemini_api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        if channel_id.is_none() {
            missing.push("CHANNEL_ID");
        }

        let (Some(telegram_token), Some(gemini_api_key), Some(channel_id)) = (telegram_token, gemini_api_key, channel_id)
        else {
            return Err(RelayError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        };

        let mut pipeline = PipelineSettings::default();
        if let Some(raw) = get("MAX_ARTICLES_PER_RUN") {
            pipeline.max_items_per_run = parse_number(&raw, "MAX_ARTICLES_PER_RUN")?;
        }
        if let Some(raw) = get("RETENTION_DAYS") {
            pipeline.retention_days = Some(parse_number(&raw, "RETENTION_DAYS")?);
        }

        let mut feeds = default_feeds();
        if let Some(custom) = get("CUSTOM_RSS_FEEDS") {
            feeds.extend(parse_custom_feeds(&custom));
        }

        Ok(Self {
            telegram_token,
            channel_id,
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_fallback_model: get("GEMINI_FALLBACK_MODEL"),
            summary_language: get("SUMMARY_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            database_path: get("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            feeds,
            messaging_timeout: Duration::from_secs(30),
            pipeline,
        })
    }

    /// Total time one summary may take: a full timeout for each model
    /// attempt, plus slack.
    pub fn summary_timeout(&self) -> Duration {
        let attempts = if self.gemini_fallback_model.is_some() { 2 } else { 1 };
        self.pipeline.generation_timeout * attempts + SUMMARY_TIMEOUT_SLACK
    }
}

/// Ledger location for commands that do not need the full configuration.
pub fn database_path_from_env() -> String {
    let _ = dotenvy::dotenv();
    std::env::var("DATABASE_PATH")
        .ok()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string())
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| RelayError::Config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}

/// `Name|URL[|icon]` entries separated by commas. Malformed entries are skipped.
pub fn parse_custom_feeds(raw: &str) -> Vec<FeedSource> {
    raw.split(',')
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.trim().split('|').map(str::trim).collect();
            match parts.as_slice() {
                [name, url, rest @ ..] if !name.is_empty() && !url.is_empty() => {
                    let icon = rest.first().filter(|icon| !icon.is_empty()).unwrap_or(&DEFAULT_ICON);
                    Some(FeedSource::new(*name, *url, *icon))
                }
                _ => None,
            }
        })
        .collect()
}
