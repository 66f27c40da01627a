use crate::parser::FeedParser;
use crate::traits::FeedClient;
use crate::types::{FeedSource, Item, Result};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

/// Fetches every configured source concurrently and merges the results.
pub struct FeedAggregator {
    client: Arc<dyn FeedClient>,
    parser: FeedParser,
}

impl FeedAggregator {
    pub fn new(client: Arc<dyn FeedClient>, parser: FeedParser) -> Self {
        Self { client, parser }
    }

    /// Items from all sources, newest first.
    ///
    /// A source that fails to fetch or parse contributes nothing. Items
    /// with equal timestamps keep the order of `sources`.
    pub async fn fetch_all(&self, sources: &[FeedSource]) -> Vec<Item> {
        info!("Fetching {} feeds", sources.len());

        let results = join_all(sources.iter().map(|source| self.fetch_source(source))).await;

        let mut items = Vec::new();
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(source_items) => {
                    info!("{}: {} items", source.name, source_items.len());
                    items.extend(source_items);
                }
                Err(e) => error!("{}: feed failed: {}", source.name, e),
            }
        }

        // Stable sort, so ties keep source order.
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        info!("Collected {} items from {} sources", items.len(), sources.len());
        items
    }

    async fn fetch_source(&self, source: &FeedSource) -> Result<Vec<Item>> {
        let content = self.client.fetch_feed(&source.url).await?;
        self.parser.parse(&content, source, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelayError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct StubFeeds {
        bodies: HashMap<String, String>,
        delays: HashMap<String, Duration>,
    }

    #[async_trait]
    impl FeedClient for StubFeeds {
        async fn fetch_feed(&self, url: &str) -> Result<String> {
            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| RelayError::HttpStatus { status: 500, url: url.to_string() })
        }
    }

    fn rss(items: &[(&str, &str)]) -> String {
        let body: String = items
            .iter()
            .map(|(link, date)| {
                format!("<item><title>{link}</title><link>{link}</link><pubDate>{date}</pubDate></item>")
            })
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>{body}</channel></rss>"#)
    }

    const T1: &str = "Wed, 03 Jan 2024 10:00:00 GMT";
    const T2: &str = "Tue, 02 Jan 2024 10:00:00 GMT";
    const T3: &str = "Mon, 01 Jan 2024 10:00:00 GMT";

    #[tokio::test]
    async fn merges_sources_newest_first() {
        let mut bodies = HashMap::new();
        bodies.insert("a".to_string(), rss(&[("https://a/3", T3), ("https://a/1", T1)]));
        bodies.insert("b".to_string(), rss(&[("https://b/2", T2)]));
        bodies.insert("c".to_string(), rss(&[("https://c/1", T1), ("https://c/3", T3)]));

        let mut delays = HashMap::new();
        delays.insert("a".to_string(), Duration::from_millis(30));

        let aggregator = FeedAggregator::new(Arc::new(StubFeeds { bodies, delays }), FeedParser::new(10, 2000));
        let sources = vec![
            FeedSource::new("A", "a", "*"),
            FeedSource::new("B", "b", "*"),
            FeedSource::new("C", "c", "*"),
        ];

        let items = aggregator.fetch_all(&sources).await;
        let links: Vec<&str> = items.iter().map(|i| i.link.as_str()).collect();

        assert_eq!(
            links,
            vec!["https://a/1", "https://c/1", "https://b/2", "https://a/3", "https://c/3"]
        );
        assert!(items.windows(2).all(|w| w[0].published_at >= w[1].published_at));
    }

    #[tokio::test]
    async fn failing_source_does_not_abort_others() {
        let mut bodies = HashMap::new();
        bodies.insert("ok".to_string(), rss(&[("https://ok/1", T1)]));
        bodies.insert("broken".to_string(), "<html>nope".to_string());

        let aggregator = FeedAggregator::new(
            Arc::new(StubFeeds { bodies, delays: HashMap::new() }),
            FeedParser::new(10, 2000),
        );
        let sources = vec![
            FeedSource::new("Down", "down", "*"),
            FeedSource::new("Broken", "broken", "*"),
            FeedSource::new("Ok", "ok", "*"),
        ];

        let items = aggregator.fetch_all(&sources).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "Ok");
    }
}
