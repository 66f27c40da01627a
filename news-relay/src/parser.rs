use crate::text::{clean_html, clean_text};
use crate::types::{FeedSource, Item, RelayError, Result};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::debug;

const UNTITLED: &str = "Untitled";

/// Turns raw RSS/Atom documents into cleaned [`Item`]s.
#[derive(Debug, Clone)]
pub struct FeedParser {
    max_items: usize,
    max_text_chars: usize,
}

impl FeedParser {
    pub fn new(max_items: usize, max_text_chars: usize) -> Self {
        Self {
            max_items,
            max_text_chars,
        }
    }

    /// Parse one source's document.
    ///
    /// Entries without a link are dropped, and a repeated link keeps only
    /// its most recent entry. Entries with no usable date are stamped with
    /// `fetched_at`. The result holds at most `max_items` entries, newest
    /// first.
    pub fn parse(&self, content: &str, source: &FeedSource, fetched_at: DateTime<Utc>) -> Result<Vec<Item>> {
        debug!("Parsing {} ({} bytes)", source.name, content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| RelayError::Parse(format!("{}: {}", source.name, e)))?;

        let mut items: Vec<Item> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.convert_entry(entry, source, fetched_at))
            .collect();

        // Sorted before dedup, so a repeated link keeps its newest entry.
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        let mut seen_links = HashSet::new();
        items.retain(|item| seen_links.insert(item.link.clone()));
        items.truncate(self.max_items);
        Ok(items)
    }

    fn convert_entry(
        &self,
        entry: feed_rs::model::Entry,
        source: &FeedSource,
        fetched_at: DateTime<Utc>,
    ) -> Option<Item> {
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .filter(|href| !href.is_empty())?;

        let title = entry
            .title
            .map(|t| clean_text(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());

        let summary = entry
            .summary
            .map(|s| clean_html(&s.content, self.max_text_chars))
            .unwrap_or_default();

        let content = entry
            .content
            .and_then(|c| c.body)
            .map(|body| clean_html(&body, self.max_text_chars))
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| summary.clone());

        let author = entry
            .authors
            .into_iter()
            .map(|a| clean_text(&a.name))
            .find(|name| !name.is_empty());

        let published_at = entry.published.or(entry.updated).unwrap_or(fetched_at);

        Some(Item {
            title,
            link,
            summary,
            content,
            author,
            published_at,
            source: source.name.clone(),
            source_icon: source.icon.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source() -> FeedSource {
        FeedSource::new("Example", "https://example.com/feed", "*")
    }

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <description>Example feed</description>
    <item>
      <title>  Older   story </title>
      <link>https://example.com/older</link>
      <description>&lt;p&gt;Short &amp;amp; sweet&lt;/p&gt;</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Newer story</title>
      <link>https://example.com/newer</link>
      <description>Teaser</description>
      <content:encoded><![CDATA[<p>Full <b>body</b></p>]]></content:encoded>
      <author>Jane Doe</author>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Stale copy</title>
      <link>https://example.com/newer</link>
      <pubDate>Sun, 31 Dec 2023 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Undated</title>
      <link>https://example.com/undated</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_and_cleans_entries() {
        let fetched_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let items = FeedParser::new(10, 2000).parse(RSS, &source(), fetched_at).unwrap();

        assert_eq!(items.len(), 3);

        let undated = &items[0];
        assert_eq!(undated.link, "https://example.com/undated");
        assert_eq!(undated.published_at, fetched_at);

        let newer = &items[1];
        assert_eq!(newer.title, "Newer story");
        assert_eq!(newer.content, "Full body");
        assert_eq!(newer.summary, "Teaser");
        assert_eq!(newer.author.as_deref(), Some("Jane Doe"));
        assert_eq!(newer.source, "Example");

        let older = &items[2];
        assert_eq!(older.title, "Older story");
        assert_eq!(older.summary, "Short & sweet");
        assert_eq!(older.content, older.summary);
        assert!(older.author.is_none());
    }

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let fetched_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let items = FeedParser::new(2, 2000).parse(RSS, &source(), fetched_at).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].link, "https://example.com/newer");
    }

    #[test]
    fn repeated_link_keeps_newest_entry() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
  <item><title>First draft</title><link>https://example.com/a</link><pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate></item>
  <item><title>Updated</title><link>https://example.com/a</link><pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate></item>
</channel></rss>"#;
        let items = FeedParser::new(10, 2000).parse(rss, &source(), Utc::now()).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Updated");
    }

    #[test]
    fn rejects_garbage() {
        let result = FeedParser::new(10, 2000).parse("not a feed", &source(), Utc::now());
        assert!(matches!(result, Err(RelayError::Parse(_))));
    }
}
