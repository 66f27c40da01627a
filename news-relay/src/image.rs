//! Best-effort discovery of an article's representative image.

use crate::traits::PageClient;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};
use url::Url;

static META_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)([A-Za-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];
const IMAGE_HOSTS: &[&str] = &["imgur", "cloudinary", "wp.com", "medium.com", "cdn"];
const IMAGE_KEYWORDS: &[&str] = &["image", "img", "photo", "media", "upload"];

/// Property names checked in priority order.
const IMAGE_PROPERTIES: &[&str] = &["og:image", "twitter:image"];

/// Strategy for pulling an image candidate out of an HTML prefix.
pub trait ImageLocator: Send + Sync {
    fn locate(&self, html: &str) -> Option<String>;
}

/// Scans `<meta>` tags without building a DOM. Attribute order does not
/// matter and the document may be cut off anywhere.
#[derive(Debug, Default, Clone)]
pub struct MetaTagScanner;

impl MetaTagScanner {
    fn meta_attributes(html: &str) -> Vec<HashMap<String, String>> {
        META_TAG_RE
            .find_iter(html)
            .map(|tag| {
                ATTR_RE
                    .captures_iter(tag.as_str())
                    .filter_map(|cap| {
                        let name = cap.get(1)?.as_str().to_ascii_lowercase();
                        let value = cap.get(2).or_else(|| cap.get(3))?.as_str().trim().to_string();
                        Some((name, value))
                    })
                    .collect()
            })
            .collect()
    }
}

impl ImageLocator for MetaTagScanner {
    fn locate(&self, html: &str) -> Option<String> {
        let tags = Self::meta_attributes(html);

        IMAGE_PROPERTIES.iter().find_map(|wanted| {
            tags.iter().find_map(|attrs| {
                let key = attrs.get("property").or_else(|| attrs.get("name"))?;
                if !key.eq_ignore_ascii_case(wanted) {
                    return None;
                }
                attrs
                    .get("content")
                    .filter(|content| !content.is_empty())
                    .map(|content| content.replace("&amp;", "&"))
            })
        })
    }
}

pub struct ImageResolver {
    client: Arc<dyn PageClient>,
    locator: Box<dyn ImageLocator>,
    max_bytes: usize,
}

impl ImageResolver {
    pub fn new(client: Arc<dyn PageClient>, max_bytes: usize) -> Self {
        Self::with_locator(client, Box::new(MetaTagScanner), max_bytes)
    }

    pub fn with_locator(client: Arc<dyn PageClient>, locator: Box<dyn ImageLocator>, max_bytes: usize) -> Self {
        Self {
            client,
            locator,
            max_bytes,
        }
    }

    /// Absolute image URL for `page_url`, or `None`. Never fails: any fetch
    /// problem or rejected candidate just means "no image".
    pub async fn extract(&self, page_url: &str) -> Option<String> {
        let html = match self.client.fetch_prefix(page_url, self.max_bytes).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Image lookup failed for {}: {}", page_url, e);
                return None;
            }
        };

        let candidate = match self.locator.locate(&html) {
            Some(candidate) => candidate,
            None => {
                debug!("No image meta tag on {}", page_url);
                return None;
            }
        };

        let absolute = match resolve_url(page_url, &candidate) {
            Some(url) => url,
            None => {
                debug!("Unresolvable image reference {:?} on {}", candidate, page_url);
                return None;
            }
        };

        if is_probable_image_url(&absolute) {
            Some(absolute)
        } else {
            debug!("Rejected image candidate {}", absolute);
            None
        }
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

fn resolve_url(page_url: &str, candidate: &str) -> Option<String> {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return Some(candidate.to_string());
    }
    Url::parse(page_url).and_then(|base| base.join(candidate)).ok().map(String::from)
}

/// Heuristic: an image extension, a known image host, or an image-ish word.
pub fn is_probable_image_url(url: &str) -> bool {
    if url.len() < 10 {
        return false;
    }
    let lower = url.to_lowercase();

    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(ext) || lower.contains(&format!("{ext}?")))
        || IMAGE_HOSTS.iter().any(|host| lower.contains(host))
        || IMAGE_KEYWORDS.iter().any(|word| lower.contains(word))
}
