//! Text cleaning applied to feed content before it reaches any other stage.

use regex::Regex;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static MARKUP_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9-]*)[^>]*?(/?)>").unwrap());

/// Longest entity we back off from when a cut lands inside one.
const MAX_ENTITY_LEN: usize = 10;

/// Decoded in this order, so `&amp;lt;` ends up as `<`.
const ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&nbsp;", " "),
    ("&mdash;", "\u{2014}"),
    ("&ndash;", "\u{2013}"),
];

/// Strip tags, collapse whitespace, decode the entity table and cap at `max_chars`.
pub fn clean_html(html: &str, max_chars: usize) -> String {
    if html.is_empty() {
        return String::new();
    }

    let stripped = TAG_RE.replace_all(html, " ");
    let collapsed = WS_RE.replace_all(&stripped, " ");
    let mut text = collapsed.trim().to_string();

    for (entity, replacement) in ENTITIES {
        text = text.replace(entity, replacement);
    }

    truncate_chars(&text, max_chars)
}

/// Collapse whitespace runs into single spaces.
pub fn clean_text(text: &str) -> String {
    WS_RE.replace_all(text, " ").trim().to_string()
}

/// Truncate on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Truncate HTML to at most `max_chars` without leaving a broken tag or
/// entity at the cut, closing any tags the cut left open.
pub fn truncate_html(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }

    let mut budget = max_chars;
    loop {
        let truncated = truncate_chars(text, budget);
        let cut = trim_partial_markup(&truncated);
        let closers: String = open_tags(cut).iter().rev().map(|tag| format!("</{}>", tag)).collect();

        let total = char_len(cut) + char_len(&closers);
        if total <= max_chars {
            return format!("{}{}", cut, closers);
        }
        budget = budget.saturating_sub(total - max_chars);
    }
}

fn trim_partial_markup(text: &str) -> &str {
    let mut text = text;
    if let Some(lt) = text.rfind('<') {
        if !text[lt..].contains('>') {
            text = &text[..lt];
        }
    }
    if let Some(amp) = text.rfind('&') {
        let tail = &text[amp..];
        if !tail.contains(';') && tail.len() <= MAX_ENTITY_LEN && !tail.contains(char::is_whitespace) {
            text = &text[..amp];
        }
    }
    text
}

/// Tags opened and not yet closed, outermost first.
fn open_tags(html: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    for cap in MARKUP_TAG_RE.captures_iter(html) {
        let name = cap[2].to_ascii_lowercase();
        if &cap[1] == "/" {
            if let Some(pos) = stack.iter().rposition(|open| *open == name) {
                stack.truncate(pos);
            }
        } else if cap[3].is_empty() && name != "br" {
            stack.push(name);
        }
    }
    stack
}
