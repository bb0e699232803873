use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

/// Minimum byte position for a token-boundary cut; below this we hard-cut
/// instead, so a single long leading word cannot shrink the summary to nothing.
const MIN_BREAK_POS: usize = 40;

static IMG_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img[^>]+src\s*=\s*["']?([^"'\s>]+)"#).unwrap());

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]{4,}").unwrap());

/// Collapse all runs of whitespace to single spaces and trim the ends.
pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reduce markup to its visible text, whitespace-collapsed.
pub fn strip_html(markup: &str) -> String {
    let fragment = Html::parse_fragment(markup);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_ws(&text)
}

/// Cut `text` to at most `max` characters, preferring the last space past
/// `MIN_BREAK_POS`, and append an ellipsis. Text at or under the limit is
/// returned unchanged.
pub fn truncate_at_boundary(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let sliced: String = text.chars().take(max - 1).collect();
    let cut = match sliced.rfind(' ') {
        Some(pos) if pos > MIN_BREAK_POS => pos,
        _ => sliced.len(),
    };
    let mut out = sliced[..cut].trim_end().to_string();
    out.push('…');
    out
}

/// Pull the first `<img src=...>` URL out of raw markup, if any.
pub fn sniff_img_src(markup: &str) -> Option<String> {
    IMG_SRC_RE
        .captures(markup)
        .map(|caps| caps[1].to_string())
        .filter(|src| !src.is_empty())
}

/// Lowercased runs of letters, length >= 4, in order of appearance.
pub fn letter_tokens(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}
