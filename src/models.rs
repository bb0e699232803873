use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shown when a feed item carries no usable image in any of its media fields.
pub const PLACEHOLDER_IMAGE: &str =
    "https://images.unsplash.com/photo-1495020689067-958852a7765e?q=80&auto=format&fit=crop&w=1200";

/// Display summaries are cut at a token boundary before this many characters.
pub const MAX_SUMMARY_LEN: usize = 320;

/// At most this many category labels are kept per article.
pub const MAX_CATEGORIES: usize = 4;

/// Bucket label for articles that carry no category at all.
pub const GENERAL_BUCKET: &str = "General";

/// One configured feed endpoint plus its display label.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSource {
    pub url: String,
    pub source_name: String,
}

impl FeedSource {
    pub fn new(url: &str, source_name: &str) -> Self {
        Self {
            url: url.to_string(),
            source_name: source_name.to_string(),
        }
    }
}

/// Shape of the optional `--feeds` YAML file.
#[derive(Debug, Deserialize)]
pub struct FeedsFile {
    pub feeds: Vec<FeedSource>,
}

/// The reference deployment: three Bengaluru city-news feeds.
pub fn default_sources() -> Vec<FeedSource> {
    vec![
        FeedSource::new(
            "https://timesofindia.indiatimes.com/rssfeeds/-2128833038.cms",
            "Times of India",
        ),
        FeedSource::new(
            "https://www.hindustantimes.com/feeds/rss/cities/bengaluru-news/rssfeed.xml",
            "Hindustan Times",
        ),
        FeedSource::new(
            "https://www.thehindu.com/news/cities/bangalore/feeder/default.rss",
            "The Hindu",
        ),
    ]
}

/// A non-image media attachment (audio/video/etc), kept apart from `image`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
}

/// Canonical article record every feed item normalizes into.
///
/// `id` and `title` are always non-empty; `image` is always a resolvable URL
/// (the placeholder covers items without any media).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub link: String,
    /// HTML-stripped, whitespace-collapsed, truncated display summary.
    pub description: String,
    /// Untruncated description markup, input for keyword counting.
    pub raw_description: String,
    /// `content:encoded` when the feed supplies it, else the raw description.
    pub content_html: String,
    pub image: String,
    pub enclosure: Option<Enclosure>,
    /// `None` when the item had no parseable date; such articles sort last.
    pub pub_date: Option<DateTime<Utc>>,
    pub author: String,
    pub categories: Vec<String>,
    pub source_name: String,
    pub feed_title: String,
    pub feed_link: String,
}

/// Articles grouped under one category label, ranked by member count.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryBucket {
    pub label: String,
    pub count: usize,
    /// Most recent members, already in recency order.
    pub members: Vec<Article>,
}

/// One ranked trending token with its frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendingKeyword {
    pub token: String,
    pub count: usize,
}

/// Read-only view handed to the presentation side after a load/filter cycle.
#[derive(Debug, Serialize)]
pub struct DigestSnapshot {
    pub total: usize,
    pub articles: Vec<Article>,
    pub buckets: Vec<CategoryBucket>,
    pub trending: Vec<TrendingKeyword>,
}
