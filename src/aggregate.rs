use crate::fetch;
use crate::models::{
    Article, CategoryBucket, DigestSnapshot, FeedSource, GENERAL_BUCKET, TrendingKeyword,
};
use crate::normalize;
use crate::text::letter_tokens;
use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use tracing::{error, info, instrument};

const FETCH_CONCURRENCY: usize = 8;

/// How many ranked keywords the digest exposes.
const TRENDING_LIMIT: usize = 10;

/// How many recent members each bucket carries in the snapshot.
const BUCKET_MEMBER_LIMIT: usize = 6;

/// Tokens never surfaced as trending: source brands, locale names, and common
/// filler. A curated constant, not a linguistic rule.
const STOPWORDS: &[&str] = &[
    // brands and locale
    "times", "india", "hindustan", "hindu", "news", "bengaluru", "bangalore", "karnataka", "city",
    // filler
    "this", "that", "with", "from", "have", "will", "been", "were", "their", "would", "about",
    "into", "also", "after", "over", "more", "said", "says", "when", "where", "which", "while",
    "than", "your", "they", "them", "there", "what", "being", "during", "against", "could",
    "should", "other", "some", "such", "only", "just", "like", "most", "many", "much", "very",
    "here", "between", "because", "before", "under", "amid",
];

/// Owns the process-wide article state and its derived views.
///
/// Only `load` and `set_source_filter` mutate anything; both take `&mut self`
/// and do all mutation after every await point has resolved, so no reader can
/// observe a half-updated aggregate.
#[derive(Debug, Default)]
pub struct Aggregator {
    all_articles: Vec<Article>,
    filtered_articles: Vec<Article>,
    buckets: Vec<CategoryBucket>,
    trending: Vec<TrendingKeyword>,
    selected_sources: HashSet<String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch and normalize every source, merge, sort newest-first with
    /// undated articles last, and recompute every derived view with the full
    /// source set selected. A failed feed contributes zero articles.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn load(&mut self, sources: &[FeedSource]) {
        let per_feed: Vec<Vec<Article>> = stream::iter(sources.to_vec())
            .map(|source| async move {
                match load_feed(&source).await {
                    Ok(articles) => {
                        info!(
                            source = %source.source_name,
                            count = articles.len(),
                            "Feed loaded"
                        );
                        articles
                    }
                    Err(e) => {
                        error!(
                            source = %source.source_name,
                            error = %e,
                            "Feed failed; contributing no articles"
                        );
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut merged: Vec<Article> = per_feed.into_iter().flatten().collect();
        merged.sort_by(compare_recency);

        info!(total = merged.len(), "Merged and sorted article set");
        self.all_articles = merged;

        let full: HashSet<String> = sources.iter().map(|s| s.source_name.clone()).collect();
        self.set_source_filter(&full);
    }

    /// Recompute the filtered sequence and every derived view from it.
    /// Order from `all_articles` is preserved; the unfiltered set is untouched.
    pub fn set_source_filter(&mut self, selected: &HashSet<String>) {
        self.selected_sources = selected.clone();
        self.filtered_articles = self
            .all_articles
            .iter()
            .filter(|a| selected.contains(&a.source_name))
            .cloned()
            .collect();
        self.buckets = build_category_buckets(&self.filtered_articles);
        self.trending = extract_trending_keywords(&self.filtered_articles);
    }

    /// False only in the "no stories" condition, the single consumer-visible
    /// failure mode.
    pub fn has_stories(&self) -> bool {
        !self.all_articles.is_empty()
    }

    pub fn all_articles(&self) -> &[Article] {
        &self.all_articles
    }

    pub fn filtered_articles(&self) -> &[Article] {
        &self.filtered_articles
    }

    pub fn buckets(&self) -> &[CategoryBucket] {
        &self.buckets
    }

    pub fn trending(&self) -> &[TrendingKeyword] {
        &self.trending
    }

    pub fn snapshot(&self) -> DigestSnapshot {
        DigestSnapshot {
            total: self.filtered_articles.len(),
            articles: self.filtered_articles.clone(),
            buckets: self.buckets.clone(),
            trending: self.trending.clone(),
        }
    }
}

/// Fetch one source through the relay and normalize its items.
pub async fn load_feed(source: &FeedSource) -> Result<Vec<Article>, Box<dyn Error>> {
    let xml = fetch::fetch_feed_document(&source.url).await?;
    Ok(normalize::parse_feed(&xml, source))
}

/// Newest first; articles without a date sort after all dated ones and keep
/// their input order (the sort is stable and `None` pairs compare equal).
fn compare_recency(a: &Article, b: &Article) -> Ordering {
    match (a.pub_date, b.pub_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// File each article under its own labels, or under "General" when it has
/// none. Buckets rank by member count descending (ties keep first-appearance
/// order) and singleton buckets are suppressed as non-trending.
pub fn build_category_buckets(articles: &[Article]) -> Vec<CategoryBucket> {
    let mut label_order = Vec::<String>::new();
    let mut members = HashMap::<String, Vec<Article>>::new();

    for article in articles {
        let labels: Vec<&str> = if article.categories.is_empty() {
            vec![GENERAL_BUCKET]
        } else {
            article.categories.iter().map(String::as_str).collect()
        };
        for label in labels {
            if !members.contains_key(label) {
                label_order.push(label.to_string());
            }
            members
                .entry(label.to_string())
                .or_default()
                .push(article.clone());
        }
    }

    let mut buckets: Vec<CategoryBucket> = label_order
        .into_iter()
        .filter_map(|label| {
            let all = members.remove(&label)?;
            if all.len() < 2 {
                return None;
            }
            Some(CategoryBucket {
                label,
                count: all.len(),
                members: all.into_iter().take(BUCKET_MEMBER_LIMIT).collect(),
            })
        })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets
}

/// Rank the most frequent qualifying tokens across titles and raw
/// descriptions. A naive frequency count by design; ties break by first
/// occurrence in the concatenated text.
pub fn extract_trending_keywords(articles: &[Article]) -> Vec<TrendingKeyword> {
    let mut text = String::new();
    for article in articles {
        text.push_str(&article.title);
        text.push(' ');
        text.push_str(&article.raw_description);
        text.push(' ');
    }

    let mut counts = HashMap::<String, (usize, usize)>::new();
    for (position, token) in letter_tokens(&text).into_iter().enumerate() {
        if STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        let entry = counts.entry(token).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(TRENDING_LIMIT);

    ranked
        .into_iter()
        .map(|(token, count, _)| TrendingKeyword { token, count })
        .collect()
}
