mod aggregate;
mod cli;
mod fetch;
mod models;
mod normalize;
mod output;
mod text;

use aggregate::Aggregator;
use clap::Parser;
use cli::Cli;
use models::{FeedSource, FeedsFile, default_sources};
use std::collections::HashSet;
use std::error::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    let start = std::time::Instant::now();

    let sources = match &args.feeds {
        Some(path) => load_feeds_file(path)?,
        None => default_sources(),
    };

    let mut aggregator = Aggregator::new();
    aggregator.load(&sources).await;

    if !args.source.is_empty() {
        let selected: HashSet<String> = args.source.iter().cloned().collect();
        aggregator.set_source_filter(&selected);
    }

    if !aggregator.has_stories() {
        println!("No stories could be loaded.");
        return Ok(());
    }

    let snapshot = aggregator.snapshot();
    if let Some(path) = &args.json_output {
        output::write_snapshot(&snapshot, path).await?;
    }
    output::print_digest(&snapshot);

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Load cycle complete"
    );
    Ok(())
}

/// Read the feed list from a YAML file, dropping entries whose URL does not
/// parse.
fn load_feeds_file(path: &str) -> Result<Vec<FeedSource>, Box<dyn Error>> {
    let contents = std::fs::read_to_string(path)?;
    let parsed: FeedsFile = serde_yaml::from_str(&contents)?;

    let feeds: Vec<FeedSource> = parsed
        .feeds
        .into_iter()
        .filter(|feed| match Url::parse(&feed.url) {
            Ok(_) => true,
            Err(e) => {
                warn!(url = %feed.url, error = %e, "Dropping feed with invalid URL");
                false
            }
        })
        .collect();

    if feeds.is_empty() {
        return Err("feeds file contains no usable feeds".into());
    }
    Ok(feeds)
}
