use crate::models::DigestSnapshot;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Write the digest snapshot as pretty JSON, creating parent directories.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn write_snapshot(snapshot: &DigestSnapshot, path: &str) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(snapshot)?;

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    fs::write(path, json).await?;
    info!(articles = snapshot.total, "Wrote digest snapshot");
    Ok(())
}

/// Plain-text rendering of the digest, the CLI stand-in for the presentation
/// layer.
pub fn print_digest(snapshot: &DigestSnapshot) {
    println!("{} stories\n", snapshot.total);

    for article in &snapshot.articles {
        let when = article
            .pub_date
            .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "date unknown".to_string());
        println!("[{}] {} ({})", article.source_name, article.title, when);
        if !article.description.is_empty() {
            println!("    {}", article.description);
        }
        println!("    {}", article.link);
    }

    if !snapshot.buckets.is_empty() {
        println!("\nCategories:");
        for bucket in &snapshot.buckets {
            println!("  {} ({})", bucket.label, bucket.count);
        }
    }

    if !snapshot.trending.is_empty() {
        let line = snapshot
            .trending
            .iter()
            .map(|k| k.token.as_str())
            .collect::<Vec<_>>()
            .join(" · ");
        println!("\nTrending: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_snapshot_creates_dirs() {
        let dir = std::env::temp_dir().join("news_pulse_test_snapshot");
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let path = dir.join("nested").join("digest.json");

        let snapshot = DigestSnapshot {
            total: 0,
            articles: Vec::new(),
            buckets: Vec::new(),
            trending: Vec::new(),
        };
        write_snapshot(&snapshot, path.to_str().unwrap())
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("\"total\": 0"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
