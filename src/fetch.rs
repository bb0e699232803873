use once_cell::sync::Lazy;
use rand::{Rng, rng};
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// CORS relay that fetches an arbitrary URL server-side and hands the body
/// back inside a JSON envelope.
pub const RELAY_ENDPOINT: &str = "https://api.allorigins.win/get";

const MAX_RETRIES: usize = 2;
const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(30);

static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
            "AppleWebKit/537.36 (KHTML, like Gecko) ",
            "Chrome/127.0.0.0 Safari/537.36"
        ))
        .timeout(Duration::from_secs(20))
        .pool_idle_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("failed to build reqwest client")
});

/// Relay response envelope. Only `contents` matters; the relay's status
/// metadata and anything else it adds are ignored.
#[derive(Debug, Deserialize)]
struct RelayEnvelope {
    #[serde(default)]
    contents: Option<String>,
}

/// Build the relay request URL for a feed endpoint.
pub fn relay_url(feed_url: &str) -> String {
    format!("{}?url={}", RELAY_ENDPOINT, urlencoding::encode(feed_url))
}

/// Fetch one feed's raw XML through the relay.
///
/// Retries transient failures with exponential backoff plus jitter; after the
/// retry budget is spent the error propagates so the caller can count the feed
/// out without failing the batch.
#[instrument(level = "info", skip_all, fields(%feed_url))]
pub async fn fetch_feed_document(feed_url: &str) -> Result<String, Box<dyn Error>> {
    let mut attempt = 0usize;

    loop {
        match fetch_once(feed_url).await {
            Ok(xml) => return Ok(xml),
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(e);
                }

                let mut delay = BASE_DELAY.saturating_mul(1 << (attempt - 1));
                if delay > MAX_DELAY {
                    delay = MAX_DELAY;
                }
                let jitter_ms: u64 = rng().random_range(0..=250);
                let delay = delay + Duration::from_millis(jitter_ms);

                warn!(
                    attempt,
                    max = MAX_RETRIES,
                    ?delay,
                    error = %e,
                    "relay fetch failed; backing off"
                );
                sleep(delay).await;
            }
        }
    }
}

async fn fetch_once(feed_url: &str) -> Result<String, Box<dyn Error>> {
    let res = CLIENT
        .get(relay_url(feed_url))
        .send()
        .await?
        .error_for_status()?;

    let envelope: RelayEnvelope = res.json().await?;
    let contents = envelope
        .contents
        .filter(|c| !c.trim().is_empty())
        .ok_or("relay envelope missing contents")?;

    debug!(bytes = contents.len(), "relay envelope decoded");
    Ok(contents)
}
