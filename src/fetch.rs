use std::future::Future;
use std::time::Duration;

use scraper::Html;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::FetchError;

/// A successfully loaded page. `url` is where the response came from after
/// redirects. Parsing is deferred so the body can cross await points;
/// `scraper::Html` cannot.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// Fetch a URL, get back a page. The only network seam of the crawler.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, FetchError>> + Send;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(HttpFetcher {
            client,
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.backoff_ms),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let request_err = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(request_err)?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(request_err)?;
        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }

    /// Delay before retry number `attempt + 1`: doubles each time, saturating
    /// instead of overflowing for large retry counts.
    fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Rate limiting, server errors and dropped connections are worth another try;
/// anything else (404, bad request) will not change on retry.
fn is_retryable(err: &FetchError) -> bool {
    match err {
        FetchError::Status { status, .. } => *status == 429 || *status >= 500,
        FetchError::Request { source, .. } => source.is_timeout() || source.is_connect(),
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let backoff = self.backoff_after(attempt);
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Ok(page) => {
                    debug!(url, status = page.status, bytes = page.body.len(), "fetched");
                    return Ok(page);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
