//! HTTP access to the upstream earthquake feeds.
//!
//! A single async reqwest client (rustls TLS) shared by every adapter.

use std::time::Duration;

use reqwest::header::CACHE_CONTROL;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::errors::QuakeError;
use crate::models::FeedCollection;

/// Connect timeout in seconds. Requests themselves are not time-limited;
/// a hung feed is superseded by the next load cycle.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// User agent string for API requests.
const USER_AGENT: &str = concat!("quakesph/", env!("CARGO_PKG_VERSION"));

/// Client for the feed endpoints.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    /// Create a new feed client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new() -> Result<Self, QuakeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch a feature collection.
    ///
    /// `204 No Content` (EMSC's answer to an empty query) is an empty
    /// collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the status is not a success,
    /// or the body is not a feature collection.
    #[instrument(skip(self, params))]
    pub async fn get_collection(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<FeedCollection, QuakeError> {
        debug!("fetching feed from {}", url);

        let response = self
            .client
            .get(url)
            .query(params)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        // Check status before parsing
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(FeedCollection::empty());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuakeError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = response.text().await?;
        let feed: FeedCollection = serde_json::from_str(&body)?;

        // Validate response structure
        feed.validate()?;

        debug!("fetched {} events", feed.features.len());
        Ok(feed)
    }

    /// Fetch an arbitrary JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    #[instrument(skip(self))]
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, QuakeError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuakeError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
