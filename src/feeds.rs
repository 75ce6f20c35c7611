//! Feed adapters.
//!
//! Each adapter knows one upstream endpoint: its query dialect, whether a
//! given query is worth sending, and how to normalize what comes back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, instrument};

use crate::client::FeedClient;
use crate::errors::QuakeError;
use crate::filters::{BBox, FilterState, MagnitudeRange};
use crate::models::{Agency, RawRecord};

/// USGS FDSN event service.
const USGS_QUERY_URL: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";

/// EMSC seismicportal FDSN event service.
const EMSC_QUERY_URL: &str = "https://www.seismicportal.eu/fdsnws/event/1/query";

/// EMSC is only queried for the small events USGS misses.
const EMSC_MAX_MAGNITUDE: f64 = 3.9;

/// Magnitudes at or above this are left to USGS.
const EMSC_CUTOFF: f64 = 4.0;

/// Row limit for EMSC queries.
const EMSC_LIMIT: u32 = 1000;

/// One load cycle's query, shared by all adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub bbox: BBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub magnitude: MagnitudeRange,
}

impl FeedQuery {
    /// Query for the window ending at `end`.
    #[must_use]
    pub fn new(bbox: BBox, filter: &FilterState, end: DateTime<Utc>) -> Self {
        Self {
            bbox,
            start: filter.window.start_from(end),
            end,
            magnitude: filter.magnitude,
        }
    }

    fn start_param(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn end_param(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// A source of earthquake records.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Agency every record from this adapter is tagged with.
    fn agency(&self) -> Agency;

    /// Fetch and normalize records for `query`.
    ///
    /// Returns `Ok(None)` when the adapter declines because the query
    /// cannot match anything it reports.
    async fn fetch(&self, query: &FeedQuery) -> Result<Option<Vec<RawRecord>>, QuakeError>;
}

/// USGS adapter. Reports every magnitude, so it never declines.
#[derive(Debug, Clone)]
pub struct UsgsFeed {
    client: Arc<FeedClient>,
    url: String,
}

impl UsgsFeed {
    #[must_use]
    pub fn new(client: Arc<FeedClient>) -> Self {
        Self {
            client,
            url: USGS_QUERY_URL.to_string(),
        }
    }

    /// Query parameters in the USGS dialect.
    #[must_use]
    pub fn params(query: &FeedQuery) -> Vec<(&'static str, String)> {
        vec![
            ("format", "geojson".to_string()),
            ("starttime", query.start_param()),
            ("endtime", query.end_param()),
            ("minlatitude", query.bbox.min_lat.to_string()),
            ("maxlatitude", query.bbox.max_lat.to_string()),
            ("minlongitude", query.bbox.min_lon.to_string()),
            ("maxlongitude", query.bbox.max_lon.to_string()),
            ("minmagnitude", "0".to_string()),
        ]
    }
}

#[async_trait]
impl FeedAdapter for UsgsFeed {
    fn agency(&self) -> Agency {
        Agency::Usgs
    }

    #[instrument(skip_all, fields(agency = "USGS"))]
    async fn fetch(&self, query: &FeedQuery) -> Result<Option<Vec<RawRecord>>, QuakeError> {
        let feed = self
            .client
            .get_collection(&self.url, &Self::params(query))
            .await?;
        Ok(Some(feed.into_records(Agency::Usgs)))
    }
}

/// EMSC adapter, limited to magnitudes below 4.
#[derive(Debug, Clone)]
pub struct EmscFeed {
    client: Arc<FeedClient>,
    url: String,
}

impl EmscFeed {
    #[must_use]
    pub fn new(client: Arc<FeedClient>) -> Self {
        Self {
            client,
            url: EMSC_QUERY_URL.to_string(),
        }
    }

    /// Whether any magnitude EMSC is asked for can pass `range`.
    #[must_use]
    pub fn covers(range: &MagnitudeRange) -> bool {
        range.min < EMSC_CUTOFF
    }

    /// Query parameters in the seismicportal dialect.
    #[must_use]
    pub fn params(query: &FeedQuery) -> Vec<(&'static str, String)> {
        vec![
            ("format", "json".to_string()),
            ("limit", EMSC_LIMIT.to_string()),
            ("starttime", query.start_param()),
            ("endtime", query.end_param()),
            ("minlat", query.bbox.min_lat.to_string()),
            ("maxlat", query.bbox.max_lat.to_string()),
            ("minlon", query.bbox.min_lon.to_string()),
            ("maxlon", query.bbox.max_lon.to_string()),
            ("minmag", "0".to_string()),
            ("maxmag", EMSC_MAX_MAGNITUDE.to_string()),
        ]
    }
}

#[async_trait]
impl FeedAdapter for EmscFeed {
    fn agency(&self) -> Agency {
        Agency::Emsc
    }

    #[instrument(skip_all, fields(agency = "EMSC"))]
    async fn fetch(&self, query: &FeedQuery) -> Result<Option<Vec<RawRecord>>, QuakeError> {
        if !Self::covers(&query.magnitude) {
            debug!(min = query.magnitude.min, "EMSC skipped for magnitude filter");
            return Ok(None);
        }

        let feed = self
            .client
            .get_collection(&self.url, &Self::params(query))
            .await?;
        Ok(Some(feed.into_records(Agency::Emsc)))
    }
}

/// The default adapter set: USGS, then EMSC.
#[must_use]
pub fn default_adapters(client: &Arc<FeedClient>) -> Vec<Arc<dyn FeedAdapter>> {
    vec![
        Arc::new(UsgsFeed::new(Arc::clone(client))),
        Arc::new(EmscFeed::new(Arc::clone(client))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{PH_BOUNDS, TimeWindow};
    use chrono::TimeZone;

    fn query(min: f64, max: f64) -> FeedQuery {
        let filter = FilterState {
            magnitude: MagnitudeRange { min, max },
            window: TimeWindow::Day,
        };
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        FeedQuery::new(PH_BOUNDS, &filter, end)
    }

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_usgs_params() {
        let params = UsgsFeed::params(&query(0.0, 10.0));
        assert_eq!(param(&params, "format"), Some("geojson"));
        assert_eq!(param(&params, "starttime"), Some("2024-05-31T12:00:00.000Z"));
        assert_eq!(param(&params, "endtime"), Some("2024-06-01T12:00:00.000Z"));
        assert_eq!(param(&params, "minlatitude"), Some("4"));
        assert_eq!(param(&params, "maxlongitude"), Some("135"));
        assert_eq!(param(&params, "minmagnitude"), Some("0"));
    }

    #[test]
    fn test_emsc_params() {
        let params = EmscFeed::params(&query(0.0, 10.0));
        assert_eq!(param(&params, "format"), Some("json"));
        assert_eq!(param(&params, "limit"), Some("1000"));
        assert_eq!(param(&params, "minlat"), Some("4"));
        assert_eq!(param(&params, "maxlon"), Some("135"));
        assert_eq!(param(&params, "maxmag"), Some("3.9"));
    }

    #[test]
    fn test_emsc_coverage() {
        assert!(EmscFeed::covers(&MagnitudeRange { min: 0.0, max: 10.0 }));
        assert!(EmscFeed::covers(&MagnitudeRange { min: 3.9, max: 3.9 }));
        assert!(!EmscFeed::covers(&MagnitudeRange { min: 4.0, max: 4.9 }));
    }

    #[tokio::test]
    async fn test_emsc_declines_without_network() {
        let client = Arc::new(FeedClient::new().unwrap());
        let feed = EmscFeed::new(client);
        let result = feed.fetch(&query(5.0, 5.9)).await.unwrap();
        assert!(result.is_none());
    }
}
