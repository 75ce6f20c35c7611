//! Dashboard configuration.
//!
//! Everything a session needs to start, with defaults for the Philippine
//! dashboard. Built from the command line in `main`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tracing::debug;

use crate::bands::ColorScheme;
use crate::client::FeedClient;
use crate::errors::QuakeError;
use crate::filters::{BBox, FilterState, PH_BOUNDS};
use crate::map::Basemap;
use crate::models::LatLon;
use crate::proximity::{DeniedLocator, FixedLocator, Geolocator};

/// Default time between automatic reloads.
pub const DEFAULT_REFRESH_SECS: u64 = 60;

/// Reloads are never more frequent than this.
pub const MIN_REFRESH_SECS: u64 = 30;

/// Philippine time.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Zoom level the map starts at.
pub const INITIAL_ZOOM: f64 = 5.0;

/// Plate boundaries (PB2002) in GeoJSON.
pub const DEFAULT_PLATES_URL: &str =
    "https://raw.githubusercontent.com/fraxen/tectonicplates/master/GeoJSON/PB2002_boundaries.json";

/// What a colour-scheme change does to the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemeChangePolicy {
    /// Recolour bands, table and legend in place
    Recolor,
    /// Start a new load cycle
    #[default]
    Reload,
}

impl std::str::FromStr for SchemeChangePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recolor" => Ok(Self::Recolor),
            "reload" => Ok(Self::Reload),
            _ => Err(format!("unknown scheme policy: {s} (expected: recolor, reload)")),
        }
    }
}

/// Where plate-boundary GeoJSON comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatesSource {
    Url(String),
    File(PathBuf),
}

impl Default for PlatesSource {
    fn default() -> Self {
        Self::Url(DEFAULT_PLATES_URL.to_string())
    }
}

impl std::str::FromStr for PlatesSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("plates source must not be empty".to_string());
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(Self::Url(s.to_string()))
        } else {
            Ok(Self::File(PathBuf::from(s)))
        }
    }
}

impl PlatesSource {
    /// Load the GeoJSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the download or file read fails, or the content
    /// is not JSON.
    pub async fn load(&self, client: &FeedClient) -> Result<serde_json::Value, QuakeError> {
        match self {
            Self::Url(url) => client.get_json(url).await,
            Self::File(path) => {
                debug!(path = %path.display(), "reading plate boundaries");
                let text = tokio::fs::read_to_string(path).await?;
                Ok(serde_json::from_str(&text)?)
            }
        }
    }
}

/// How the user's position is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LocationSource {
    /// No geolocation capability
    #[default]
    Unsupported,
    /// A fixed position granted on request
    Fixed(LatLon),
    /// Every request is refused
    Denied,
}

impl LocationSource {
    /// The geolocator for this source, `None` when unsupported.
    #[must_use]
    pub fn geolocator(self) -> Option<Arc<dyn Geolocator>> {
        match self {
            Self::Unsupported => None,
            Self::Fixed(at) => Some(Arc::new(FixedLocator(at))),
            Self::Denied => Some(Arc::new(DeniedLocator)),
        }
    }
}

/// Parse a fixed UTC offset such as `+08:00`, `-0530`, `+8` or `Z`.
///
/// # Errors
///
/// Returns a message if the offset is malformed or out of range.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset, String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(format!("offset must start with + or -: {s}")),
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours
        .parse()
        .map_err(|e| format!("invalid offset hours in {s}: {e}"))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|e| format!("invalid offset minutes in {s}: {e}"))?;
    if !(0..60).contains(&minutes) {
        return Err(format!("offset minutes out of range in {s}"));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("offset out of range: {s}"))
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub bbox: BBox,
    pub refresh_interval: Duration,
    pub filter: FilterState,
    pub scheme: ColorScheme,
    pub scheme_policy: SchemeChangePolicy,
    pub basemap: Basemap,
    pub plates: PlatesSource,
    pub utc_offset: FixedOffset,
    pub location: LocationSource,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bbox: PH_BOUNDS,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            filter: FilterState::default(),
            scheme: ColorScheme::default(),
            scheme_policy: SchemeChangePolicy::default(),
            basemap: Basemap::default(),
            plates: PlatesSource::default(),
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            location: LocationSource::default(),
        }
    }
}

/// Clamp a refresh interval to the allowed minimum.
#[must_use]
pub fn clamp_refresh(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_REFRESH_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DashboardConfig::default();
        assert_eq!(config.bbox, PH_BOUNDS);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.scheme_policy, SchemeChangePolicy::Reload);
        assert_eq!(config.utc_offset.local_minus_utc(), 8 * 3600);
        assert!(config.location.geolocator().is_none());
    }

    #[test]
    fn test_clamp_refresh() {
        assert_eq!(clamp_refresh(5), Duration::from_secs(30));
        assert_eq!(clamp_refresh(120), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+08:00").unwrap().local_minus_utc(), 28_800);
        assert_eq!(parse_utc_offset("+8").unwrap().local_minus_utc(), 28_800);
        assert_eq!(parse_utc_offset("-0530").unwrap().local_minus_utc(), -19_800);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("08:00").is_err());
        assert!(parse_utc_offset("+08:75").is_err());
        assert!(parse_utc_offset("+30:00").is_err());
    }

    #[test]
    fn test_plates_source() {
        assert_eq!(
            "https://example.org/p.json".parse::<PlatesSource>().unwrap(),
            PlatesSource::Url("https://example.org/p.json".into())
        );
        assert_eq!(
            "data/plates.json".parse::<PlatesSource>().unwrap(),
            PlatesSource::File(PathBuf::from("data/plates.json"))
        );
    }

    #[test]
    fn test_scheme_policy_parse() {
        assert_eq!("recolor".parse::<SchemeChangePolicy>().unwrap(), SchemeChangePolicy::Recolor);
        assert!("repaint".parse::<SchemeChangePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_plates_from_file() {
        let path = std::env::temp_dir().join(format!("quakesph-plates-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"{"type":"FeatureCollection","features":[]}"#)
            .await
            .unwrap();

        let client = FeedClient::new().unwrap();
        let data = PlatesSource::File(path.clone()).load(&client).await.unwrap();
        assert_eq!(data["type"], "FeatureCollection");

        let _ = tokio::fs::remove_file(path).await;
    }
}
