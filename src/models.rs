//! Data models for upstream feed payloads and the canonical event record.
//!
//! Both upstream feeds (USGS FDSN GeoJSON and EMSC seismicportal JSON) are
//! GeoJSON-shaped feature collections, but they disagree on field names,
//! time encoding and depth sign. The raw structures here are deliberately
//! tolerant; `FeedFeature::normalize` turns them into a `RawRecord`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::QuakeError;
use crate::map::MarkerId;

/// Place label used when a source gives none.
pub const UNKNOWN_PLACE: &str = "Unknown Location";

/// Originating feed of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Agency {
    Usgs,
    Emsc,
}

impl Agency {
    /// Display tag for this agency.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usgs => "USGS",
            Self::Emsc => "EMSC",
        }
    }

    /// Whether this agency labels places with upper-case region codes.
    #[must_use]
    pub const fn emits_region_codes(self) -> bool {
        matches!(self, Self::Emsc)
    }
}

impl std::fmt::Display for Agency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (latitude, longitude) pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLon {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLon {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::str::FromStr for LatLon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 2 {
            return Err(format!(
                "location requires 2 values (lat,lon), got {}",
                parts.len()
            ));
        }

        let vals: Result<Vec<f64>, _> = parts.iter().map(|p| p.trim().parse::<f64>()).collect();
        let vals = vals.map_err(|e| format!("invalid number in location: {e}"))?;

        if !(-90.0..=90.0).contains(&vals[0]) {
            return Err(format!("latitude {} out of range [-90, 90]", vals[0]));
        }
        if !(-180.0..=180.0).contains(&vals[1]) {
            return Err(format!("longitude {} out of range [-180, 180]", vals[1]));
        }

        Ok(Self::new(vals[0], vals[1]))
    }
}

// ============================================================================
// Upstream payloads
// ============================================================================

/// Top-level feature collection returned by either feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedCollection {
    /// "FeatureCollection" when present
    #[serde(rename = "type", default)]
    pub type_: Option<String>,

    /// Earthquake events
    pub features: Vec<FeedFeature>,
}

impl FeedCollection {
    /// A collection with no events.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            type_: None,
            features: Vec::new(),
        }
    }

    /// Normalize every feature, tagging each with `agency`.
    #[must_use]
    pub fn into_records(self, agency: Agency) -> Vec<RawRecord> {
        self.features
            .into_iter()
            .enumerate()
            .map(|(i, f)| f.normalize(agency, i))
            .collect()
    }

    /// Validate the response structure.
    pub fn validate(&self) -> Result<(), QuakeError> {
        match self.type_.as_deref() {
            None | Some("FeatureCollection") => Ok(()),
            Some(other) => Err(QuakeError::InvalidResponse(format!(
                "expected type 'FeatureCollection', got '{other}'"
            ))),
        }
    }
}

/// A single upstream event.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedFeature {
    /// Source-specific identifier
    #[serde(default)]
    pub id: Option<String>,

    /// Point geometry; absent on malformed records
    #[serde(default)]
    pub geometry: Option<Geometry>,

    /// Event properties
    #[serde(default)]
    pub properties: FeedProperties,
}

/// Point geometry: `[longitude, latitude, depth?]`.
#[derive(Debug, Clone, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub coordinates: Option<Vec<Option<f64>>>,
}

/// Properties shared (loosely) by USGS and EMSC.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedProperties {
    /// Magnitude; EMSC occasionally sends it as text
    #[serde(default)]
    pub mag: Option<Numeric>,

    /// USGS place description
    #[serde(default)]
    pub place: Option<String>,

    /// EMSC Flinn-Engdahl region name (upper case)
    #[serde(default)]
    pub flynn_region: Option<String>,

    /// Epoch ms (USGS) or ISO-8601 (EMSC)
    #[serde(default)]
    pub time: Option<TimeValue>,

    /// EMSC depth in km, used when coordinates carry none
    #[serde(default)]
    pub depth: Option<f64>,

    /// USGS event page URL
    #[serde(default)]
    pub url: Option<String>,

    /// EMSC unique id
    #[serde(default)]
    pub unid: Option<String>,
}

/// A number that may arrive as a JSON number or string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    /// Finite numeric value, if any.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        let v = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

/// Event time in either source encoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Millis(f64),
    Text(String),
}

impl TimeValue {
    /// Epoch milliseconds, if the value is a finite instant.
    #[must_use]
    pub fn epoch_millis(&self) -> Option<i64> {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Self::Millis(ms) => ms.is_finite().then(|| ms.round() as i64),
            Self::Text(s) => parse_iso_millis(s),
        }
    }
}

/// Parse an ISO-8601 instant. Strings without a zone are taken as UTC.
#[must_use]
pub fn parse_iso_millis(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

impl FeedFeature {
    /// Normalize into a `RawRecord` tagged with `agency`.
    ///
    /// `index` is used to synthesize an id when the source omits one.
    #[must_use]
    pub fn normalize(self, agency: Agency, index: usize) -> RawRecord {
        let coords = self
            .geometry
            .and_then(|g| g.coordinates)
            .unwrap_or_default();

        let location = match (coords.first().copied().flatten(), coords.get(1).copied().flatten()) {
            (Some(lon), Some(lat)) if lon.is_finite() && lat.is_finite() => {
                Some(LatLon::new(lat, lon))
            }
            _ => None,
        };

        let props = self.properties;
        let depth_km = coords
            .get(2)
            .copied()
            .flatten()
            .filter(|d| d.is_finite() && *d != 0.0)
            .or(props.depth.filter(|d| d.is_finite()))
            .unwrap_or(0.0)
            .abs();

        let place = props
            .place
            .filter(|p| !p.is_empty())
            .or(props.flynn_region.filter(|p| !p.is_empty()))
            .unwrap_or_else(|| UNKNOWN_PLACE.to_string());

        let detail_url = match agency {
            Agency::Usgs => props.url.unwrap_or_default(),
            Agency::Emsc => String::new(),
        };

        let id = self
            .id
            .or(props.unid)
            .unwrap_or_else(|| format!("{}-{index}", agency.as_str().to_lowercase()));

        RawRecord {
            id,
            agency,
            time: props.time.as_ref().and_then(TimeValue::epoch_millis),
            magnitude: props.mag.as_ref().and_then(Numeric::value),
            depth_km,
            location,
            place,
            detail_url,
        }
    }
}

// ============================================================================
// Normalized records
// ============================================================================

/// An adapter's normalized record, before validation and reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub agency: Agency,
    /// Epoch ms; `None` when the source time was missing or unparsable
    pub time: Option<i64>,
    pub magnitude: Option<f64>,
    /// Non-negative depth in km
    pub depth_km: f64,
    /// `None` when the record has no usable geometry
    pub location: Option<LatLon>,
    pub place: String,
    /// Empty when the source has no detail page
    pub detail_url: String,
}

/// A seismic event in the working set.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    /// Epoch milliseconds
    pub time: i64,
    pub magnitude: f64,
    pub depth_km: f64,
    pub location: LatLon,
    pub place: String,
    pub detail_url: String,
    pub agency: Agency,
    /// Presentation handle; not part of the event's identity
    pub marker: Option<MarkerId>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.time == other.time
            && self.magnitude == other.magnitude
            && self.depth_km == other.depth_km
            && self.location == other.location
            && self.place == other.place
            && self.detail_url == other.detail_url
            && self.agency == other.agency
    }
}

impl Event {
    /// Get the event time as a `DateTime<Utc>`.
    #[must_use]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.time).single()
    }
}

/// Simplified event for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputEvent {
    pub id: String,
    pub time: String,
    pub time_ms: i64,
    pub magnitude: f64,
    pub depth_km: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub place: String,
    pub url: Option<String>,
    pub agency: Agency,
}

impl From<&Event> for OutputEvent {
    fn from(e: &Event) -> Self {
        Self {
            id: e.id.clone(),
            time: e
                .datetime()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".into()),
            time_ms: e.time,
            magnitude: e.magnitude,
            depth_km: e.depth_km,
            latitude: e.location.latitude,
            longitude: e.location.longitude,
            place: e.place.clone(),
            url: (!e.detail_url.is_empty()).then(|| e.detail_url.clone()),
            agency: e.agency,
        }
    }
}
