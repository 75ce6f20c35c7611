//! Region, magnitude and time-window filters.
//!
//! `FilterState` is the user-controlled part of a load cycle; `BBox` is the
//! fixed region of interest.

use chrono::{DateTime, Duration, Months, Utc};

/// Bounding box for geographic filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// The Philippine area of responsibility, approximated as a rectangle.
pub const PH_BOUNDS: BBox = BBox {
    min_lat: 4.0,
    min_lon: 116.0,
    max_lat: 21.0,
    max_lon: 135.0,
};

impl Default for BBox {
    fn default() -> Self {
        PH_BOUNDS
    }
}

impl std::str::FromStr for BBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(format!(
                "bbox requires 4 values (minlat,minlon,maxlat,maxlon), got {}",
                parts.len()
            ));
        }

        let vals: Result<Vec<f64>, _> = parts.iter().map(|p| p.trim().parse::<f64>()).collect();
        let vals = vals.map_err(|e| format!("invalid number in bbox: {e}"))?;

        let bbox = Self {
            min_lat: vals[0],
            min_lon: vals[1],
            max_lat: vals[2],
            max_lon: vals[3],
        };

        for lat in [bbox.min_lat, bbox.max_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(format!("latitude {lat} out of range [-90, 90]"));
            }
        }
        for lon in [bbox.min_lon, bbox.max_lon] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(format!("longitude {lon} out of range [-180, 180]"));
            }
        }
        if bbox.min_lat > bbox.max_lat {
            return Err(format!(
                "min_lat {} must be <= max_lat {}",
                bbox.min_lat, bbox.max_lat
            ));
        }
        if bbox.min_lon > bbox.max_lon {
            return Err(format!(
                "min_lon {} must be <= max_lon {}",
                bbox.min_lon, bbox.max_lon
            ));
        }

        Ok(bbox)
    }
}

impl std::fmt::Display for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

impl BBox {
    /// Check if a point is within the bounding box (edges included).
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Center of the box, used as the initial camera target.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// Inclusive magnitude range, written `min-max` (e.g. `4-4.9`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnitudeRange {
    pub min: f64,
    pub max: f64,
}

impl MagnitudeRange {
    /// Everything the feeds can report.
    pub const ALL: Self = Self {
        min: 0.0,
        max: 10.0,
    };

    #[must_use]
    pub fn contains(&self, magnitude: f64) -> bool {
        magnitude >= self.min && magnitude <= self.max
    }
}

impl Default for MagnitudeRange {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::str::FromStr for MagnitudeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .split_once('-')
            .ok_or_else(|| format!("magnitude range must be min-max, got '{s}'"))?;
        let min: f64 = min
            .trim()
            .parse()
            .map_err(|e| format!("invalid minimum magnitude: {e}"))?;
        let max: f64 = max
            .trim()
            .parse()
            .map_err(|e| format!("invalid maximum magnitude: {e}"))?;
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(format!("invalid magnitude range {min}-{max}"));
        }
        Ok(Self { min, max })
    }
}

impl std::fmt::Display for MagnitudeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// How far back a load cycle looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl TimeWindow {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Label used in the quake-count line.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hour => "Last Hour",
            Self::Day => "Last Day",
            Self::Week => "Last Week",
            Self::Month => "Last Month",
        }
    }

    /// Start of the window ending at `end`. A month is one calendar month.
    #[must_use]
    pub fn start_from(self, end: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Hour => end - Duration::hours(1),
            Self::Day => end - Duration::days(1),
            Self::Week => end - Duration::days(7),
            Self::Month => end
                .checked_sub_months(Months::new(1))
                .unwrap_or_else(|| end - Duration::days(30)),
        }
    }
}

impl std::str::FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            _ => Err(format!(
                "unknown time window: {s} (expected: hour, day, week, month)"
            )),
        }
    }
}

/// User-selected filters, read at the start of every load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterState {
    pub magnitude: MagnitudeRange,
    pub window: TimeWindow,
}

impl FilterState {
    /// Legend click: select `band`, or go back to everything if it is
    /// already selected.
    pub fn toggle_band(&mut self, band: MagnitudeRange) {
        self.magnitude = if self.magnitude == band {
            MagnitudeRange::ALL
        } else {
            band
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bbox_parse() {
        let bbox: BBox = "4,116,21,135".parse().unwrap();
        assert_eq!(bbox, PH_BOUNDS);
        assert!("4,116,21".parse::<BBox>().is_err());
        assert!("21,116,4,135".parse::<BBox>().is_err());
        assert_eq!(PH_BOUNDS.to_string(), "4,116,21,135");
    }

    #[test]
    fn test_bbox_contains_edges() {
        assert!(PH_BOUNDS.contains(4.0, 116.0));
        assert!(PH_BOUNDS.contains(21.0, 135.0));
        assert!(PH_BOUNDS.contains(14.6, 121.0)); // Manila
        assert!(!PH_BOUNDS.contains(21.0001, 121.0));
        assert!(!PH_BOUNDS.contains(10.0, 115.9999));
    }

    #[test]
    fn test_magnitude_range() {
        let range: MagnitudeRange = "4-4.9".parse().unwrap();
        assert!(range.contains(4.0));
        assert!(range.contains(4.9));
        assert!(!range.contains(4.95));
        assert!(!range.contains(3.99));
        assert!("5-4".parse::<MagnitudeRange>().is_err());
        assert!("five".parse::<MagnitudeRange>().is_err());
    }

    #[test]
    fn test_time_window_start() {
        let end = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        assert_eq!(
            TimeWindow::Hour.start_from(end),
            Utc.with_ymd_and_hms(2024, 3, 31, 11, 0, 0).unwrap()
        );
        assert_eq!(
            TimeWindow::Week.start_from(end),
            Utc.with_ymd_and_hms(2024, 3, 24, 12, 0, 0).unwrap()
        );
        // calendar month, clamped to the end of February
        assert_eq!(
            TimeWindow::Month.start_from(end),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_toggle_band() {
        let mut filter = FilterState::default();
        let band = MagnitudeRange { min: 5.0, max: 5.9 };

        filter.toggle_band(band);
        assert_eq!(filter.magnitude, band);

        filter.toggle_band(band);
        assert_eq!(filter.magnitude, MagnitudeRange::ALL);
    }
}
