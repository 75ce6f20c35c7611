//! Cross-agency duplicate suppression.
//!
//! Agencies assign their own ids, so the same physical earthquake shows up
//! under different ids. Two reports are the same event when they are close
//! in both time and space. The seen list is scanned linearly; a load cycle
//! holds tens to low hundreds of events.

/// Reports closer than this in time may be duplicates.
pub const TIME_TOLERANCE_MS: i64 = 60_000;

/// Reports closer than this on both axes may be duplicates: 0.1 degree,
/// in micro-degrees.
pub const DEGREE_TOLERANCE_MICRO: f64 = 100_000.0;

/// Coordinate difference rounded to whole micro-degrees, so decimal inputs
/// like 14.5 and 14.6 compare as exactly 0.1 apart.
fn microdegrees_apart(a: f64, b: f64) -> f64 {
    ((a - b).abs() * 1e6).round()
}

/// The `{time, lat, lon}` triple compared between reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fingerprint {
    pub time: i64,
    pub lat: f64,
    pub lon: f64,
}

impl Fingerprint {
    /// Strictly inside every tolerance.
    #[must_use]
    pub fn is_near(&self, other: &Self) -> bool {
        self.time.abs_diff(other.time) < TIME_TOLERANCE_MS.unsigned_abs()
            && microdegrees_apart(self.lat, other.lat) < DEGREE_TOLERANCE_MICRO
            && microdegrees_apart(self.lon, other.lon) < DEGREE_TOLERANCE_MICRO
    }
}

/// Seen list for one load cycle.
#[derive(Debug, Default)]
pub struct ProximityDedup {
    /// Kept fingerprints in processing order
    seen: Vec<Fingerprint>,
    /// Total records checked (for stats)
    total_seen: u64,
    /// Total duplicates dropped
    total_dupes: u64,
}

impl ProximityDedup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a record against everything kept so far.
    ///
    /// A new record is remembered; a duplicate is not.
    pub fn check_and_mark(&mut self, fingerprint: Fingerprint) -> DedupeResult {
        self.total_seen += 1;

        if self.seen.iter().any(|s| s.is_near(&fingerprint)) {
            self.total_dupes += 1;
            return DedupeResult::Duplicate;
        }

        self.seen.push(fingerprint);
        DedupeResult::New
    }

    /// Number of kept fingerprints.
    #[must_use]
    pub fn kept(&self) -> usize {
        self.seen.len()
    }

    /// Get total duplicates dropped.
    #[must_use]
    pub fn total_dupes(&self) -> u64 {
        self.total_dupes
    }

    /// Get the deduplication rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn dupe_rate(&self) -> f64 {
        if self.total_seen == 0 {
            0.0
        } else {
            self.total_dupes as f64 / self.total_seen as f64
        }
    }
}

/// Result of a deduplication check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeResult {
    /// No kept report is near this one
    New,
    /// A kept report is near this one
    Duplicate,
}

impl DedupeResult {
    /// Check if this result should be kept.
    #[must_use]
    pub fn should_keep(self) -> bool {
        matches!(self, Self::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(time: i64, lat: f64, lon: f64) -> Fingerprint {
        Fingerprint { time, lat, lon }
    }

    #[test]
    fn test_distinct_events() {
        let mut dedup = ProximityDedup::new();

        assert_eq!(dedup.check_and_mark(fp(0, 10.0, 120.0)), DedupeResult::New);
        assert_eq!(
            dedup.check_and_mark(fp(3_600_000, 10.0, 120.0)),
            DedupeResult::New
        );
        assert_eq!(dedup.check_and_mark(fp(0, 12.0, 120.0)), DedupeResult::New);

        assert_eq!(dedup.kept(), 3);
        assert_eq!(dedup.total_dupes(), 0);
    }

    #[test]
    fn test_near_reports_collapse_in_either_order() {
        let a = fp(1_000_000, 12.30, 123.60);
        let b = fp(1_010_000, 12.31, 123.61);

        for (first, second) in [(a, b), (b, a)] {
            let mut dedup = ProximityDedup::new();
            assert_eq!(dedup.check_and_mark(first), DedupeResult::New);
            assert_eq!(dedup.check_and_mark(second), DedupeResult::Duplicate);
            assert_eq!(dedup.kept(), 1);
        }
    }

    #[test]
    fn test_boundaries_are_strict() {
        let base = fp(0, 10.0, 120.0);

        let mut dedup = ProximityDedup::new();
        dedup.check_and_mark(base);
        assert_eq!(
            dedup.check_and_mark(fp(60_000, 10.0, 120.0)),
            DedupeResult::New
        );

        let mut dedup = ProximityDedup::new();
        dedup.check_and_mark(base);
        assert_eq!(
            dedup.check_and_mark(fp(59_999, 10.0, 120.0)),
            DedupeResult::Duplicate
        );

        // |0.1 - 0.0| is exactly the tolerance
        let mut dedup = ProximityDedup::new();
        dedup.check_and_mark(fp(0, 0.0, 0.0));
        assert_eq!(dedup.check_and_mark(fp(0, 0.1, 0.0)), DedupeResult::New);
        assert_eq!(dedup.check_and_mark(fp(0, 0.0, 0.1)), DedupeResult::New);

        let mut dedup = ProximityDedup::new();
        dedup.check_and_mark(base);
        assert_eq!(
            dedup.check_and_mark(fp(0, 10.099, 120.0)),
            DedupeResult::Duplicate
        );
    }

    #[test]
    fn test_decimal_coordinates_a_tenth_apart_are_distinct() {
        for (a, b) in [(14.5, 14.6), (10.0, 10.1), (12.3, 12.4)] {
            let mut dedup = ProximityDedup::new();
            dedup.check_and_mark(fp(0, a, 120.0));
            assert_eq!(dedup.check_and_mark(fp(0, b, 120.0)), DedupeResult::New);

            let mut dedup = ProximityDedup::new();
            dedup.check_and_mark(fp(0, 10.0, a + 110.0));
            assert_eq!(
                dedup.check_and_mark(fp(0, 10.0, b + 110.0)),
                DedupeResult::New
            );
        }

        let mut dedup = ProximityDedup::new();
        dedup.check_and_mark(fp(0, 14.5, 121.0));
        assert_eq!(
            dedup.check_and_mark(fp(0, 14.59, 121.09)),
            DedupeResult::Duplicate
        );
    }

    #[test]
    fn test_extreme_times_do_not_overflow() {
        let mut dedup = ProximityDedup::new();
        assert_eq!(dedup.check_and_mark(fp(i64::MAX, 10.0, 120.0)), DedupeResult::New);
        assert_eq!(dedup.check_and_mark(fp(i64::MIN, 10.0, 120.0)), DedupeResult::New);
        assert_eq!(
            dedup.check_and_mark(fp(i64::MAX - 1, 10.0, 120.0)),
            DedupeResult::Duplicate
        );
    }

    #[test]
    fn test_duplicates_are_not_remembered() {
        let mut dedup = ProximityDedup::new();
        dedup.check_and_mark(fp(0, 10.0, 120.0));
        // near the first, dropped
        dedup.check_and_mark(fp(50_000, 10.0, 120.0));
        // near the dropped one but not the kept one
        assert_eq!(
            dedup.check_and_mark(fp(100_000, 10.0, 120.0)),
            DedupeResult::New
        );
    }

    #[test]
    fn test_dupe_rate() {
        let mut dedup = ProximityDedup::new();

        dedup.check_and_mark(fp(0, 10.0, 120.0));
        dedup.check_and_mark(fp(1, 10.0, 120.0)); // dupe
        dedup.check_and_mark(fp(2, 10.0, 120.0)); // dupe
        dedup.check_and_mark(fp(0, 15.0, 120.0));

        assert!((dedup.dupe_rate() - 0.5).abs() < 0.01);
        assert!(DedupeResult::New.should_keep());
        assert!(!DedupeResult::Duplicate.should_keep());
    }
}
