//! Reconciliation: turn one cycle's raw records into the working set.
//!
//! Order matters: validation, region, magnitude, dedup, place casing, then
//! a stable sort newest-first. Dedup sees records in adapter order, so the
//! first adapter's report of an event is the one kept.

use tracing::debug;

use crate::dedup::{Fingerprint, ProximityDedup};
use crate::filters::{BBox, FilterState};
use crate::models::{Event, LatLon, RawRecord};
use crate::place::normalize_place;

/// Result of reconciling one load cycle.
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Working set, newest first
    pub events: Vec<Event>,
    /// Records without usable geometry, time or magnitude
    pub malformed: usize,
    pub outside_region: usize,
    pub outside_magnitude: usize,
    pub duplicates: u64,
}

/// A record that passed validation.
struct Valid {
    record: RawRecord,
    time: i64,
    magnitude: f64,
    location: LatLon,
}

fn validate(record: RawRecord) -> Option<Valid> {
    let location = record.location?;
    let time = record.time?;
    let magnitude = record.magnitude.filter(|m| m.is_finite())?;
    Some(Valid {
        record,
        time,
        magnitude,
        location,
    })
}

/// Build the working set from every adapter's records.
#[must_use]
pub fn reconcile(records: Vec<RawRecord>, bbox: &BBox, filter: &FilterState) -> Reconciled {
    let mut out = Reconciled::default();
    let mut dedup = ProximityDedup::new();

    for record in records {
        let Some(valid) = validate(record) else {
            out.malformed += 1;
            continue;
        };

        if !bbox.contains(valid.location.latitude, valid.location.longitude) {
            out.outside_region += 1;
            continue;
        }

        if !filter.magnitude.contains(valid.magnitude) {
            out.outside_magnitude += 1;
            continue;
        }

        let fingerprint = Fingerprint {
            time: valid.time,
            lat: valid.location.latitude,
            lon: valid.location.longitude,
        };
        if !dedup.check_and_mark(fingerprint).should_keep() {
            continue;
        }

        let Valid {
            record,
            time,
            magnitude,
            location,
        } = valid;

        out.events.push(Event {
            place: normalize_place(&record.place, record.agency),
            id: record.id,
            time,
            magnitude,
            depth_km: record.depth_km.abs(),
            location,
            detail_url: record.detail_url,
            agency: record.agency,
            marker: None,
        });
    }

    // Stable: equal times keep input order
    out.events.sort_by(|a, b| b.time.cmp(&a.time));
    out.duplicates = dedup.total_dupes();

    debug!(
        kept = dedup.kept(),
        dupe_rate = dedup.dupe_rate(),
        malformed = out.malformed,
        outside_region = out.outside_region,
        outside_magnitude = out.outside_magnitude,
        duplicates = out.duplicates,
        "reconciled"
    );

    out
}
