//! Distance from the user to the latest earthquake.
//!
//! The user's position is asked for at most once per session. Once known,
//! every load cycle redraws the distance line and status to the newest
//! event.

use std::f64::consts::PI;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bands::BandSet;
use crate::errors::QuakeError;
use crate::map::{MapSurface, Overlay, OverlayId, PathStyle};
use crate::models::{Event, LatLon};

/// Earth radius in kilometers for haversine calculations.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const UNSUPPORTED_MESSAGE: &str = "Geolocation not supported.";
pub const DENIED_MESSAGE: &str =
    "To see the quake distance, allow location access in settings.";
pub const NO_QUAKES_MESSAGE: &str = "No recent quakes found.";

const DISTANCE_LINE: PathStyle = PathStyle {
    color: "gray",
    weight: 2.0,
    opacity: 1.0,
    fill_opacity: 0.0,
    dash_array: Some("5, 5"),
};

/// Calculate the great-circle distance between two points using the haversine formula.
///
/// Returns distance in kilometers.
#[must_use]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1 * PI / 180.0;
    let lat2_rad = lat2 * PI / 180.0;
    let delta_lat = (lat2 - lat1) * PI / 180.0;
    let delta_lon = (lon2 - lon1) * PI / 180.0;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Something that can report where the user is.
#[async_trait]
pub trait Geolocator: Send + Sync {
    /// # Errors
    ///
    /// Returns `QuakeError::Location` when the position is unavailable or
    /// access is denied.
    async fn current_position(&self) -> Result<LatLon, QuakeError>;
}

/// Geolocator with a position supplied up front (`--location`).
#[derive(Debug, Clone, Copy)]
pub struct FixedLocator(pub LatLon);

#[async_trait]
impl Geolocator for FixedLocator {
    async fn current_position(&self) -> Result<LatLon, QuakeError> {
        Ok(self.0)
    }
}

/// Geolocator that always refuses (`--deny-location`).
#[derive(Debug, Clone, Copy)]
pub struct DeniedLocator;

#[async_trait]
impl Geolocator for DeniedLocator {
    async fn current_position(&self) -> Result<LatLon, QuakeError> {
        Err(QuakeError::Location("permission denied".into()))
    }
}

/// Where the location request stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationState {
    NotRequested,
    Requesting,
    Granted(LatLon),
    Denied,
    Unsupported,
}

/// The distance status line.
#[derive(Debug, Clone, PartialEq)]
pub enum DistanceStatus {
    Blank,
    Message(&'static str),
    Distance {
        magnitude: f64,
        color: &'static str,
        distance_km: f64,
    },
}

/// Owns the user location and the distance overlay.
pub struct ProximityService {
    locator: Option<Arc<dyn Geolocator>>,
    state: LocationState,
    status: DistanceStatus,
    line: Option<OverlayId>,
    user_marker: Option<OverlayId>,
}

impl ProximityService {
    /// `locator` is `None` when the platform has no geolocation.
    #[must_use]
    pub fn new(locator: Option<Arc<dyn Geolocator>>) -> Self {
        Self {
            locator,
            state: LocationState::NotRequested,
            status: DistanceStatus::Blank,
            line: None,
            user_marker: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LocationState {
        self.state
    }

    #[must_use]
    pub fn status(&self) -> &DistanceStatus {
        &self.status
    }

    /// Whether the one request of the session has been made.
    #[must_use]
    pub fn attempted(&self) -> bool {
        self.state != LocationState::NotRequested
    }

    #[cfg(test)]
    /// The user marker overlay, once placed.
    #[must_use]
    pub fn user_marker(&self) -> Option<OverlayId> {
        self.user_marker
    }

    /// Start the session's location request.
    ///
    /// Returns the geolocator to ask, or `None` if a request was already
    /// made or geolocation is unsupported.
    pub fn begin_request(&mut self) -> Option<Arc<dyn Geolocator>> {
        if self.attempted() {
            return None;
        }

        match &self.locator {
            None => {
                self.state = LocationState::Unsupported;
                self.status = DistanceStatus::Message(UNSUPPORTED_MESSAGE);
                None
            }
            Some(locator) => {
                self.state = LocationState::Requesting;
                self.status = DistanceStatus::Blank;
                Some(Arc::clone(locator))
            }
        }
    }

    /// Record the answer to the location request.
    pub fn resolve(
        &mut self,
        result: Result<LatLon, QuakeError>,
        map: &mut dyn MapSurface,
        events: &[Event],
        bands: &BandSet,
    ) {
        if self.state != LocationState::Requesting {
            return;
        }

        match result {
            Ok(at) => {
                info!(lat = at.latitude, lon = at.longitude, "user location granted");
                self.state = LocationState::Granted(at);
                self.user_marker = Some(map.add_overlay(Overlay::UserMarker {
                    at,
                    label: "Your current location",
                }));
                self.refresh(map, events, bands);
            }
            Err(e) => {
                warn!("user denied geolocation or error: {e}");
                self.state = LocationState::Denied;
                self.status = DistanceStatus::Message(DENIED_MESSAGE);
            }
        }
    }

    /// Redraw the distance to the newest event, if the user location is known.
    pub fn refresh(&mut self, map: &mut dyn MapSurface, events: &[Event], bands: &BandSet) {
        let LocationState::Granted(user) = self.state else {
            return;
        };

        self.clear_line(map);

        let Some(latest) = events.first() else {
            self.status = DistanceStatus::Message(NO_QUAKES_MESSAGE);
            return;
        };

        let distance_km = haversine_distance(
            user.latitude,
            user.longitude,
            latest.location.latitude,
            latest.location.longitude,
        );
        debug!(distance_km, event = %latest.id, "distance to latest quake");

        self.status = DistanceStatus::Distance {
            magnitude: latest.magnitude,
            color: bands.color_for(latest.magnitude),
            distance_km,
        };
        self.line = Some(map.add_overlay(Overlay::Polyline {
            points: vec![user, latest.location],
            style: DISTANCE_LINE,
        }));
    }

    /// Remove the distance line, if drawn.
    pub fn clear_line(&mut self, map: &mut dyn MapSurface) {
        if let Some(line) = self.line.take() {
            map.remove_overlay(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::PH_BOUNDS;
    use crate::map::TraceMap;
    use crate::models::Agency;

    const MANILA: LatLon = LatLon::new(14.5995, 120.9842);

    fn event_at(lat: f64, lon: f64, magnitude: f64) -> Event {
        Event {
            id: "e".into(),
            time: 0,
            magnitude,
            depth_km: 10.0,
            location: LatLon::new(lat, lon),
            place: "Test".into(),
            detail_url: String::new(),
            agency: Agency::Usgs,
            marker: None,
        }
    }

    fn polylines(map: &TraceMap) -> usize {
        map.overlays()
            .filter(|o| matches!(o, Overlay::Polyline { .. }))
            .count()
    }

    #[test]
    fn test_haversine_zero() {
        let d = haversine_distance(MANILA.latitude, MANILA.longitude, MANILA.latitude, MANILA.longitude);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_haversine_reference_pairs() {
        // Manila to Davao, ~960 km
        let d = haversine_distance(14.5995, 120.9842, 7.1907, 125.4553);
        assert!((d - 960.0).abs() / 960.0 < 0.02, "got {d}");

        // a quarter of the equator: pi/2 * R
        let quarter = haversine_distance(0.0, 0.0, 0.0, 90.0);
        let expected = PI / 2.0 * EARTH_RADIUS_KM;
        assert!((quarter - expected).abs() / expected < 0.001);

        // antipodal points: pi * R
        let antipodal = haversine_distance(14.5995, 120.9842, -14.5995, -59.0158);
        let expected = PI * EARTH_RADIUS_KM;
        assert!((antipodal - expected).abs() / expected < 0.001, "got {antipodal}");
    }

    #[test]
    fn test_request_latch() {
        let mut service = ProximityService::new(Some(Arc::new(FixedLocator(MANILA))));
        assert!(service.begin_request().is_some());
        assert_eq!(service.state(), LocationState::Requesting);
        assert!(service.begin_request().is_none());
    }

    #[test]
    fn test_unsupported() {
        let mut service = ProximityService::new(None);
        assert!(service.begin_request().is_none());
        assert_eq!(service.state(), LocationState::Unsupported);
        assert_eq!(
            service.status(),
            &DistanceStatus::Message(UNSUPPORTED_MESSAGE)
        );
        assert!(service.begin_request().is_none());
    }

    #[test]
    fn test_denied_is_permanent() {
        let mut map = TraceMap::new(&PH_BOUNDS, 5.0);
        let bands = BandSet::default();
        let mut service = ProximityService::new(Some(Arc::new(DeniedLocator)));

        service.begin_request();
        service.resolve(
            Err(QuakeError::Location("denied".into())),
            &mut map,
            &[],
            &bands,
        );
        assert_eq!(service.state(), LocationState::Denied);
        assert_eq!(service.status(), &DistanceStatus::Message(DENIED_MESSAGE));
        assert!(service.user_marker().is_none());
        assert!(service.begin_request().is_none());
    }

    #[test]
    fn test_granted_draws_line_and_replaces_it() {
        let mut map = TraceMap::new(&PH_BOUNDS, 5.0);
        let bands = BandSet::default();
        let mut service = ProximityService::new(Some(Arc::new(FixedLocator(MANILA))));
        let events = [event_at(14.5995, 121.9842, 4.5)];

        service.begin_request();
        service.resolve(Ok(MANILA), &mut map, &events, &bands);
        assert_eq!(service.state(), LocationState::Granted(MANILA));
        assert!(service.user_marker().is_some());
        assert_eq!(polylines(&map), 1);

        match service.status() {
            DistanceStatus::Distance {
                magnitude,
                color,
                distance_km,
            } => {
                assert!((magnitude - 4.5).abs() < f64::EPSILON);
                assert_eq!(*color, bands.color_for(4.5));
                assert!(*distance_km > 100.0 && *distance_km < 110.0);
            }
            other => panic!("unexpected status {other:?}"),
        }

        // next cycle replaces the line
        service.refresh(&mut map, &[event_at(10.0, 122.0, 5.0)], &bands);
        assert_eq!(polylines(&map), 1);

        // empty cycle clears it
        service.refresh(&mut map, &[], &bands);
        assert_eq!(polylines(&map), 0);
        assert_eq!(service.status(), &DistanceStatus::Message(NO_QUAKES_MESSAGE));
    }

    #[test]
    fn test_refresh_without_location_is_noop() {
        let mut map = TraceMap::new(&PH_BOUNDS, 5.0);
        let mut service = ProximityService::new(None);
        service.refresh(&mut map, &[event_at(10.0, 122.0, 5.0)], &BandSet::default());
        assert_eq!(polylines(&map), 0);
        assert_eq!(service.status(), &DistanceStatus::Blank);
    }
}
