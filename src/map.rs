//! Map capability contract.
//!
//! The dashboard drives a map widget it does not own. `MapSurface` is the
//! small set of operations it needs; camera and zoom notifications come
//! back as `MapEvent`s drained by the session. `TraceMap` is the surface
//! used by the terminal dashboard: it keeps the map state in memory and
//! logs every operation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bands::ColorScheme;
use crate::filters::BBox;
use crate::models::LatLon;

/// Handle to a marker on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u64);

/// Handle to an overlay layer on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(pub u64);

/// Circle marker style.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerStyle {
    pub radius: f64,
    pub stroke_color: &'static str,
    pub fill_color: &'static str,
    pub fill_opacity: f64,
    /// Opacity the marker is created with
    pub opacity: f64,
}

/// Stroke/fill style for vector overlays.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStyle {
    pub color: &'static str,
    pub weight: f64,
    pub opacity: f64,
    pub fill_opacity: f64,
    pub dash_array: Option<&'static str>,
}

/// Vector layers the dashboard draws over the base map.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Rectangle { bounds: BBox, style: PathStyle },
    Polyline { points: Vec<LatLon>, style: PathStyle },
    GeoJson { data: Arc<serde_json::Value>, style: PathStyle },
    UserMarker { at: LatLon, label: &'static str },
}

/// Notifications from the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapEvent {
    /// A camera animation finished
    MoveEnded { center: LatLon, zoom: f64 },
    /// The zoom level changed
    ZoomEnded { zoom: f64 },
}

/// Tile layer shown under everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseLayer {
    Osm,
    GoogleHybrid,
    CartoLight,
    CartoDark,
}

impl BaseLayer {
    #[must_use]
    pub const fn tile_url(self) -> &'static str {
        match self {
            Self::Osm => "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
            Self::GoogleHybrid => "https://mt1.google.com/vt/lyrs=y&x={x}&y={y}&z={z}",
            Self::CartoLight => "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png",
            Self::CartoDark => "https://{s}.basemaps.cartocdn.com/dark_all/{z}/{x}/{y}.png",
        }
    }
}

/// Basemap selector value. `Auto` follows the colour scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Basemap {
    #[default]
    Auto,
    Osm,
    GoogleHybrid,
    CartoLight,
    CartoDark,
}

impl Basemap {
    #[must_use]
    pub const fn resolve(self, scheme: ColorScheme) -> BaseLayer {
        match self {
            Self::Auto => match scheme {
                ColorScheme::Light => BaseLayer::CartoLight,
                ColorScheme::Dark => BaseLayer::CartoDark,
            },
            Self::Osm => BaseLayer::Osm,
            Self::GoogleHybrid => BaseLayer::GoogleHybrid,
            Self::CartoLight => BaseLayer::CartoLight,
            Self::CartoDark => BaseLayer::CartoDark,
        }
    }
}

impl std::str::FromStr for Basemap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "osm" => Ok(Self::Osm),
            "google_hybrid" => Ok(Self::GoogleHybrid),
            "carto_light" => Ok(Self::CartoLight),
            "carto_dark" => Ok(Self::CartoDark),
            _ => Err(format!(
                "unknown basemap: {s} (expected: auto, osm, google_hybrid, carto_light, carto_dark)"
            )),
        }
    }
}

/// Operations the dashboard needs from a map widget.
pub trait MapSurface {
    /// Add a circle marker with a popup; returns its handle.
    fn add_marker(&mut self, at: LatLon, style: &MarkerStyle, popup_html: String) -> MarkerId;

    fn remove_marker(&mut self, id: MarkerId);

    /// Animate a marker's opacity over `fade`, starting after `delay`.
    fn set_opacity(&mut self, id: MarkerId, opacity: f64, fade: Duration, delay: Duration);

    fn set_blinking(&mut self, id: MarkerId, blinking: bool);

    fn bring_to_front(&mut self, id: MarkerId);

    fn open_popup(&mut self, id: MarkerId);

    fn close_popup(&mut self, id: MarkerId);

    /// Animate the camera. Completion is reported as `MapEvent::MoveEnded`.
    fn fly_to(&mut self, target: LatLon, zoom: f64, duration: Duration);

    fn zoom(&self) -> f64;

    fn center(&self) -> LatLon;

    /// Set the zoom level. Reported as `MapEvent::ZoomEnded`.
    fn set_zoom(&mut self, zoom: f64);

    fn add_overlay(&mut self, overlay: Overlay) -> OverlayId;

    fn remove_overlay(&mut self, id: OverlayId);

    fn set_base_layer(&mut self, layer: BaseLayer);

    /// Take pending notifications, oldest first.
    fn drain_events(&mut self) -> Vec<MapEvent>;
}

/// Marker state kept by `TraceMap`.
#[derive(Debug, Clone)]
pub struct TraceMarker {
    pub at: LatLon,
    pub style: MarkerStyle,
    pub opacity: f64,
    pub blinking: bool,
    pub popup_html: String,
}

/// In-memory map surface that logs each operation.
///
/// Camera animations complete immediately: `fly_to` queues its
/// `MoveEnded` right away.
#[derive(Debug)]
pub struct TraceMap {
    next_id: u64,
    markers: BTreeMap<MarkerId, TraceMarker>,
    /// Draw order, front-most last
    order: Vec<MarkerId>,
    overlays: BTreeMap<OverlayId, Overlay>,
    open_popup: Option<MarkerId>,
    center: LatLon,
    zoom: f64,
    base: Option<BaseLayer>,
    events: VecDeque<MapEvent>,
}

impl TraceMap {
    /// A map showing `bounds` at `zoom`.
    #[must_use]
    pub fn new(bounds: &BBox, zoom: f64) -> Self {
        let (lat, lon) = bounds.center();
        Self {
            next_id: 1,
            markers: BTreeMap::new(),
            order: Vec::new(),
            overlays: BTreeMap::new(),
            open_popup: None,
            center: LatLon::new(lat, lon),
            zoom,
            base: None,
            events: VecDeque::new(),
        }
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
impl TraceMap {
    #[must_use]
    pub fn marker(&self, id: MarkerId) -> Option<&TraceMarker> {
        self.markers.get(&id)
    }

    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Front-most marker, if any.
    #[must_use]
    pub fn front(&self) -> Option<MarkerId> {
        self.order.last().copied()
    }

    #[must_use]
    pub fn open_popup_marker(&self) -> Option<MarkerId> {
        self.open_popup
    }

    #[must_use]
    pub fn overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.values()
    }

    #[must_use]
    pub fn base_layer(&self) -> Option<BaseLayer> {
        self.base
    }
}

impl MapSurface for TraceMap {
    fn add_marker(&mut self, at: LatLon, style: &MarkerStyle, popup_html: String) -> MarkerId {
        let id = MarkerId(self.next());
        debug!(marker = id.0, lat = at.latitude, lon = at.longitude, "add marker");
        self.markers.insert(
            id,
            TraceMarker {
                at,
                style: style.clone(),
                opacity: style.opacity,
                blinking: false,
                popup_html,
            },
        );
        self.order.push(id);
        id
    }

    fn remove_marker(&mut self, id: MarkerId) {
        self.markers.remove(&id);
        self.order.retain(|m| *m != id);
        if self.open_popup == Some(id) {
            self.open_popup = None;
        }
    }

    fn set_opacity(&mut self, id: MarkerId, opacity: f64, fade: Duration, delay: Duration) {
        if let Some(m) = self.markers.get_mut(&id) {
            debug!(
                marker = id.0,
                opacity,
                fade_ms = fade.as_millis(),
                delay_ms = delay.as_millis(),
                "fade marker"
            );
            m.opacity = opacity;
        }
    }

    fn set_blinking(&mut self, id: MarkerId, blinking: bool) {
        if let Some(m) = self.markers.get_mut(&id) {
            if m.blinking != blinking {
                debug!(marker = id.0, blinking, "blink marker");
            }
            m.blinking = blinking;
        }
    }

    fn bring_to_front(&mut self, id: MarkerId) {
        if let Some(m) = self.markers.get(&id) {
            debug!(
                marker = id.0,
                lat = m.at.latitude,
                lon = m.at.longitude,
                radius = m.style.radius,
                "bring to front"
            );
            self.order.retain(|m| *m != id);
            self.order.push(id);
        }
    }

    fn open_popup(&mut self, id: MarkerId) {
        if let Some(m) = self.markers.get(&id) {
            debug!(marker = id.0, popup = %m.popup_html, "open popup");
            self.open_popup = Some(id);
        }
    }

    fn close_popup(&mut self, id: MarkerId) {
        if self.open_popup == Some(id) {
            self.open_popup = None;
        }
    }

    fn fly_to(&mut self, target: LatLon, zoom: f64, duration: Duration) {
        debug!(
            lat = target.latitude,
            lon = target.longitude,
            zoom,
            duration_ms = duration.as_millis(),
            "fly to"
        );
        let zoom_changed = (zoom - self.zoom).abs() > f64::EPSILON;
        self.center = target;
        self.zoom = zoom;
        if zoom_changed {
            self.events.push_back(MapEvent::ZoomEnded { zoom });
        }
        self.events.push_back(MapEvent::MoveEnded {
            center: target,
            zoom,
        });
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn center(&self) -> LatLon {
        self.center
    }

    fn set_zoom(&mut self, zoom: f64) {
        debug!(zoom, "set zoom");
        self.zoom = zoom;
        self.events.push_back(MapEvent::ZoomEnded { zoom });
    }

    fn add_overlay(&mut self, overlay: Overlay) -> OverlayId {
        let id = OverlayId(self.next());
        debug!(overlay = id.0, "add overlay");
        self.overlays.insert(id, overlay);
        id
    }

    fn remove_overlay(&mut self, id: OverlayId) {
        debug!(overlay = id.0, "remove overlay");
        self.overlays.remove(&id);
    }

    fn set_base_layer(&mut self, layer: BaseLayer) {
        if self.base != Some(layer) {
            debug!(from = ?self.base, tiles = layer.tile_url(), "base layer");
        }
        self.base = Some(layer);
    }

    fn drain_events(&mut self) -> Vec<MapEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::PH_BOUNDS;

    fn style() -> MarkerStyle {
        MarkerStyle {
            radius: 6.0,
            stroke_color: "#fff",
            fill_color: "#fff",
            fill_opacity: 0.6,
            opacity: 0.0,
        }
    }

    #[test]
    fn test_fly_to_queues_events() {
        let mut map = TraceMap::new(&PH_BOUNDS, 5.0);
        map.fly_to(LatLon::new(10.0, 120.0), 6.5, Duration::from_secs(2));

        let events = map.drain_events();
        assert_eq!(
            events,
            vec![
                MapEvent::ZoomEnded { zoom: 6.5 },
                MapEvent::MoveEnded {
                    center: LatLon::new(10.0, 120.0),
                    zoom: 6.5
                },
            ]
        );
        assert!(map.drain_events().is_empty());
    }

    #[test]
    fn test_marker_lifecycle() {
        let mut map = TraceMap::new(&PH_BOUNDS, 5.0);
        let a = map.add_marker(LatLon::new(10.0, 120.0), &style(), "a".into());
        let b = map.add_marker(LatLon::new(11.0, 121.0), &style(), "b".into());
        assert_eq!(map.front(), Some(b));

        map.bring_to_front(a);
        assert_eq!(map.front(), Some(a));

        map.open_popup(a);
        map.remove_marker(a);
        assert_eq!(map.open_popup_marker(), None);
        assert_eq!(map.marker_count(), 1);
    }

    #[test]
    fn test_basemap_resolution() {
        assert_eq!(Basemap::Auto.resolve(ColorScheme::Dark), BaseLayer::CartoDark);
        assert_eq!(Basemap::Auto.resolve(ColorScheme::Light), BaseLayer::CartoLight);
        assert_eq!(Basemap::Osm.resolve(ColorScheme::Dark), BaseLayer::Osm);
        assert!("satellite".parse::<Basemap>().is_err());
    }
}
