//! Presentation sync: map markers, camera, table rows and legend.
//!
//! `Presenter::render` rebuilds everything from a working set and is safe to
//! call again with the same set. Camera animations finish asynchronously;
//! the work that waits for them is parked in `pending` and run when the map
//! reports `MoveEnded`.

use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bands::{BandSet, ColorScheme};
use crate::errors::QuakeError;
use crate::filters::{BBox, MagnitudeRange};
use crate::map::{
    Basemap, MapEvent, MapSurface, MarkerId, MarkerStyle, Overlay, OverlayId, PathStyle,
};
use crate::models::Event;
use crate::output::{escape_html, format_quake_time};

/// Opacity of a settled marker.
pub const VISIBLE_OPACITY: f64 = 0.8;

/// Marker fade duration.
pub const FADE: Duration = Duration::from_millis(400);

/// The camera never zooms out below this when focusing an event.
pub const FOCUS_ZOOM: f64 = 6.5;

/// Camera animation duration.
pub const FLY_DURATION: Duration = Duration::from_secs(2);

/// After a row is selected, the other markers come back after this long.
pub const RESTORE_DELAY: Duration = Duration::from_secs(3);

/// Stagger between markers fading back in.
pub const RESTORE_STAGGER: Duration = Duration::from_millis(50);

/// Region outline and plate boundaries show from this zoom up.
pub const MIN_ZOOM_FOR_PLATES: f64 = 4.0;

const MARKER_FILL_OPACITY: f64 = 0.6;

const BOUNDS_STYLE: PathStyle = PathStyle {
    color: "gray",
    weight: 1.0,
    opacity: 1.0,
    fill_opacity: 0.1,
    dash_array: Some("5,5"),
};

const PLATES_STYLE: PathStyle = PathStyle {
    color: "red",
    weight: 0.5,
    opacity: 0.8,
    fill_opacity: 0.0,
    dash_array: None,
};

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub time: String,
    pub magnitude: f64,
    pub color: &'static str,
    pub depth_km: f64,
    pub place: String,
    /// Set when the place should link to a detail page
    pub url: Option<String>,
}

/// One legend band.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub range: MagnitudeRange,
    pub color: &'static str,
    pub active: bool,
}

/// Work waiting for the camera to settle.
#[derive(Debug, Clone, PartialEq)]
enum Settle {
    Latest(MarkerId),
    Selected { marker: MarkerId, others: Vec<MarkerId> },
}

/// Deferred fade-in after a row selection.
#[derive(Debug, Clone)]
struct Restore {
    due: Instant,
    markers: Vec<MarkerId>,
}

/// Plate-boundary data, fetched at most once successfully.
#[derive(Debug, Clone)]
enum PlateCache {
    NotLoaded,
    Loading,
    Loaded(Arc<serde_json::Value>),
}

/// Something the session has to do after a map event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    /// The newest event is in view with its popup open
    LatestSettled,
    /// A selected row's event is in view
    SelectionSettled,
    /// Plate boundaries are needed and not yet fetched
    FetchPlates,
}

/// Drives a map surface and the tabular views from the working set.
pub struct Presenter<M: MapSurface> {
    map: M,
    bands: BandSet,
    bounds: BBox,
    offset: FixedOffset,
    markers: Vec<MarkerId>,
    active: Option<MarkerId>,
    pending: Option<Settle>,
    restore: Option<Restore>,
    rows: Vec<TableRow>,
    legend: Vec<LegendEntry>,
    bounds_layer: Option<OverlayId>,
    plates_layer: Option<OverlayId>,
    plates: PlateCache,
}

impl<M: MapSurface> Presenter<M> {
    #[must_use]
    pub fn new(map: M, bands: BandSet, bounds: BBox, offset: FixedOffset) -> Self {
        let legend = bands
            .bands()
            .iter()
            .map(|b| LegendEntry {
                range: b.range(),
                color: b.color,
                active: false,
            })
            .collect();

        Self {
            map,
            bands,
            bounds,
            offset,
            markers: Vec::new(),
            active: None,
            pending: None,
            restore: None,
            rows: Vec::new(),
            legend,
            bounds_layer: None,
            plates_layer: None,
            plates: PlateCache::NotLoaded,
        }
    }

    #[must_use]
    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    #[must_use]
    pub fn bands(&self) -> &BandSet {
        &self.bands
    }

    /// The map and the band set, borrowed together.
    pub fn parts(&mut self) -> (&mut M, &BandSet) {
        (&mut self.map, &self.bands)
    }

    #[must_use]
    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    #[must_use]
    pub fn legend(&self) -> &[LegendEntry] {
        &self.legend
    }

    #[cfg(test)]
    /// Marker of the currently selected event.
    #[must_use]
    pub fn active(&self) -> Option<MarkerId> {
        self.active
    }

    /// When the deferred fade-in is due, if one is scheduled.
    #[must_use]
    pub fn restore_due(&self) -> Option<Instant> {
        self.restore.as_ref().map(|r| r.due)
    }

    /// Remove every marker and pending camera work.
    fn teardown(&mut self) {
        for marker in self.markers.drain(..) {
            self.map.remove_marker(marker);
        }
        self.active = None;
        self.pending = None;
        self.restore = None;
    }

    /// Rebuild markers, table and legend for a new working set.
    ///
    /// Marker handles are written back into `events`.
    pub fn render(&mut self, events: &mut [Event]) {
        self.teardown();

        for event in events.iter_mut() {
            let color = self.bands.color_for(event.magnitude);
            let style = MarkerStyle {
                radius: 2.0 + event.magnitude,
                stroke_color: color,
                fill_color: color,
                fill_opacity: MARKER_FILL_OPACITY,
                opacity: 0.0,
            };
            let popup = self.popup_html(event);
            let marker = self.map.add_marker(event.location, &style, popup);
            event.marker = Some(marker);
            self.markers.push(marker);
        }

        if let Some(latest) = events.first() {
            if let Some(marker) = latest.marker {
                let zoom = self.map.zoom().max(FOCUS_ZOOM);
                self.map.fly_to(latest.location, zoom, FLY_DURATION);
                self.pending = Some(Settle::Latest(marker));
            }
        }

        self.rebuild_views(events);
        debug!(markers = self.markers.len(), "rendered working set");
    }

    fn rebuild_views(&mut self, events: &[Event]) {
        self.rows = events
            .iter()
            .map(|e| TableRow {
                time: format_quake_time(e.time, self.offset),
                magnitude: e.magnitude,
                color: self.bands.color_for(e.magnitude),
                depth_km: e.depth_km,
                place: e.place.clone(),
                url: (!e.detail_url.is_empty()).then(|| e.detail_url.clone()),
            })
            .collect();

        let activity = self.bands.legend_activity(events);
        self.legend = self
            .bands
            .bands()
            .iter()
            .zip(activity)
            .map(|(b, active)| LegendEntry {
                range: b.range(),
                color: b.color,
                active,
            })
            .collect();
    }

    fn popup_html(&self, event: &Event) -> String {
        let place = escape_html(&event.place);
        let title = if event.detail_url.is_empty() {
            format!("<b>{place}</b>")
        } else {
            format!(
                r#"<a href="{}" target="_blank" rel="noopener"><b>{place}</b></a>"#,
                escape_html(&event.detail_url)
            )
        };
        format!(
            "{title}<br>\
             <b>Magnitude:</b> {:.1}<br>\
             <b>Depth:</b> {:.1} km<br>\
             <b>Time:</b> {}<br>\
             <b>Source:</b> {}",
            event.magnitude,
            event.depth_km,
            format_quake_time(event.time, self.offset),
            event.agency
        )
    }

    /// Handle a map notification.
    pub fn handle_event(&mut self, event: MapEvent) -> Option<Followup> {
        match event {
            MapEvent::MoveEnded { center, zoom } => {
                debug!(lat = center.latitude, lon = center.longitude, zoom, "camera settled");
                self.settle()
            }
            MapEvent::ZoomEnded { zoom } => self.on_zoom(zoom),
        }
    }

    fn settle(&mut self) -> Option<Followup> {
        match self.pending.take()? {
            Settle::Latest(latest) => {
                for marker in &self.markers {
                    self.map
                        .set_opacity(*marker, VISIBLE_OPACITY, FADE, Duration::ZERO);
                }
                self.map.set_blinking(latest, true);
                self.map.open_popup(latest);
                self.active = Some(latest);
                Some(Followup::LatestSettled)
            }
            Settle::Selected { marker, others } => {
                self.map.open_popup(marker);
                self.active = Some(marker);
                self.restore = Some(Restore {
                    due: Instant::now() + RESTORE_DELAY,
                    markers: others,
                });
                Some(Followup::SelectionSettled)
            }
        }
    }

    /// Focus the event in table row `index`.
    ///
    /// Returns `false` if there is no such row.
    pub fn select_row(&mut self, index: usize, events: &[Event]) -> bool {
        let Some(event) = events.get(index) else {
            return false;
        };
        let Some(marker) = event.marker else {
            return false;
        };

        let others: Vec<MarkerId> = self
            .markers
            .iter()
            .copied()
            .filter(|m| *m != marker)
            .collect();
        for other in &others {
            self.map.set_opacity(*other, 0.0, FADE, Duration::ZERO);
        }

        if let Some(previous) = self.active {
            if previous != marker {
                self.map.close_popup(previous);
            }
        }

        self.map.bring_to_front(marker);
        self.map.set_opacity(marker, 1.0, FADE, Duration::ZERO);
        self.restore = None;

        let zoom = self.map.zoom().max(FOCUS_ZOOM);
        self.pending = Some(Settle::Selected { marker, others });
        self.map.fly_to(event.location, zoom, FLY_DURATION);
        debug!(row = index, event = %event.id, "row selected");
        true
    }

    /// Fade the other markers back in if the restore is due at `now`.
    pub fn restore_if_due(&mut self, now: Instant) {
        let Some(restore) = self.restore.take_if(|r| r.due <= now) else {
            return;
        };
        let mut delay = Duration::ZERO;
        for marker in restore.markers {
            self.map.set_opacity(marker, VISIBLE_OPACITY, FADE, delay);
            delay += RESTORE_STAGGER;
        }
    }

    /// Switch colour scheme: recolour bands, rows and legend.
    ///
    /// Markers keep their colours until the next render.
    pub fn recolor(&mut self, scheme: ColorScheme, events: &[Event]) {
        self.bands.recolor(scheme);
        self.rebuild_views(events);
    }

    /// Swap the base tile layer. Never triggers a reload.
    pub fn set_basemap(&mut self, basemap: Basemap, scheme: ColorScheme) {
        self.map.set_base_layer(basemap.resolve(scheme));
    }

    fn on_zoom(&mut self, zoom: f64) -> Option<Followup> {
        if zoom < MIN_ZOOM_FOR_PLATES {
            for layer in [self.bounds_layer.take(), self.plates_layer.take()]
                .into_iter()
                .flatten()
            {
                self.map.remove_overlay(layer);
            }
            return None;
        }

        if self.bounds_layer.is_none() {
            self.bounds_layer = Some(self.map.add_overlay(Overlay::Rectangle {
                bounds: self.bounds,
                style: BOUNDS_STYLE,
            }));
        }

        match &self.plates {
            PlateCache::Loaded(data) => {
                if self.plates_layer.is_none() {
                    let data = Arc::clone(data);
                    self.plates_layer = Some(self.map.add_overlay(Overlay::GeoJson {
                        data,
                        style: PLATES_STYLE,
                    }));
                }
                None
            }
            PlateCache::Loading => None,
            PlateCache::NotLoaded => {
                self.plates = PlateCache::Loading;
                Some(Followup::FetchPlates)
            }
        }
    }

    /// Take the result of the plate-boundary fetch.
    ///
    /// A failed fetch is retried on the next qualifying zoom.
    pub fn install_plates(&mut self, result: Result<serde_json::Value, QuakeError>) {
        match result {
            Ok(data) => {
                self.plates = PlateCache::Loaded(Arc::new(data));
                let zoom = self.map.zoom();
                if zoom >= MIN_ZOOM_FOR_PLATES {
                    let _ = self.on_zoom(zoom);
                }
            }
            Err(e) => {
                warn!("plate boundaries unavailable: {e}");
                self.plates = PlateCache::NotLoaded;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::PH_BOUNDS;
    use crate::map::TraceMap;
    use crate::models::{Agency, LatLon};

    fn event(id: &str, time: i64, magnitude: f64, lat: f64, lon: f64) -> Event {
        Event {
            id: id.into(),
            time,
            magnitude,
            depth_km: 12.34,
            location: LatLon::new(lat, lon),
            place: "Test Place".into(),
            detail_url: String::new(),
            agency: Agency::Usgs,
            marker: None,
        }
    }

    fn working_set() -> Vec<Event> {
        let mut latest = event("a", 3_000_000, 4.6, 12.3, 123.6);
        latest.detail_url = "https://example.org/a".into();
        vec![
            latest,
            event("b", 2_000_000, 5.2, 7.9, 126.1),
            event("c", 1_000_000, 2.1, 14.6, 121.0),
        ]
    }

    fn presenter() -> Presenter<TraceMap> {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        Presenter::new(
            TraceMap::new(&PH_BOUNDS, 5.0),
            BandSet::default(),
            PH_BOUNDS,
            offset,
        )
    }

    fn pump(p: &mut Presenter<TraceMap>) -> Vec<Followup> {
        let events = p.map_mut().drain_events();
        events
            .into_iter()
            .filter_map(|e| p.handle_event(e))
            .collect()
    }

    #[test]
    fn test_render_creates_hidden_markers_and_flies_to_latest() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);

        assert_eq!(p.map().marker_count(), 3);
        for e in &events {
            let marker = p.map().marker(e.marker.unwrap()).unwrap();
            assert!(marker.opacity.abs() < f64::EPSILON);
            assert!((marker.style.radius - (2.0 + e.magnitude)).abs() < 1e-9);
            assert_eq!(marker.style.fill_color, p.bands().color_for(e.magnitude));
        }
        assert_eq!(p.map().center(), events[0].location);
        assert!((p.map().zoom() - FOCUS_ZOOM).abs() < f64::EPSILON);
        assert_eq!(p.active(), None);
    }

    #[test]
    fn test_settle_fades_in_and_opens_latest() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);

        let followups = pump(&mut p);
        assert!(followups.contains(&Followup::LatestSettled));

        let latest = events[0].marker.unwrap();
        assert_eq!(p.active(), Some(latest));
        assert_eq!(p.map().open_popup_marker(), Some(latest));
        assert!(p.map().marker(latest).unwrap().blinking);
        for e in &events {
            let marker = p.map().marker(e.marker.unwrap()).unwrap();
            assert!((marker.opacity - VISIBLE_OPACITY).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_camera_does_not_zoom_out() {
        let mut p = presenter();
        p.map_mut().set_zoom(9.0);
        pump(&mut p);

        let mut events = working_set();
        p.render(&mut events);
        assert!((p.map().zoom() - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rerender_tears_down_previous_markers() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);
        pump(&mut p);

        let mut fewer = vec![event("z", 9_000_000, 3.0, 10.0, 122.0)];
        p.render(&mut fewer);
        assert_eq!(p.map().marker_count(), 1);
        assert_eq!(p.active(), None);
        assert!(events.iter().all(|e| p.map().marker(e.marker.unwrap()).is_none()));
    }

    #[test]
    fn test_empty_working_set() {
        let mut p = presenter();
        let mut events = Vec::new();
        p.render(&mut events);
        assert!(pump(&mut p).is_empty());
        assert!(p.rows().is_empty());
        assert!(p.legend().iter().all(|l| !l.active));
    }

    #[test]
    fn test_table_rows_and_legend() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);

        let rows = p.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].url.as_deref(), Some("https://example.org/a"));
        assert_eq!(rows[1].url, None);
        assert_eq!(rows[0].color, p.bands().color_for(4.6));

        let active: Vec<bool> = p.legend().iter().map(|l| l.active).collect();
        assert_eq!(active, vec![true, true, true, false, false]);
    }

    #[test]
    fn test_popup_links_detail_url() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);

        let linked = &p.map().marker(events[0].marker.unwrap()).unwrap().popup_html;
        assert!(linked.starts_with(r#"<a href="https://example.org/a""#));
        assert!(linked.contains("<b>Source:</b> USGS"));

        let plain = &p.map().marker(events[1].marker.unwrap()).unwrap().popup_html;
        assert!(plain.starts_with("<b>Test Place</b>"));
        assert!(plain.contains("<b>Depth:</b> 12.3 km"));
    }

    #[test]
    fn test_select_row() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);
        pump(&mut p);

        assert!(p.select_row(2, &events));
        let selected = events[2].marker.unwrap();
        assert_eq!(p.map().front(), Some(selected));
        assert!((p.map().marker(selected).unwrap().opacity - 1.0).abs() < f64::EPSILON);
        for e in &events[..2] {
            assert!(p.map().marker(e.marker.unwrap()).unwrap().opacity.abs() < f64::EPSILON);
        }
        // previous popup closed before flying
        assert_eq!(p.map().open_popup_marker(), None);

        let followups = pump(&mut p);
        assert!(followups.contains(&Followup::SelectionSettled));
        assert_eq!(p.active(), Some(selected));
        assert_eq!(p.map().open_popup_marker(), Some(selected));
        assert_eq!(p.map().center(), events[2].location);

        // nothing comes back before the delay
        let due = p.restore_due().unwrap();
        p.restore_if_due(due - Duration::from_millis(1));
        assert!(p.map().marker(events[0].marker.unwrap()).unwrap().opacity.abs() < f64::EPSILON);

        p.restore_if_due(due);
        for e in &events[..2] {
            let opacity = p.map().marker(e.marker.unwrap()).unwrap().opacity;
            assert!((opacity - VISIBLE_OPACITY).abs() < f64::EPSILON);
        }
        assert!(p.restore_due().is_none());
    }

    #[test]
    fn test_select_missing_row() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);
        assert!(!p.select_row(10, &events));
    }

    #[test]
    fn test_zoom_layers_and_plate_cache() {
        let mut p = presenter();
        let count = |p: &Presenter<TraceMap>| p.map().overlays().count();

        p.map_mut().set_zoom(3.0);
        assert!(pump(&mut p).is_empty());
        assert_eq!(count(&p), 0);

        p.map_mut().set_zoom(4.0);
        assert_eq!(pump(&mut p), vec![Followup::FetchPlates]);
        assert_eq!(count(&p), 1); // outline only

        // still loading: no second fetch
        p.map_mut().set_zoom(5.0);
        assert!(pump(&mut p).is_empty());

        p.install_plates(Ok(serde_json::json!({"type": "FeatureCollection", "features": []})));
        assert_eq!(count(&p), 2);

        p.map_mut().set_zoom(2.0);
        pump(&mut p);
        assert_eq!(count(&p), 0);

        // cached: shown again without fetching
        p.map_mut().set_zoom(6.0);
        assert!(pump(&mut p).is_empty());
        assert_eq!(count(&p), 2);
    }

    #[test]
    fn test_failed_plate_fetch_is_retried() {
        let mut p = presenter();
        p.map_mut().set_zoom(4.0);
        assert_eq!(pump(&mut p), vec![Followup::FetchPlates]);

        p.install_plates(Err(QuakeError::InvalidResponse("boom".into())));
        p.map_mut().set_zoom(4.5);
        assert_eq!(pump(&mut p), vec![Followup::FetchPlates]);
    }

    #[test]
    fn test_recolor_updates_rows_and_legend() {
        let mut p = presenter();
        let mut events = working_set();
        p.render(&mut events);

        p.recolor(ColorScheme::Dark, &events);
        let dark = BandSet::for_scheme(ColorScheme::Dark);
        assert_eq!(p.rows()[1].color, dark.color_for(5.2));
        assert_eq!(p.legend()[0].color, dark.bands()[0].color);
    }
}
