//! The dashboard session.
//!
//! A `Session` owns every piece of mutable state: filters, the working set,
//! the presenter and the proximity service. Fetches, geolocation and the
//! plate-boundary download run as spawned tasks and report back over
//! channels; the session is their only consumer and the only writer.

use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use crate::bands::ColorScheme;
use crate::client::FeedClient;
use crate::config::{DashboardConfig, SchemeChangePolicy};
use crate::errors::QuakeError;
use crate::feeds::{FeedAdapter, FeedQuery};
use crate::filters::{FilterState, MagnitudeRange, TimeWindow};
use crate::lifecycle::{Generation, LoadController, LoadReport, spawn_load};
use crate::map::{Basemap, MapSurface};
use crate::models::{Event, LatLon};
use crate::output::{self, Dashboard, Format};
use crate::present::{Followup, Presenter};
use crate::proximity::ProximityService;
use crate::reconcile::reconcile;

/// Refresh-status text when every feed failed.
pub const LOAD_FAILED: &str = "Failed to load data";

/// Why a load cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    Timer,
    Filter,
    Scheme,
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Timer => "timer",
            Self::Filter => "filter",
            Self::Scheme => "scheme",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A command typed on stdin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserCommand {
    Refresh,
    Magnitude(MagnitudeRange),
    /// Toggle the legend band at this index
    Band(usize),
    Window(TimeWindow),
    Scheme(ColorScheme),
    Basemap(Basemap),
    /// Focus the event in this table row
    Select(usize),
    Zoom(f64),
    Locate,
    Quit,
}

impl std::str::FromStr for UserCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let name = parts.next().ok_or_else(|| "empty command".to_string())?;
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("too many arguments: {s}"));
        }

        let need = |what: &str| arg.ok_or_else(|| format!("{name} needs {what}"));

        match (name.to_lowercase().as_str(), arg) {
            ("refresh" | "r", None) => Ok(Self::Refresh),
            ("locate", None) => Ok(Self::Locate),
            ("quit" | "q" | "exit", None) => Ok(Self::Quit),
            ("mag", _) => need("a range like 4-4.9")?.parse().map(Self::Magnitude),
            ("band", _) => need("a legend index")?
                .parse()
                .map(Self::Band)
                .map_err(|e| format!("invalid band index: {e}")),
            ("window", _) => need("hour, day, week or month")?.parse().map(Self::Window),
            ("scheme", _) => need("light or dark")?.parse().map(Self::Scheme),
            ("basemap", _) => need("a basemap name")?.parse().map(Self::Basemap),
            ("select", _) => need("a row number")?
                .parse()
                .map(Self::Select)
                .map_err(|e| format!("invalid row: {e}")),
            ("zoom", _) => {
                let zoom: f64 = need("a zoom level")?
                    .parse()
                    .map_err(|e| format!("invalid zoom: {e}"))?;
                if zoom.is_finite() && zoom >= 0.0 {
                    Ok(Self::Zoom(zoom))
                } else {
                    Err(format!("zoom must be a non-negative number: {zoom}"))
                }
            }
            _ => Err(format!("unknown command: {s}")),
        }
    }
}

/// Whether the event loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Receiving ends of the session's task channels.
#[derive(Debug)]
pub struct Inbox {
    pub loads: mpsc::UnboundedReceiver<LoadReport>,
    pub locations: mpsc::UnboundedReceiver<Result<LatLon, QuakeError>>,
    pub plates: mpsc::UnboundedReceiver<Result<serde_json::Value, QuakeError>>,
}

#[derive(Debug, Clone)]
struct Outbox {
    loads: mpsc::UnboundedSender<LoadReport>,
    locations: mpsc::UnboundedSender<Result<LatLon, QuakeError>>,
    plates: mpsc::UnboundedSender<Result<serde_json::Value, QuakeError>>,
}

fn channels() -> (Outbox, Inbox) {
    let (loads_tx, loads) = mpsc::unbounded_channel();
    let (locations_tx, locations) = mpsc::unbounded_channel();
    let (plates_tx, plates) = mpsc::unbounded_channel();
    (
        Outbox {
            loads: loads_tx,
            locations: locations_tx,
            plates: plates_tx,
        },
        Inbox {
            loads,
            locations,
            plates,
        },
    )
}

/// One dashboard session.
pub struct Session<M: MapSurface> {
    config: DashboardConfig,
    client: Arc<FeedClient>,
    adapters: Vec<Arc<dyn FeedAdapter>>,
    controller: LoadController,
    filter: FilterState,
    scheme: ColorScheme,
    basemap: Basemap,
    events: Vec<Event>,
    presenter: Presenter<M>,
    proximity: ProximityService,
    status: Option<String>,
    /// False for a single load, which never shows zoom layers
    interactive: bool,
    tx: Outbox,
}

impl<M: MapSurface> Session<M> {
    /// Create a session drawing on `map`.
    ///
    /// Adapters run in the given order; on a cross-agency duplicate the
    /// earlier adapter's record is kept.
    pub fn new(
        config: DashboardConfig,
        client: Arc<FeedClient>,
        adapters: Vec<Arc<dyn FeedAdapter>>,
        map: M,
    ) -> (Self, Inbox) {
        let (tx, inbox) = channels();
        let bands = crate::bands::BandSet::for_scheme(config.scheme);
        let mut presenter = Presenter::new(map, bands, config.bbox, config.utc_offset);
        presenter.set_basemap(config.basemap, config.scheme);

        let session = Self {
            filter: config.filter,
            scheme: config.scheme,
            basemap: config.basemap,
            proximity: ProximityService::new(config.location.geolocator()),
            config,
            client,
            adapters,
            controller: LoadController::new(),
            events: Vec::new(),
            presenter,
            status: None,
            interactive: true,
            tx,
        };
        (session, inbox)
    }

    #[cfg(test)]
    /// The working set, newest first.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[cfg(test)]
    #[must_use]
    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Refresh-status text, `None` after a clean load.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    #[cfg(test)]
    #[must_use]
    pub fn presenter(&self) -> &Presenter<M> {
        &self.presenter
    }

    #[cfg(test)]
    #[must_use]
    pub fn proximity(&self) -> &ProximityService {
        &self.proximity
    }

    /// Generation of the live load cycle.
    #[must_use]
    pub fn current_generation(&self) -> Option<Generation> {
        self.controller.current()
    }

    /// Start a load cycle, superseding any in flight.
    pub fn start_load(&mut self, trigger: Trigger) -> Generation {
        let ticket = self.controller.start_load();
        let generation = ticket.generation();
        let query = FeedQuery::new(self.config.bbox, &self.filter, Utc::now());
        info!(
            %generation,
            %trigger,
            magnitude = %self.filter.magnitude,
            window = self.filter.window.as_str(),
            "loading earthquakes"
        );
        spawn_load(self.adapters.clone(), query, ticket, self.tx.loads.clone());
        generation
    }

    /// Apply a finished load cycle.
    ///
    /// Returns `false` if the report was superseded and discarded.
    pub fn apply_report(&mut self, report: LoadReport) -> bool {
        if !self.controller.is_current(report.generation) {
            debug!(generation = %report.generation, "discarding stale load");
            return false;
        }

        let failures = report.failures();
        for (agency, reason) in &failures {
            debug!(generation = %report.generation, %agency, reason, "feed failed");
        }

        if report.all_failed() {
            warn!(generation = %report.generation, "every feed failed; keeping previous data");
            self.status = Some(LOAD_FAILED.to_string());
            return true;
        }

        self.status = if failures.is_empty() {
            None
        } else {
            let names: Vec<&str> = failures.iter().map(|(a, _)| a.as_str()).collect();
            Some(format!("{} feed unavailable", names.join(", ")))
        };

        let generation = report.generation;
        let reconciled = reconcile(report.into_records(), &self.config.bbox, &self.filter);
        self.events = reconciled.events;

        let (map, _) = self.presenter.parts();
        self.proximity.clear_line(map);
        self.presenter.render(&mut self.events);
        let (map, bands) = self.presenter.parts();
        self.proximity.refresh(map, &self.events, bands);

        info!(
            %generation,
            events = self.events.len(),
            duplicates = reconciled.duplicates,
            "working set updated"
        );

        if self.events.is_empty() {
            self.request_location();
        }
        self.pump_map();
        true
    }

    /// Ask for the user's position, once per session.
    pub fn request_location(&mut self) {
        let Some(locator) = self.proximity.begin_request() else {
            return;
        };
        debug!("requesting user location");
        let tx = self.tx.locations.clone();
        tokio::spawn(async move {
            let _ = tx.send(locator.current_position().await);
        });
    }

    /// Take the answer to the location request.
    pub fn apply_location(&mut self, result: Result<LatLon, QuakeError>) {
        let (map, bands) = self.presenter.parts();
        self.proximity.resolve(result, map, &self.events, bands);
    }

    /// Take the plate-boundary download.
    pub fn apply_plates(&mut self, result: Result<serde_json::Value, QuakeError>) {
        self.presenter.install_plates(result);
        self.pump_map();
    }

    fn fetch_plates(&self) {
        debug!("fetching plate boundaries");
        let client = Arc::clone(&self.client);
        let source = self.config.plates.clone();
        let tx = self.tx.plates.clone();
        tokio::spawn(async move {
            let _ = tx.send(source.load(&client).await);
        });
    }

    /// Feed pending map notifications to the presenter.
    pub fn pump_map(&mut self) {
        loop {
            let events = self.presenter.map_mut().drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                match self.presenter.handle_event(event) {
                    Some(Followup::LatestSettled) => self.request_location(),
                    Some(Followup::FetchPlates) if self.interactive => self.fetch_plates(),
                    Some(Followup::FetchPlates | Followup::SelectionSettled) | None => {}
                }
            }
        }
    }

    /// Run the deferred marker fade-in if it is due.
    pub fn tick_restore(&mut self, now: Instant) {
        self.presenter.restore_if_due(now);
    }

    /// Carry out a user command.
    ///
    /// # Errors
    ///
    /// Returns `QuakeError::Validation` for a band or row that does not exist.
    pub fn handle_command(&mut self, command: UserCommand) -> Result<Flow, QuakeError> {
        debug!(?command, "command");
        match command {
            UserCommand::Quit => return Ok(Flow::Quit),
            UserCommand::Refresh => {
                self.start_load(Trigger::Manual);
            }
            UserCommand::Magnitude(range) => {
                self.filter.magnitude = range;
                self.start_load(Trigger::Filter);
            }
            UserCommand::Band(index) => {
                let band = self
                    .presenter
                    .bands()
                    .get(index)
                    .ok_or_else(|| QuakeError::Validation(format!("no legend band {index}")))?;
                let range = band.range();
                self.filter.toggle_band(range);
                self.start_load(Trigger::Filter);
            }
            UserCommand::Window(window) => {
                self.filter.window = window;
                self.start_load(Trigger::Filter);
            }
            UserCommand::Scheme(scheme) => {
                self.scheme = scheme;
                self.presenter.recolor(scheme, &self.events);
                self.presenter.set_basemap(self.basemap, scheme);
                match self.config.scheme_policy {
                    SchemeChangePolicy::Reload => {
                        self.start_load(Trigger::Scheme);
                    }
                    SchemeChangePolicy::Recolor => {}
                }
            }
            UserCommand::Basemap(basemap) => {
                self.basemap = basemap;
                self.presenter.set_basemap(basemap, self.scheme);
            }
            UserCommand::Select(row) => {
                if !self.presenter.select_row(row, &self.events) {
                    return Err(QuakeError::Validation(format!("no table row {row}")));
                }
            }
            UserCommand::Zoom(zoom) => self.presenter.map_mut().set_zoom(zoom),
            UserCommand::Locate => {
                if self.proximity.attempted() {
                    debug!("location already requested this session");
                }
                self.request_location();
            }
        }
        self.pump_map();
        Ok(Flow::Continue)
    }

    /// Write the current state in `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_output<W: Write>(&self, writer: &mut W, format: Format) -> std::io::Result<()> {
        match format {
            Format::Human => {
                let view = Dashboard {
                    filter: &self.filter,
                    rows: self.presenter.rows(),
                    legend: self.presenter.legend(),
                    status: self.status(),
                    distance: self.proximity.status(),
                    camera: Some((self.presenter.map().center(), self.presenter.map().zoom())),
                    base_layer: Some(self.basemap.resolve(self.scheme)),
                };
                output::write_dashboard(writer, &view)?;
            }
            Format::Json => output::write_json(writer, &self.events)?,
            Format::Ndjson => output::write_ndjson(writer, &self.events)?,
        }
        writer.flush()
    }

    /// Load once and wait for the result, plus the location answer if one
    /// was requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the load task went away without reporting.
    pub async fn load_once(&mut self, inbox: &mut Inbox) -> Result<(), QuakeError> {
        self.interactive = false;
        self.start_load(Trigger::Initial);
        loop {
            let report = inbox
                .loads
                .recv()
                .await
                .ok_or_else(|| QuakeError::InvalidResponse("load task ended early".into()))?;
            if self.apply_report(report) {
                break;
            }
        }

        if self.proximity.state() == crate::proximity::LocationState::Requesting {
            if let Some(result) = inbox.locations.recv().await {
                self.apply_location(result);
            }
        }
        Ok(())
    }

    /// Run the interactive dashboard until `quit` or Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if writing output fails.
    pub async fn run<W: Write>(
        mut self,
        mut inbox: Inbox,
        format: Format,
        writer: &mut W,
    ) -> Result<(), QuakeError> {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stdin = BufReader::new(tokio::io::stdin());
        let mut commands = LinesStream::new(stdin.lines());
        let mut stdin_open = true;
        let mut first = true;

        loop {
            let restore_due = self.presenter.restore_due();

            tokio::select! {
                _ = ticker.tick() => {
                    let trigger = if first { Trigger::Initial } else { Trigger::Timer };
                    first = false;
                    self.start_load(trigger);
                }
                line = commands.next(), if stdin_open => match line {
                    Some(Ok(line)) if line.trim().is_empty() => {}
                    Some(Ok(line)) => match line.parse::<UserCommand>() {
                        Ok(command) => match self.handle_command(command) {
                            Ok(Flow::Quit) => break,
                            Ok(Flow::Continue) => {
                                if format == Format::Human {
                                    self.write_output(writer, format)?;
                                }
                            }
                            Err(e) => warn!("{e}"),
                        },
                        Err(e) => warn!("{e}"),
                    },
                    Some(Err(e)) => {
                        warn!("stdin closed: {e}");
                        stdin_open = false;
                    }
                    None => stdin_open = false,
                },
                Some(report) = inbox.loads.recv() => {
                    if self.apply_report(report) {
                        self.write_output(writer, format)?;
                    }
                }
                Some(result) = inbox.locations.recv() => {
                    self.apply_location(result);
                    if format == Format::Human {
                        self.write_output(writer, format)?;
                    }
                }
                Some(result) = inbox.plates.recv() => self.apply_plates(result),
                () = restore_timer(restore_due) => self.tick_restore(Instant::now()),
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    break;
                }
            }
        }

        info!(generation = ?self.current_generation(), "session ended");
        Ok(())
    }
}

async fn restore_timer(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
