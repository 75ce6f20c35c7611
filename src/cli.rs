//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use chrono::FixedOffset;
use clap::{Args, Parser, Subcommand};

use crate::bands::ColorScheme;
use crate::config::{
    DEFAULT_REFRESH_SECS, DashboardConfig, LocationSource, PlatesSource, SchemeChangePolicy,
    clamp_refresh, parse_utc_offset,
};
use crate::filters::{BBox, FilterState, MagnitudeRange, PH_BOUNDS, TimeWindow};
use crate::map::Basemap;
use crate::models::LatLon;
use crate::output::Format;

/// Philippine earthquake dashboard for your terminal.
#[derive(Parser, Debug)]
#[command(name = "quakesph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the live dashboard (reloads periodically, reads commands on stdin)
    Watch(WatchArgs),

    /// Load once, print the result and exit
    Once(DashboardArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct DashboardArgs {
    /// Magnitude range: min-max
    #[arg(long, short = 'm', default_value = "0-10", value_parser = parse_magnitude)]
    pub magnitude: MagnitudeRange,

    /// Time window: hour, day, week, month
    #[arg(long, short = 'w', default_value = "day", value_parser = parse_window)]
    pub window: TimeWindow,

    /// Region bounding box: minlat,minlon,maxlat,maxlon
    #[arg(long, value_parser = parse_bbox)]
    pub bbox: Option<BBox>,

    /// Your position for the distance line: lat,lon
    #[arg(long, value_parser = parse_location, conflicts_with = "deny_location")]
    pub location: Option<LatLon>,

    /// Refuse location requests
    #[arg(long)]
    pub deny_location: bool,

    /// Colour scheme: light, dark
    #[arg(long, default_value = "light", value_parser = parse_scheme)]
    pub scheme: ColorScheme,

    /// Base map: auto, osm, google_hybrid, carto_light, carto_dark
    #[arg(long, default_value = "auto", value_parser = parse_basemap)]
    pub basemap: Basemap,

    /// Plate boundaries GeoJSON (URL or file path)
    #[arg(long, value_parser = parse_plates)]
    pub plates: Option<PlatesSource>,

    /// UTC offset for displayed times
    #[arg(long, default_value = "+08:00", value_parser = parse_utc_offset)]
    pub utc_offset: FixedOffset,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Arguments for the `watch` command.
#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub dashboard: DashboardArgs,

    /// Reload interval in seconds (minimum 30)
    #[arg(long, default_value_t = DEFAULT_REFRESH_SECS)]
    pub refresh_interval: u64,

    /// What a scheme change does: recolor, reload
    #[arg(long, default_value = "reload", value_parser = parse_scheme_policy)]
    pub scheme_policy: SchemeChangePolicy,
}

impl DashboardArgs {
    /// Fold the arguments into a session configuration.
    #[must_use]
    pub fn to_config(&self) -> DashboardConfig {
        let location = match (self.location, self.deny_location) {
            (Some(at), _) => LocationSource::Fixed(at),
            (None, true) => LocationSource::Denied,
            (None, false) => LocationSource::Unsupported,
        };

        DashboardConfig {
            bbox: self.bbox.unwrap_or(PH_BOUNDS),
            filter: FilterState {
                magnitude: self.magnitude,
                window: self.window,
            },
            scheme: self.scheme,
            basemap: self.basemap,
            plates: self.plates.clone().unwrap_or_default(),
            utc_offset: self.utc_offset,
            location,
            ..DashboardConfig::default()
        }
    }
}

impl WatchArgs {
    /// Session configuration, with the refresh interval clamped.
    #[must_use]
    pub fn to_config(&self) -> DashboardConfig {
        DashboardConfig {
            refresh_interval: clamp_refresh(self.refresh_interval),
            scheme_policy: self.scheme_policy,
            ..self.dashboard.to_config()
        }
    }
}

fn parse_format(s: &str) -> Result<Format, String> {
    s.parse()
}

fn parse_bbox(s: &str) -> Result<BBox, String> {
    s.parse()
}

fn parse_magnitude(s: &str) -> Result<MagnitudeRange, String> {
    s.parse()
}

fn parse_window(s: &str) -> Result<TimeWindow, String> {
    s.parse()
}

fn parse_location(s: &str) -> Result<LatLon, String> {
    s.parse()
}

fn parse_scheme(s: &str) -> Result<ColorScheme, String> {
    s.parse()
}

fn parse_scheme_policy(s: &str) -> Result<SchemeChangePolicy, String> {
    s.parse()
}

fn parse_basemap(s: &str) -> Result<Basemap, String> {
    s.parse()
}

fn parse_plates(s: &str) -> Result<PlatesSource, String> {
    s.parse()
}
