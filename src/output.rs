//! Output formatters for the dashboard.
//!
//! Supports the human-readable dashboard (with colors), JSON, and NDJSON.

use std::io::{self, Write};

use chrono::{DateTime, FixedOffset, Utc};

use crate::filters::{FilterState, TimeWindow};
use crate::map::BaseLayer;
use crate::models::{Event, LatLon, OutputEvent};
use crate::present::{LegendEntry, TableRow};
use crate::proximity::DistanceStatus;

// ANSI escape codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[91m";

const ICON_QUAKE: &str = "🌍";
const SWATCH: &str = "■";

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable dashboard (default)
    #[default]
    Human,
    /// JSON array
    Json,
    /// Newline-delimited JSON (one object per line)
    Ndjson,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(format!("unknown format: {s} (expected: human, json, ndjson)")),
        }
    }
}

/// Format epoch milliseconds as `DD MonthName YYYY hh:mm AM/PM` at `offset`.
#[must_use]
pub fn format_quake_time(epoch_ms: i64, offset: FixedOffset) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms).map_or_else(
        || "Unknown time".to_string(),
        |t| {
            t.with_timezone(&offset)
                .format("%d %B %Y %I:%M %p")
                .to_string()
        },
    )
}

/// Escape text for embedding in popup HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// The quake-count heading for `count` events in `window`.
#[must_use]
pub fn quake_count_label(count: usize, window: TimeWindow) -> String {
    let period = window.label();
    match count {
        0 => format!("No Quakes Found {period}"),
        1 => format!("1 Quake Found {period}"),
        n => format!("{n} Quakes Found {period}"),
    }
}

/// Text of the distance status line, if there is one.
#[must_use]
pub fn distance_text(status: &DistanceStatus) -> Option<String> {
    match status {
        DistanceStatus::Blank => None,
        DistanceStatus::Message(m) => Some((*m).to_string()),
        DistanceStatus::Distance {
            magnitude,
            distance_km,
            ..
        } => Some(format!(
            "Latest Magnitude {magnitude:.1} ⟷ {distance_km:.0} km Away"
        )),
    }
}

/// Truecolor foreground escape for a `#rgb` or `#rrggbb` colour.
fn fg(hex: &str) -> String {
    let digits = hex.trim_start_matches('#');
    let expanded: String = if digits.len() == 3 {
        digits.chars().flat_map(|c| [c, c]).collect()
    } else {
        digits.to_string()
    };

    let channel = |i: usize| {
        expanded
            .get(i..i + 2)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
    };
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => format!("\x1b[38;2;{r};{g};{b}m"),
        _ => String::new(),
    }
}

/// OSC 8 terminal hyperlink.
fn hyperlink(url: &str, text: &str) -> String {
    format!("\x1b]8;;{url}\x1b\\{text}\x1b]8;;\x1b\\")
}

/// Everything the human dashboard shows.
#[derive(Debug)]
pub struct Dashboard<'a> {
    pub filter: &'a FilterState,
    pub rows: &'a [TableRow],
    pub legend: &'a [LegendEntry],
    /// Feed or refresh problem, if any
    pub status: Option<&'a str>,
    pub distance: &'a DistanceStatus,
    /// Map center and zoom
    pub camera: Option<(LatLon, f64)>,
    pub base_layer: Option<BaseLayer>,
}

/// Write the table of events, newest first.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_table<W: Write>(writer: &mut W, rows: &[TableRow]) -> io::Result<()> {
    writeln!(
        writer,
        "{DIM}{:>3} │ {:<26} │ {:>4} │ {:>8} │ Location{RESET}",
        "#", "Time", "Mag", "Depth"
    )?;
    for (i, row) in rows.iter().enumerate() {
        let color = fg(row.color);
        let place = match &row.url {
            Some(url) => hyperlink(url, &row.place),
            None => row.place.clone(),
        };
        writeln!(
            writer,
            "{i:>3} │ {:<26} │ {color}{BOLD}{:>4.1}{RESET} │ {:>5.1} km │ {place}",
            row.time, row.magnitude, row.depth_km
        )?;
    }
    Ok(())
}

/// Write the magnitude legend. Bands with no visible events are dimmed.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_legend<W: Write>(writer: &mut W, legend: &[LegendEntry]) -> io::Result<()> {
    let entries: Vec<String> = legend
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let swatch = format!("{}{SWATCH}{RESET}", fg(entry.color));
            if entry.active {
                format!("[{i}] {swatch} {}", entry.range)
            } else {
                format!("{DIM}[{i}]{RESET} {swatch} {DIM}{}{RESET}", entry.range)
            }
        })
        .collect();
    writeln!(writer, "{}", entries.join("  "))
}

/// Write the full dashboard.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_dashboard<W: Write>(writer: &mut W, view: &Dashboard<'_>) -> io::Result<()> {
    writeln!(
        writer,
        "{ICON_QUAKE} {BOLD}{}{RESET} {DIM}(magnitude {}){RESET}",
        quake_count_label(view.rows.len(), view.filter.window),
        view.filter.magnitude
    )?;
    if let Some(status) = view.status {
        writeln!(writer, "{RED}{status}{RESET}")?;
    }
    if let Some(text) = distance_text(view.distance) {
        match view.distance {
            DistanceStatus::Distance { color, .. } => {
                writeln!(writer, "{}{text}{RESET}", fg(color))?;
            }
            _ => writeln!(writer, "{DIM}{text}{RESET}")?,
        }
    }
    write_legend(writer, view.legend)?;
    write_table(writer, view.rows)?;
    if let Some((center, zoom)) = view.camera {
        writeln!(
            writer,
            "{DIM}map: {:.2}, {:.2} at zoom {zoom:.1}{RESET}",
            center.latitude, center.longitude
        )?;
    }
    if let Some(layer) = view.base_layer {
        writeln!(writer, "{DIM}tiles: {}{RESET}", layer.tile_url())?;
    }
    Ok(())
}

/// Write events as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<W: Write>(writer: &mut W, events: &[Event]) -> io::Result<()> {
    let output: Vec<OutputEvent> = events.iter().map(OutputEvent::from).collect();
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// Write events as newline-delimited JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_ndjson<W: Write>(writer: &mut W, events: &[Event]) -> io::Result<()> {
    for event in events {
        let output = OutputEvent::from(event);
        let json = serde_json::to_string(&output)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{json}")?;
    }
    Ok(())
}
