//! Magnitude bands: colour mapping and legend state.

use crate::filters::MagnitudeRange;
use crate::models::Event;

/// Colour for magnitudes no band covers.
pub const DEFAULT_COLOR: &str = "#999";

/// Ambient colour scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorScheme {
    #[default]
    Light,
    Dark,
}

impl std::str::FromStr for ColorScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(format!("unknown color scheme: {s} (expected: light, dark)")),
        }
    }
}

/// A `{min, max, color}` magnitude range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
    pub color: &'static str,
}

impl Band {
    #[must_use]
    pub fn contains(&self, magnitude: f64) -> bool {
        magnitude >= self.min && magnitude <= self.max
    }

    /// The band as a filter range (legend click).
    #[must_use]
    pub fn range(&self) -> MagnitudeRange {
        MagnitudeRange {
            min: self.min,
            max: self.max,
        }
    }
}

// (min, max, light, dark)
const BAND_TABLE: [(f64, f64, &str, &str); 5] = [
    (0.0, 3.9, "#5DADE2", "#3498DB"),
    (4.0, 4.9, "#2ECC71", "#27AE60"),
    (5.0, 5.9, "#F1C40F", "#F39C12"),
    (6.0, 6.9, "#E67E22", "#D35400"),
    (7.0, 10.0, "#C0392B", "#E74C3C"),
];

/// Ordered band list; the first matching band wins.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSet {
    bands: Vec<Band>,
}

impl BandSet {
    /// Bands coloured for `scheme`.
    #[must_use]
    pub fn for_scheme(scheme: ColorScheme) -> Self {
        let bands = BAND_TABLE
            .iter()
            .map(|&(min, max, light, dark)| Band {
                min,
                max,
                color: match scheme {
                    ColorScheme::Light => light,
                    ColorScheme::Dark => dark,
                },
            })
            .collect();
        Self { bands }
    }

    /// Recolour in place for a new scheme.
    pub fn recolor(&mut self, scheme: ColorScheme) {
        *self = Self::for_scheme(scheme);
    }

    #[must_use]
    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Band> {
        self.bands.get(index)
    }

    /// Colour for a magnitude.
    #[must_use]
    pub fn color_for(&self, magnitude: f64) -> &'static str {
        self.bands
            .iter()
            .find(|b| b.contains(magnitude))
            .map_or(DEFAULT_COLOR, |b| b.color)
    }

    /// Legend highlighting: one flag per band, set when any event falls in it.
    #[must_use]
    pub fn legend_activity(&self, events: &[Event]) -> Vec<bool> {
        self.bands
            .iter()
            .map(|b| events.iter().any(|e| b.contains(e.magnitude)))
            .collect()
    }
}

impl Default for BandSet {
    fn default() -> Self {
        Self::for_scheme(ColorScheme::default())
    }
}
