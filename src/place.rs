//! Place-name casing.
//!
//! EMSC reports Flinn-Engdahl region names in upper case
//! ("MINDANAO, PHILIPPINES"); those read better title-cased.

use crate::models::Agency;

/// Words kept lower case unless they open or close the label.
const MINOR_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "en", "for", "if", "in", "of", "on", "or", "per",
    "the", "to", "v", "vs", "with", "via", "km", "mi",
];

fn is_minor(word: &str) -> bool {
    MINOR_WORDS.iter().any(|m| m.eq_ignore_ascii_case(word))
}

/// Whether a raw label from `agency` should be title-cased.
#[must_use]
pub fn needs_title_case(label: &str, agency: Agency) -> bool {
    agency.emits_region_codes() || label == label.to_uppercase()
}

/// Title-case a label, keeping minor words lower case mid-string.
///
/// Words are split on single spaces; hyphenated words have each segment
/// capitalized. Punctuation stays attached, so `"of,"` is not a minor word.
#[must_use]
pub fn to_title_case(label: &str) -> String {
    let lower = label.to_lowercase();
    let words: Vec<&str> = lower.split(' ').collect();
    let last = words.len().saturating_sub(1);

    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            if i != 0 && i != last && is_minor(word) {
                (*word).to_string()
            } else {
                word.split('-')
                    .map(capitalize)
                    .collect::<Vec<_>>()
                    .join("-")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Apply casing rules to a raw label.
#[must_use]
pub fn normalize_place(label: &str, agency: Agency) -> String {
    if needs_title_case(label, agency) {
        to_title_case(label)
    } else {
        label.to_string()
    }
}
