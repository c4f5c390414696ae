//! Medication line parsing.
//!
//! Each line runs through an ordered cascade of (pattern, extractor) pairs;
//! the first pattern that matches decides the parse. A line nothing matches
//! becomes a bare name.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// One medication line after parsing, before drug resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedMedication {
    /// Line exactly as received (trimmed)
    pub raw_line: String,
    /// Hospital item code
    pub code: Option<String>,
    /// Name handed to the drug resolver
    pub name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    /// Parenthesized trailer (route, instructions)
    pub extra: Option<String>,
}

type Extractor = fn(&str, &Captures<'_>) -> ParsedMedication;

/// Pattern cascade, tried top to bottom.
static CASCADE: LazyLock<Vec<(Regex, Extractor)>> = LazyLock::new(|| {
    let entries: [(&str, Extractor); 3] = [
        // CODE - NAME QTY UNIT [(extra)]
        (
            r"(?i)^(?P<code>\S+)\s+-\s+(?P<name>.+?)\s+(?P<qty>\d+(?:\.\d+)?)\s*(?P<unit>[a-z%]+)(?:\s*\((?P<extra>[^)]*)\))?\s*$",
            coded_with_quantity,
        ),
        // CODE - NAME
        (r"(?i)^(?P<code>\S+)\s+-\s+(?P<name>.+)$", coded_name),
        // NAME QTY UNIT
        (
            r"(?i)^(?P<name>.+?)\s+(?P<qty>\d+(?:\.\d+)?)\s*(?P<unit>[a-z%]+)$",
            name_with_quantity,
        ),
    ];
    entries
        .into_iter()
        .map(|(pattern, extractor)| (Regex::new(pattern).expect("valid regex"), extractor))
        .collect()
});

/// Parse one line. Blank lines yield `None`.
pub fn parse_medication_line(line: &str) -> Option<ParsedMedication> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parsed = CASCADE
        .iter()
        .find_map(|(pattern, extractor)| pattern.captures(line).map(|caps| extractor(line, &caps)))
        .unwrap_or_else(|| bare_name(line));
    Some(parsed)
}

/// Split a medications cell into lines and parse each.
pub fn parse_medication_lines(raw: &str) -> Vec<ParsedMedication> {
    raw.lines().filter_map(parse_medication_line).collect()
}

fn coded_with_quantity(line: &str, caps: &Captures<'_>) -> ParsedMedication {
    ParsedMedication {
        raw_line: line.to_string(),
        code: capture(caps, "code"),
        name: capture(caps, "name").unwrap_or_default(),
        quantity: quantity(caps),
        unit: capture(caps, "unit").map(|u| u.to_uppercase()),
        extra: capture(caps, "extra"),
    }
}

fn coded_name(line: &str, caps: &Captures<'_>) -> ParsedMedication {
    ParsedMedication {
        raw_line: line.to_string(),
        code: capture(caps, "code"),
        name: capture(caps, "name").unwrap_or_default(),
        quantity: None,
        unit: None,
        extra: None,
    }
}

fn name_with_quantity(line: &str, caps: &Captures<'_>) -> ParsedMedication {
    ParsedMedication {
        raw_line: line.to_string(),
        code: None,
        name: capture(caps, "name").unwrap_or_default(),
        quantity: quantity(caps),
        unit: capture(caps, "unit").map(|u| u.to_uppercase()),
        extra: None,
    }
}

fn bare_name(line: &str) -> ParsedMedication {
    ParsedMedication {
        raw_line: line.to_string(),
        code: None,
        name: line.to_string(),
        quantity: None,
        unit: None,
        extra: None,
    }
}

fn capture(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn quantity(caps: &Captures<'_>) -> Option<f64> {
    caps.name("qty").and_then(|m| m.as_str().parse().ok())
}
