//! Visit date parsing for imported cells.
//!
//! Forms are tried in order: native date, spreadsheet serial, textual
//! day/month/year, then ISO `YYYY-MM-DD`.

use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;

use super::CellValue;

/// Years above this are Buddhist Era.
pub const BUDDHIST_ERA_THRESHOLD: i32 = 2400;
/// Buddhist Era minus Common Era.
pub const BUDDHIST_ERA_OFFSET: i32 = 543;
/// Largest serial that still lands in year 9999.
const MAX_SERIAL: f64 = 2_958_465.0;

static DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{2,4})\b").expect("valid regex")
});

/// Day zero of spreadsheet date serials.
pub fn spreadsheet_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

/// Parse a visit date cell. `None` when the cell holds nothing usable.
pub fn parse_visit_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Empty => None,
        CellValue::Date(date) => Some(*date),
        CellValue::Number(serial) => from_serial(*serial),
        CellValue::Text(text) => parse_date_text(text),
    }
}

/// Parse textual dates: serial digits, `d/m/y`, then ISO.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(serial) = text.parse::<f64>() {
        return from_serial(serial);
    }

    if let Some(caps) = DAY_MONTH_YEAR.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = normalize_year(caps[3].parse().ok()?);
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    text.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_SERIAL {
        return None;
    }
    spreadsheet_epoch().checked_add_days(Days::new(serial.trunc() as u64))
}

fn normalize_year(year: i32) -> i32 {
    if year > BUDDHIST_ERA_THRESHOLD {
        year - BUDDHIST_ERA_OFFSET
    } else if year < 100 {
        year + 2000
    } else {
        year
    }
}
