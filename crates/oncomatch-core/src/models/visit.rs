//! Visit and visit medication models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A treatment visit as stored after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    /// Store identifier
    pub id: i64,
    /// Visit number (natural key)
    pub vn: String,
    /// Hospital (patient) number
    pub hn: String,
    pub visit_date: NaiveDate,
    /// Normalized primary ICD-10 code
    pub primary_diagnosis: String,
    /// Normalized secondary codes joined with `|`
    pub secondary_diagnoses: Option<String>,
    /// History of present illness
    pub hpi: Option<String>,
    pub doctor_notes: Option<String>,
    /// Lazily resolved site, written once
    pub resolved_site_id: Option<i64>,
    /// Reviewer-confirmed protocol
    pub confirmed_protocol_id: Option<i64>,
    /// Reviewer-confirmed regimen
    pub confirmed_regimen_id: Option<i64>,
    /// Import batch that created the visit
    pub import_batch_id: Option<String>,
}

/// Fields needed to insert a visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewVisit {
    pub vn: String,
    pub hn: String,
    pub visit_date: NaiveDate,
    pub primary_diagnosis: String,
    pub secondary_diagnoses: Option<String>,
    pub hpi: Option<String>,
    pub doctor_notes: Option<String>,
    pub resolved_site_id: Option<i64>,
    pub import_batch_id: Option<String>,
}

impl NewVisit {
    /// Minimal visit with the required fields.
    pub fn new(vn: String, hn: String, visit_date: NaiveDate, primary_diagnosis: String) -> Self {
        Self {
            vn,
            hn,
            visit_date,
            primary_diagnosis,
            secondary_diagnoses: None,
            hpi: None,
            doctor_notes: None,
            resolved_site_id: None,
            import_batch_id: None,
        }
    }
}

/// A medication line belonging to a visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitMedication {
    pub id: i64,
    pub visit_id: i64,
    /// Line exactly as received
    pub raw_line: String,
    /// Hospital item code, if the line carried one
    pub parsed_code: Option<String>,
    pub parsed_name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    /// Null when no active drug matched
    pub resolved_drug_id: Option<i64>,
}

/// Fields needed to insert a medication line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMedication {
    pub raw_line: String,
    pub parsed_code: Option<String>,
    pub parsed_name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub resolved_drug_id: Option<i64>,
}

impl Visit {
    /// Secondary codes split on `|`, `,` and `;`.
    pub fn secondary_codes(&self) -> Vec<&str> {
        split_codes(self.secondary_diagnoses.as_deref().unwrap_or(""))
    }
}

/// Split a diagnosis list on any of `|`, `,`, `;`, dropping blanks.
///
/// Whitespace is not a delimiter: `"C78.7 Z51.0"` stays one entry.
pub fn split_codes(raw: &str) -> Vec<&str> {
    raw.split(['|', ',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
