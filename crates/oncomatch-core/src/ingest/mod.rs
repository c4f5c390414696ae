//! Visit ingestion: raw sheet rows → normalized visits and medication lines.
//!
//! Parsing is pure and never drops a row; a row missing a required field
//! keeps its error list so the whole sheet can be previewed before commit.
//! Commit records every row's outcome independently and never aborts on a
//! single row.

mod dates;
mod headers;
mod medication;

pub use dates::*;
pub use headers::*;
pub use medication::*;

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{Database, DbError};
use crate::models::{normalize_icd10, split_codes, NewMedication, NewVisit};
use crate::resolver::{DrugResolver, ResolverError, SiteResolver};

/// Ingestion errors. These stay inside a row's outcome during commit.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// A single cell as delivered by the sheet reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl CellValue {
    /// Trimmed text form, `None` when blank.
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            CellValue::Empty => return None,
            CellValue::Text(text) => text.trim().to_string(),
            // Numeric ids arrive as floats from most readers
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Date(date) => date.format("%Y-%m-%d").to_string(),
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn is_empty(&self) -> bool {
        self.as_text().is_none()
    }
}

/// A sheet: header row plus data rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

/// One data row after parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedRow {
    /// Spreadsheet row number (header is row 1)
    pub row_number: u32,
    pub hn: Option<String>,
    pub vn: Option<String>,
    pub visit_date: Option<NaiveDate>,
    /// Normalized primary code
    pub primary_diagnosis: Option<String>,
    /// Normalized secondary codes joined with `|`
    pub secondary_diagnoses: Option<String>,
    pub hpi: Option<String>,
    pub doctor_notes: Option<String>,
    pub medications: Vec<ParsedMedication>,
    pub errors: Vec<String>,
}

impl ParsedRow {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Insertable visit, if every required field is present.
    pub fn to_new_visit(&self) -> Option<NewVisit> {
        Some(NewVisit {
            vn: self.vn.clone()?,
            hn: self.hn.clone()?,
            visit_date: self.visit_date?,
            primary_diagnosis: self.primary_diagnosis.clone()?,
            secondary_diagnoses: self.secondary_diagnoses.clone(),
            hpi: self.hpi.clone(),
            doctor_notes: self.doctor_notes.clone(),
            resolved_site_id: None,
            import_batch_id: None,
        })
    }
}

/// Result of parsing a sheet without touching the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportPreview {
    pub rows: Vec<ParsedRow>,
    pub valid_rows: u32,
    pub error_rows: u32,
    /// Headers no alias matched
    pub unmapped_headers: Vec<String>,
}

/// A recorded, non-fatal row failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowError {
    pub row_number: u32,
    pub vn: Option<String>,
    pub message: String,
}

/// Medication lines of an imported row that did not resolve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnresolvedMedications {
    pub row_number: u32,
    pub vn: String,
    pub count: u32,
}

/// Aggregate outcome of a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportSummary {
    /// Stamped on every visit this commit inserted
    pub batch_id: String,
    pub total_rows: u32,
    pub imported_rows: u32,
    pub skipped_rows: u32,
    pub errors: Vec<RowError>,
    pub unresolved_medications: Vec<UnresolvedMedications>,
}

/// Parse every non-blank row of a sheet.
pub fn parse_sheet(sheet: &RawSheet) -> Vec<ParsedRow> {
    let columns = map_headers(&sheet.headers);
    sheet
        .rows
        .iter()
        .enumerate()
        .filter(|(_, cells)| !cells.iter().all(CellValue::is_empty))
        .map(|(index, cells)| parse_row(index as u32 + 2, cells, &columns))
        .collect()
}

/// Parse a sheet for review. Pure.
pub fn preview(sheet: &RawSheet) -> ImportPreview {
    let rows = parse_sheet(sheet);
    let valid_rows = rows.iter().filter(|row| row.is_valid()).count() as u32;
    let error_rows = rows.len() as u32 - valid_rows;
    let unmapped_headers = sheet
        .headers
        .iter()
        .filter(|header| canonical_field(header).is_none())
        .cloned()
        .collect();

    ImportPreview {
        rows,
        valid_rows,
        error_rows,
        unmapped_headers,
    }
}

/// Re-parse and persist a sheet, one row at a time.
pub fn commit(db: &mut Database, sheet: &RawSheet) -> ImportSummary {
    let batch_id = Uuid::new_v4().to_string();
    let rows = parse_sheet(sheet);

    let mut summary = ImportSummary {
        batch_id: batch_id.clone(),
        total_rows: rows.len() as u32,
        imported_rows: 0,
        skipped_rows: 0,
        errors: Vec::new(),
        unresolved_medications: Vec::new(),
    };
    let mut seen_vns: HashSet<String> = HashSet::new();

    for row in &rows {
        let vn = row.vn.clone();
        let record_error = |summary: &mut ImportSummary, message: String| {
            summary.errors.push(RowError {
                row_number: row.row_number,
                vn: vn.clone(),
                message,
            });
        };

        let Some(mut visit) = row.to_new_visit().filter(|_| row.is_valid()) else {
            for message in &row.errors {
                record_error(&mut summary, message.clone());
            }
            summary.skipped_rows += 1;
            debug!(row = row.row_number, "row skipped: invalid");
            continue;
        };

        if seen_vns.contains(&visit.vn) {
            record_error(&mut summary, format!("Duplicate VN {} within this import", visit.vn));
            summary.skipped_rows += 1;
            continue;
        }

        visit.import_batch_id = Some(batch_id.clone());
        match commit_row(db, &visit, &row.medications) {
            Ok(RowOutcome::Inserted { unresolved }) => {
                seen_vns.insert(visit.vn.clone());
                summary.imported_rows += 1;
                if unresolved > 0 {
                    summary.unresolved_medications.push(UnresolvedMedications {
                        row_number: row.row_number,
                        vn: visit.vn.clone(),
                        count: unresolved,
                    });
                }
            }
            Ok(RowOutcome::Duplicate) => {
                record_error(&mut summary, format!("Duplicate VN {}: visit already exists", visit.vn));
                summary.skipped_rows += 1;
            }
            Err(e) => {
                warn!(row = row.row_number, vn = %visit.vn, error = %e, "row failed to import");
                record_error(&mut summary, e.to_string());
                summary.skipped_rows += 1;
            }
        }
    }

    info!(
        batch_id = %summary.batch_id,
        total = summary.total_rows,
        imported = summary.imported_rows,
        skipped = summary.skipped_rows,
        "import committed"
    );
    summary
}

enum RowOutcome {
    Inserted { unresolved: u32 },
    Duplicate,
}

fn commit_row(
    db: &mut Database,
    visit: &NewVisit,
    medications: &[ParsedMedication],
) -> IngestResult<RowOutcome> {
    if db.visit_exists(&visit.vn)? {
        return Ok(RowOutcome::Duplicate);
    }

    let mut visit = visit.clone();
    visit.resolved_site_id = SiteResolver::new(db).resolve(&visit.primary_diagnosis)?;

    let drug_resolver = DrugResolver::new(db);
    let mut new_medications = Vec::with_capacity(medications.len());
    let mut unresolved = 0u32;
    for med in medications {
        let resolved_drug_id = drug_resolver.resolve(&med.name)?;
        if resolved_drug_id.is_none() {
            unresolved += 1;
        }
        new_medications.push(NewMedication {
            raw_line: med.raw_line.clone(),
            parsed_code: med.code.clone(),
            parsed_name: med.name.clone(),
            quantity: med.quantity,
            unit: med.unit.clone(),
            resolved_drug_id,
        });
    }

    let visit_id = db.insert_visit_with_medications(&visit, &new_medications)?;
    debug!(vn = %visit.vn, visit_id, unresolved, "visit imported");
    Ok(RowOutcome::Inserted { unresolved })
}

fn parse_row(row_number: u32, cells: &[CellValue], columns: &HashMap<Field, usize>) -> ParsedRow {
    let text = |field: Field| cell_at(cells, columns, field).as_text();

    let mut errors = Vec::new();
    let mut require = |field: Field, value: Option<String>| {
        if value.is_none() {
            errors.push(format!("Missing required field: {}", field.as_str()));
        }
        value
    };

    let hn = require(Field::Hn, text(Field::Hn));
    let vn = require(Field::Vn, text(Field::Vn));
    let primary_diagnosis = require(
        Field::PrimaryDiagnosis,
        text(Field::PrimaryDiagnosis)
            .map(|code| normalize_icd10(&code))
            .filter(|code| !code.is_empty()),
    );

    let date_cell = cell_at(cells, columns, Field::VisitDate);
    let visit_date = parse_visit_date(date_cell);
    if visit_date.is_none() {
        match date_cell.as_text() {
            Some(raw) => errors.push(format!("Unparseable visit date: '{raw}'")),
            None => errors.push(format!("Missing required field: {}", Field::VisitDate.as_str())),
        }
    }

    let secondary_diagnoses = text(Field::SecondaryDiagnoses)
        .map(|raw| {
            split_codes(&raw)
                .into_iter()
                .map(normalize_icd10)
                .filter(|code| !code.is_empty())
                .collect::<Vec<_>>()
                .join("|")
        })
        .filter(|joined| !joined.is_empty());

    let medications = text(Field::MedicationsRaw)
        .map(|raw| parse_medication_lines(&raw))
        .unwrap_or_default();

    ParsedRow {
        row_number,
        hn,
        vn,
        visit_date,
        primary_diagnosis,
        secondary_diagnoses,
        hpi: text(Field::Hpi),
        doctor_notes: text(Field::DoctorNotes),
        medications,
        errors,
    }
}

fn cell_at<'a>(cells: &'a [CellValue], columns: &HashMap<Field, usize>, field: Field) -> &'a CellValue {
    const EMPTY: &CellValue = &CellValue::Empty;
    columns
        .get(&field)
        .and_then(|&index| cells.get(index))
        .unwrap_or(EMPTY)
}
