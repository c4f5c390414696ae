//! OncoMatch Core Library
//!
//! Resolution and matching engine for insurer-mandated oncology visit records.
//!
//! # Architecture
//!
//! ```text
//! Raw sheet rows ──► Ingestion ──► {Site Resolver, Drug Resolver} ──► Visit + Medications
//!                                                                          │
//!                                          ┌───────────────────────────────┤
//!                                          ▼                               ▼
//!                                   Stage Inference ──────────────► Match Engine ◄── Formulary
//!                                                                          │
//!                                                     ranked protocols (advisory, reviewer confirms)
//! ```
//!
//! # Modules
//!
//! - [`db`]: SQLite store for the reference catalog and visits
//! - [`models`]: Domain types (sites, drugs, protocols, visits, match results)
//! - [`resolver`]: ICD-10 → site and free-text → drug resolution
//! - [`ingest`]: Sheet parsing, preview and commit
//! - [`inference`]: Stage and modality inference
//! - [`formulary`]: Per-protocol approved drug names
//! - [`matching`]: Protocol scoring and ranking

pub mod db;
pub mod formulary;
pub mod inference;
pub mod ingest;
pub mod matching;
pub mod models;
pub mod resolver;

// Re-export commonly used types
pub use db::Database;
pub use formulary::{FormularySource, StaticFormulary};
pub use inference::infer_stage;
pub use ingest::{CellValue, ImportPreview, ImportSummary, RawSheet};
pub use matching::{MatchEngine, MatchInput};
pub use models::{BatchSummary, MatchKind, MatchOutcome, MatchResult, Stage, StageInference};
pub use resolver::{DrugResolver, SiteResolver};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum OncoMatchError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<db::DbError> for OncoMatchError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => OncoMatchError::InvalidInput(format!("Not found: {what}")),
            other => OncoMatchError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OncoMatchError {
    fn from(e: serde_json::Error) -> Self {
        OncoMatchError::SerializationError(e.to_string())
    }
}

impl From<resolver::ResolverError> for OncoMatchError {
    fn from(e: resolver::ResolverError) -> Self {
        OncoMatchError::DatabaseError(e.to_string())
    }
}

impl From<matching::MatchError> for OncoMatchError {
    fn from(e: matching::MatchError) -> Self {
        match e {
            matching::MatchError::BatchTooLarge { .. } => OncoMatchError::InvalidInput(e.to_string()),
            other => OncoMatchError::DatabaseError(other.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for OncoMatchError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        OncoMatchError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<OncoMatchCore>, OncoMatchError> {
    let db = Database::open(&path)?;
    Ok(Arc::new(OncoMatchCore::new(db)))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<OncoMatchCore>, OncoMatchError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(OncoMatchCore::new(db)))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine handle for FFI.
#[derive(uniffi::Object)]
pub struct OncoMatchCore {
    db: Arc<Mutex<Database>>,
    formulary: Mutex<StaticFormulary>,
}

impl OncoMatchCore {
    fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            formulary: Mutex::new(StaticFormulary::new()),
        }
    }

    fn outcome(&self, vn: &str) -> Result<MatchOutcome, OncoMatchError> {
        let db = self.db.lock()?;
        let formulary = self.formulary.lock()?;
        Ok(MatchEngine::new(&db, &*formulary).match_visit(vn)?)
    }
}

#[uniffi::export]
impl OncoMatchCore {
    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve an ICD-10 code to a cancer site id.
    pub fn resolve_site(&self, icd_code: String) -> Result<Option<i64>, OncoMatchError> {
        let db = self.db.lock()?;
        Ok(SiteResolver::new(&db).resolve(&icd_code)?)
    }

    /// Resolve a free-text medication name to a drug id.
    pub fn resolve_drug(&self, name: String) -> Result<Option<i64>, OncoMatchError> {
        let db = self.db.lock()?;
        Ok(DrugResolver::new(&db).resolve(&name)?)
    }

    /// Similar active drug names for an unresolved medication.
    pub fn suggest_drugs(
        &self,
        name: String,
        limit: u32,
    ) -> Result<Vec<FfiDrugSuggestion>, OncoMatchError> {
        let db = self.db.lock()?;
        let suggestions = DrugResolver::new(&db).suggest(&name, limit as usize)?;
        Ok(suggestions.into_iter().map(|s| s.into()).collect())
    }

    /// Stage and modality inference for a secondary diagnosis string.
    pub fn infer_stage(&self, secondary_diagnoses: Option<String>) -> FfiStageInference {
        infer_stage(secondary_diagnoses.as_deref()).into()
    }

    // =========================================================================
    // Matching
    // =========================================================================

    /// Rank protocols for a visit.
    pub fn match_visit(&self, vn: String) -> Result<FfiMatchOutcome, OncoMatchError> {
        Ok(self.outcome(&vn)?.into())
    }

    /// Rank protocols for a visit, as JSON for prompt builders.
    pub fn match_visit_json(&self, vn: String) -> Result<String, OncoMatchError> {
        Ok(serde_json::to_string(&self.outcome(&vn)?)?)
    }

    /// Match up to 20 visits; failed visits carry no summary.
    pub fn match_visits_batch(&self, vns: Vec<String>) -> Result<Vec<FfiBatchEntry>, OncoMatchError> {
        let db = self.db.lock()?;
        let formulary = self.formulary.lock()?;
        let batch = MatchEngine::new(&db, &*formulary).match_visits_batch(&vns)?;
        Ok(batch
            .into_iter()
            .map(|(vn, summary)| FfiBatchEntry {
                vn,
                summary: summary.map(|s| s.into()),
            })
            .collect())
    }

    /// Replace the approved drug names of one protocol.
    pub fn set_formulary(&self, protocol_code: String, drug_names: Vec<String>) -> Result<(), OncoMatchError> {
        let mut formulary = self.formulary.lock()?;
        formulary.set(&protocol_code, drug_names);
        Ok(())
    }

    /// Record the reviewer's confirmed protocol for a visit.
    pub fn confirm_visit(
        &self,
        vn: String,
        protocol_id: i64,
        regimen_id: Option<i64>,
    ) -> Result<(), OncoMatchError> {
        let db = self.db.lock()?;
        db.confirm_visit(&vn, protocol_id, regimen_id)?;
        Ok(())
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Parse a sheet without writing anything.
    pub fn preview_import(&self, sheet: FfiRawSheet) -> FfiImportPreview {
        let sheet: RawSheet = sheet.into();
        ingest::preview(&sheet).into()
    }

    /// Parse and persist a sheet, recording per-row failures.
    pub fn commit_import(&self, sheet: FfiRawSheet) -> Result<FfiImportSummary, OncoMatchError> {
        let sheet: RawSheet = sheet.into();
        let mut db = self.db.lock()?;
        Ok(ingest::commit(&mut db, &sheet).into())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe drug suggestion.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDrugSuggestion {
    pub drug_id: i64,
    pub name: String,
    pub similarity: f64,
}

impl From<resolver::DrugSuggestion> for FfiDrugSuggestion {
    fn from(s: resolver::DrugSuggestion) -> Self {
        Self {
            drug_id: s.drug_id,
            name: s.name,
            similarity: s.similarity,
        }
    }
}

/// FFI-safe stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiStage {
    Early,
    LocallyAdvanced,
    Metastatic,
}

impl From<Stage> for FfiStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Early => FfiStage::Early,
            Stage::LocallyAdvanced => FfiStage::LocallyAdvanced,
            Stage::Metastatic => FfiStage::Metastatic,
        }
    }
}

/// FFI-safe modality flags.
#[derive(Debug, Clone, Copy, uniffi::Record)]
pub struct FfiModality {
    pub radiation: bool,
    pub chemotherapy: bool,
    pub immunotherapy: bool,
}

impl From<models::ModalityFlags> for FfiModality {
    fn from(m: models::ModalityFlags) -> Self {
        Self {
            radiation: m.radiation,
            chemotherapy: m.chemotherapy,
            immunotherapy: m.immunotherapy,
        }
    }
}

/// FFI-safe stage inference.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStageInference {
    pub inferred_stage: FfiStage,
    pub has_distant_mets: bool,
    pub has_node_involvement: bool,
    pub modality: FfiModality,
    pub reasons: Vec<String>,
}

impl From<StageInference> for FfiStageInference {
    fn from(s: StageInference) -> Self {
        Self {
            inferred_stage: s.inferred_stage.into(),
            has_distant_mets: s.has_distant_mets,
            has_node_involvement: s.has_node_involvement,
            modality: s.modality.into(),
            reasons: s.reasons,
        }
    }
}

/// FFI-safe result kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiMatchKind {
    Protocol,
    NonProtocol,
    SiteUnresolved,
}

impl From<MatchKind> for FfiMatchKind {
    fn from(kind: MatchKind) -> Self {
        match kind {
            MatchKind::Protocol => FfiMatchKind::Protocol,
            MatchKind::NonProtocol => FfiMatchKind::NonProtocol,
            MatchKind::SiteUnresolved => FfiMatchKind::SiteUnresolved,
        }
    }
}

/// FFI-safe best regimen summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRegimenSummary {
    pub regimen_id: i64,
    pub regimen_code: String,
    pub regimen_name: String,
    pub line_of_therapy: Option<i64>,
    pub is_preferred: bool,
    pub matched_drugs: u32,
    pub total_drugs: u32,
    pub drug_match_ratio: u32,
}

impl From<models::RegimenSummary> for FfiRegimenSummary {
    fn from(r: models::RegimenSummary) -> Self {
        Self {
            regimen_id: r.regimen_id,
            regimen_code: r.regimen_code,
            regimen_name: r.regimen_name,
            line_of_therapy: r.line_of_therapy,
            is_preferred: r.is_preferred,
            matched_drugs: r.matched_drugs,
            total_drugs: r.total_drugs,
            drug_match_ratio: r.drug_match_ratio,
        }
    }
}

/// FFI-safe match result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMatchResult {
    pub kind: FfiMatchKind,
    pub protocol_id: i64,
    pub protocol_code: String,
    pub protocol_name: String,
    pub score: i64,
    pub best_regimen: Option<FfiRegimenSummary>,
    pub explanations: Vec<String>,
    pub stage_match: bool,
    pub modality: FfiModality,
    pub formulary_ratio: Option<u32>,
}

impl From<MatchResult> for FfiMatchResult {
    fn from(r: MatchResult) -> Self {
        Self {
            kind: r.kind.into(),
            protocol_id: r.protocol_id,
            protocol_code: r.protocol_code,
            protocol_name: r.protocol_name,
            score: r.score,
            best_regimen: r.best_regimen.map(|b| b.into()),
            explanations: r.explanations,
            stage_match: r.stage_match,
            modality: r.modality.into(),
            formulary_ratio: r.formulary_ratio,
        }
    }
}

/// FFI-safe match outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMatchOutcome {
    pub vn: String,
    pub results: Vec<FfiMatchResult>,
    pub stage_inference: Option<FfiStageInference>,
    pub note: Option<String>,
}

impl From<MatchOutcome> for FfiMatchOutcome {
    fn from(o: MatchOutcome) -> Self {
        Self {
            vn: o.vn,
            results: o.results.into_iter().map(|r| r.into()).collect(),
            stage_inference: o.stage_inference.map(|s| s.into()),
            note: o.note,
        }
    }
}

/// FFI-safe batch summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBatchSummary {
    pub result_count: u32,
    pub top_protocol_code: Option<String>,
    pub top_score: Option<i64>,
    pub inferred_stage: Option<FfiStage>,
    pub has_non_protocol: bool,
    pub note: Option<String>,
}

impl From<BatchSummary> for FfiBatchSummary {
    fn from(s: BatchSummary) -> Self {
        Self {
            result_count: s.result_count,
            top_protocol_code: s.top_protocol_code,
            top_score: s.top_score,
            inferred_stage: s.inferred_stage.map(|st| st.into()),
            has_non_protocol: s.has_non_protocol,
            note: s.note,
        }
    }
}

/// One slot of a batch; `summary` is absent when the visit failed.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBatchEntry {
    pub vn: String,
    pub summary: Option<FfiBatchSummary>,
}

/// FFI-safe sheet cell. Dates travel as ISO `YYYY-MM-DD`.
#[derive(Debug, Clone, uniffi::Enum)]
pub enum FfiCell {
    Empty,
    Text { value: String },
    Number { value: f64 },
    Date { iso: String },
}

impl From<FfiCell> for CellValue {
    fn from(cell: FfiCell) -> Self {
        match cell {
            FfiCell::Empty => CellValue::Empty,
            FfiCell::Text { value } => CellValue::Text(value),
            FfiCell::Number { value } => CellValue::Number(value),
            FfiCell::Date { iso } => match NaiveDate::parse_from_str(&iso, "%Y-%m-%d") {
                Ok(date) => CellValue::Date(date),
                Err(_) => CellValue::Text(iso),
            },
        }
    }
}

/// FFI-safe sheet.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<FfiCell>>,
}

impl From<FfiRawSheet> for RawSheet {
    fn from(sheet: FfiRawSheet) -> Self {
        RawSheet {
            headers: sheet.headers,
            rows: sheet
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(|c| c.into()).collect())
                .collect(),
        }
    }
}

/// FFI-safe parsed medication line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiParsedMedication {
    pub raw_line: String,
    pub code: Option<String>,
    pub name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
}

impl From<ingest::ParsedMedication> for FfiParsedMedication {
    fn from(m: ingest::ParsedMedication) -> Self {
        Self {
            raw_line: m.raw_line,
            code: m.code,
            name: m.name,
            quantity: m.quantity,
            unit: m.unit,
        }
    }
}

/// FFI-safe parsed row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiParsedRow {
    pub row_number: u32,
    pub hn: Option<String>,
    pub vn: Option<String>,
    pub visit_date: Option<String>,
    pub primary_diagnosis: Option<String>,
    pub secondary_diagnoses: Option<String>,
    pub medications: Vec<FfiParsedMedication>,
    pub errors: Vec<String>,
}

impl From<ingest::ParsedRow> for FfiParsedRow {
    fn from(row: ingest::ParsedRow) -> Self {
        Self {
            row_number: row.row_number,
            hn: row.hn,
            vn: row.vn,
            visit_date: row.visit_date.map(|d| d.format("%Y-%m-%d").to_string()),
            primary_diagnosis: row.primary_diagnosis,
            secondary_diagnoses: row.secondary_diagnoses,
            medications: row.medications.into_iter().map(|m| m.into()).collect(),
            errors: row.errors,
        }
    }
}

/// FFI-safe import preview.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiImportPreview {
    pub rows: Vec<FfiParsedRow>,
    pub valid_rows: u32,
    pub error_rows: u32,
    pub unmapped_headers: Vec<String>,
}

impl From<ImportPreview> for FfiImportPreview {
    fn from(p: ImportPreview) -> Self {
        Self {
            rows: p.rows.into_iter().map(|r| r.into()).collect(),
            valid_rows: p.valid_rows,
            error_rows: p.error_rows,
            unmapped_headers: p.unmapped_headers,
        }
    }
}

/// FFI-safe row error.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRowError {
    pub row_number: u32,
    pub vn: Option<String>,
    pub message: String,
}

/// FFI-safe import summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiImportSummary {
    pub batch_id: String,
    pub total_rows: u32,
    pub imported_rows: u32,
    pub skipped_rows: u32,
    pub errors: Vec<FfiRowError>,
    /// (row number, count) of rows with unresolved medication lines
    pub unresolved_rows: Vec<FfiUnresolvedRow>,
}

/// FFI-safe unresolved medication count.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUnresolvedRow {
    pub row_number: u32,
    pub vn: String,
    pub count: u32,
}

impl From<ImportSummary> for FfiImportSummary {
    fn from(s: ImportSummary) -> Self {
        Self {
            batch_id: s.batch_id,
            total_rows: s.total_rows,
            imported_rows: s.imported_rows,
            skipped_rows: s.skipped_rows,
            errors: s
                .errors
                .into_iter()
                .map(|e| FfiRowError {
                    row_number: e.row_number,
                    vn: e.vn,
                    message: e.message,
                })
                .collect(),
            unresolved_rows: s
                .unresolved_medications
                .into_iter()
                .map(|u| FfiUnresolvedRow {
                    row_number: u.row_number,
                    vn: u.vn,
                    count: u.count,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FfiCell {
        FfiCell::Text { value: s.to_string() }
    }

    #[test]
    fn test_ffi_import_and_match_roundtrip() {
        let core = open_database_in_memory().unwrap();
        {
            let db = core.db.lock().unwrap();
            db.upsert_site(&models::CancerSite::new(1, "BREAST".into(), "Breast".into()))
                .unwrap();
            db.upsert_prefix_mapping(&models::Icd10PrefixMapping::new("C50", 1))
                .unwrap();
        }

        let sheet = FfiRawSheet {
            headers: vec!["HN".into(), "VN".into(), "Date".into(), "Diagnosis".into()],
            rows: vec![vec![
                text("H1"),
                text("V1"),
                FfiCell::Date { iso: "2024-03-15".into() },
                text("C50.9"),
            ]],
        };

        let preview = core.preview_import(sheet.clone());
        assert_eq!(preview.valid_rows, 1);
        assert_eq!(preview.rows[0].visit_date.as_deref(), Some("2024-03-15"));

        let summary = core.commit_import(sheet).unwrap();
        assert_eq!(summary.imported_rows, 1);
        assert_eq!(core.resolve_site("C50.9".into()).unwrap(), Some(1));

        // No drugs, no radiation: nothing to match against
        let outcome = core.match_visit("V1".into()).unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.note.is_some());
    }

    #[test]
    fn test_batch_limit_is_invalid_input() {
        let core = open_database_in_memory().unwrap();
        let vns = (0..25).map(|i| format!("V{i}")).collect();
        assert!(matches!(
            core.match_visits_batch(vns),
            Err(OncoMatchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_confirm_unknown_visit_is_invalid_input() {
        let core = open_database_in_memory().unwrap();
        assert!(matches!(
            core.confirm_visit("NOPE".into(), 1, None),
            Err(OncoMatchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_infer_stage_ffi() {
        let core = open_database_in_memory().unwrap();
        let inference = core.infer_stage(Some("C78.7".into()));
        assert_eq!(inference.inferred_stage, FfiStage::Metastatic);
        assert!(inference.reasons[0].contains("liver"));
    }
}
