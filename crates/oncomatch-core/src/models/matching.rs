//! Stage inference and match result models.
//!
//! Match results are transient: they are recomputed on every request and
//! never written to the store.

use serde::{Deserialize, Serialize};

/// Disease stage derived from secondary diagnosis codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Early,
    LocallyAdvanced,
    Metastatic,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Early => "EARLY",
            Stage::LocallyAdvanced => "LOCALLY_ADVANCED",
            Stage::Metastatic => "METASTATIC",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treatment modality signals from encounter-type codes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModalityFlags {
    pub radiation: bool,
    pub chemotherapy: bool,
    pub immunotherapy: bool,
}

impl ModalityFlags {
    /// Whether any modality code was seen.
    pub fn has_signal(&self) -> bool {
        self.radiation || self.chemotherapy || self.immunotherapy
    }

    /// Whether a systemic (chemo or immunotherapy) code was seen.
    pub fn has_systemic_signal(&self) -> bool {
        self.chemotherapy || self.immunotherapy
    }
}

/// Output of stage and modality inference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageInference {
    pub inferred_stage: Stage,
    pub has_distant_mets: bool,
    pub has_node_involvement: bool,
    pub modality: ModalityFlags,
    /// Human-readable reasons, one per contributing code
    pub reasons: Vec<String>,
}

/// What a match result represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// A genuine protocol ranking
    Protocol,
    /// Off-formulary chemotherapy detected
    NonProtocol,
    /// The visit's site could not be resolved
    SiteUnresolved,
}

/// Summary of the best-scoring regimen of a protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegimenSummary {
    pub regimen_id: i64,
    pub regimen_code: String,
    pub regimen_name: String,
    pub line_of_therapy: Option<i64>,
    pub is_preferred: bool,
    /// Regimen drugs found among the visit's resolved drugs
    pub matched_drugs: u32,
    pub total_drugs: u32,
    /// matched / total as a percentage, rounded
    pub drug_match_ratio: u32,
}

/// One ranked protocol (or sentinel) for a visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub kind: MatchKind,
    /// Protocol id, 0 for sentinels
    pub protocol_id: i64,
    pub protocol_code: String,
    pub protocol_name: String,
    /// Final score: floored at 0, rounded
    pub score: i64,
    /// Sum of sub-scores before flooring
    pub raw_score: f64,
    pub best_regimen: Option<RegimenSummary>,
    pub explanations: Vec<String>,
    /// Whether the inferred stage matched a declared stage code
    pub stage_match: bool,
    pub modality: ModalityFlags,
    /// Share of visit drugs in the protocol formulary, percent; None without data
    pub formulary_ratio: Option<u32>,
}

/// Full answer for one visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchOutcome {
    pub vn: String,
    /// At most ten results, best first
    pub results: Vec<MatchResult>,
    /// Absent only when the visit does not exist
    pub stage_inference: Option<StageInference>,
    /// Why the results are empty or short-circuited
    pub note: Option<String>,
}

impl MatchOutcome {
    /// Empty outcome with an explanation.
    pub fn empty(vn: &str, stage_inference: Option<StageInference>, note: String) -> Self {
        Self {
            vn: vn.to_string(),
            results: Vec::new(),
            stage_inference,
            note: Some(note),
        }
    }

    /// Whether the first result is the non-protocol sentinel.
    pub fn has_non_protocol(&self) -> bool {
        self.results
            .first()
            .is_some_and(|r| r.kind == MatchKind::NonProtocol)
    }
}

/// Compact per-VN entry of a batch match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub vn: String,
    pub result_count: u32,
    pub top_protocol_code: Option<String>,
    pub top_score: Option<i64>,
    pub inferred_stage: Option<Stage>,
    pub has_non_protocol: bool,
    pub note: Option<String>,
}

impl From<&MatchOutcome> for BatchSummary {
    fn from(outcome: &MatchOutcome) -> Self {
        let top = outcome.results.first();
        Self {
            vn: outcome.vn.clone(),
            result_count: outcome.results.len() as u32,
            top_protocol_code: top.map(|r| r.protocol_code.clone()),
            top_score: top.map(|r| r.score),
            inferred_stage: outcome.stage_inference.as_ref().map(|s| s.inferred_stage),
            has_non_protocol: outcome.has_non_protocol(),
            note: outcome.note.clone(),
        }
    }
}
