//! Recommendation prompts built from match outcomes.
//!
//! The model sees the visit, the inferred stage and the engine's ranking, and
//! answers with a JSON object whose shape is fixed by [`REPLY_GRAMMAR`].

use std::fmt::Write;

use oncomatch_core::models::{
    MatchKind, MatchOutcome, MatchResult, StageInference, Visit, VisitMedication,
};
use serde::{Deserialize, Serialize};

/// System prompt for protocol recommendation.
pub const SYSTEM_PROMPT: &str = r#"You are an oncology pharmacy assistant that reviews chemotherapy visit records against an insurer's approved treatment-protocol catalog.

You receive one visit (diagnosis codes, clinical notes, dispensed medications), the disease stage inferred from its diagnosis codes, and a ranked list of candidate protocols scored by a rule-based engine.

Recommend the protocol (and regimen, when one applies) that best fits the visit:
- Prefer candidates from the ranked list; never invent protocol codes
- NON-PROTOCOL means chemotherapy outside every approved regimen was dispensed
- UNRESOLVED-SITE means the primary diagnosis matched no cancer site
- Explain each choice in one or two sentences citing the visit's evidence

Your answer is advisory. A reviewer confirms the final protocol.

Output JSON with a "recommendations" array, best recommendation first."#;

/// Sample reply shown to the model when examples are enabled.
pub const EXAMPLE_REPLY: &str = r#"{"recommendations":[{"protocol_code":"BR-HORM","regimen_code":"TAM","rationale":"Early-stage breast cancer with tamoxifen dispensed; the preferred hormonal regimen is fully matched."}]}"#;

/// JSON grammar constraint for hosts that decode with grammars.
pub const REPLY_GRAMMAR: &str = r#"
root ::= "{" ws "\"recommendations\"" ws ":" ws recommendations ws "}"
recommendations ::= "[" ws (recommendation (ws "," ws recommendation)*)? ws "]"
recommendation ::= "{" ws
    "\"protocol_code\"" ws ":" ws string ws "," ws
    "\"regimen_code\"" ws ":" ws (string | "null") ws "," ws
    "\"rationale\"" ws ":" ws string ws
"}"
string ::= "\"" ([^"\\] | "\\" .)* "\""
ws ::= [ \t\n]*
"#;

/// Visit fields shown to the model. Patient identifiers are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitContext {
    pub vn: String,
    pub visit_date: Option<String>,
    pub primary_diagnosis: String,
    pub secondary_diagnoses: Option<String>,
    pub hpi: Option<String>,
    pub doctor_notes: Option<String>,
    /// Medication lines as dispensed
    pub medications: Vec<String>,
}

impl VisitContext {
    pub fn from_visit(visit: &Visit, medications: &[VisitMedication]) -> Self {
        Self {
            vn: visit.vn.clone(),
            visit_date: Some(visit.visit_date.to_string()),
            primary_diagnosis: visit.primary_diagnosis.clone(),
            secondary_diagnoses: visit.secondary_diagnoses.clone(),
            hpi: visit.hpi.clone(),
            doctor_notes: visit.doctor_notes.clone(),
            medications: medications.iter().map(|m| m.raw_line.clone()).collect(),
        }
    }
}

/// User prompt for one visit and its ranking.
pub fn make_recommendation_prompt(context: &VisitContext, outcome: &MatchOutcome) -> String {
    let mut prompt = String::new();

    match &context.visit_date {
        Some(date) => {
            let _ = writeln!(prompt, "Visit {} ({})", context.vn, date);
        }
        None => {
            let _ = writeln!(prompt, "Visit {}", context.vn);
        }
    }
    let _ = writeln!(prompt, "Primary diagnosis: {}", context.primary_diagnosis);
    let _ = writeln!(
        prompt,
        "Secondary diagnoses: {}",
        non_blank(context.secondary_diagnoses.as_deref()).unwrap_or("none")
    );
    if let Some(hpi) = non_blank(context.hpi.as_deref()) {
        let _ = writeln!(prompt, "History of present illness: {hpi}");
    }
    if let Some(notes) = non_blank(context.doctor_notes.as_deref()) {
        let _ = writeln!(prompt, "Doctor notes: {notes}");
    }

    prompt.push_str("Medications:\n");
    if context.medications.is_empty() {
        prompt.push_str("- none recorded\n");
    }
    for line in &context.medications {
        let _ = writeln!(prompt, "- {line}");
    }

    prompt.push('\n');
    match &outcome.stage_inference {
        Some(stage) => prompt.push_str(&render_stage(stage)),
        None => prompt.push_str("Stage: not available\n"),
    }

    prompt.push_str("\nRanked candidates:\n");
    if outcome.results.is_empty() {
        prompt.push_str("none\n");
    }
    for (i, result) in outcome.results.iter().enumerate() {
        prompt.push_str(&render_match(i + 1, result));
    }
    if let Some(note) = &outcome.note {
        let _ = writeln!(prompt, "Note: {note}");
    }

    prompt.push_str(
        r#"
Return a JSON object with a "recommendations" array. Each recommendation should have:
- protocol_code: Code of a ranked candidate
- regimen_code: Regimen code (null if none applies)
- rationale: Short justification"#,
    );

    prompt
}

/// Build a complete prompt with system context and an optional sample reply.
pub fn build_full_prompt(
    context: &VisitContext,
    outcome: &MatchOutcome,
    include_example: bool,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("<|system|>\n");
    prompt.push_str(SYSTEM_PROMPT);
    if include_example {
        prompt.push_str("\n\nExample reply:\n");
        prompt.push_str(EXAMPLE_REPLY);
    }
    prompt.push_str("\n<|end|>\n");

    prompt.push_str("<|user|>\n");
    prompt.push_str(&make_recommendation_prompt(context, outcome));
    prompt.push_str("\n<|end|>\n");
    prompt.push_str("<|assistant|>\n");

    prompt
}

fn render_stage(stage: &StageInference) -> String {
    let mut text = format!(
        "Stage: {} (distant metastasis: {}, nodal involvement: {})\n",
        stage.inferred_stage,
        yes_no(stage.has_distant_mets),
        yes_no(stage.has_node_involvement)
    );

    let mut signals = Vec::new();
    if stage.modality.radiation {
        signals.push("radiation");
    }
    if stage.modality.chemotherapy {
        signals.push("chemotherapy");
    }
    if stage.modality.immunotherapy {
        signals.push("immunotherapy");
    }
    let signals = if signals.is_empty() {
        "none".to_string()
    } else {
        signals.join(", ")
    };
    let _ = writeln!(text, "Modality signals: {signals}");

    for reason in &stage.reasons {
        let _ = writeln!(text, "- {reason}");
    }
    text
}

fn render_match(rank: usize, result: &MatchResult) -> String {
    let mut text = format!(
        "{}. {} - {} (score {}",
        rank, result.protocol_code, result.protocol_name, result.score
    );
    match result.kind {
        MatchKind::Protocol => {
            let _ = write!(text, ", stage match: {}", yes_no(result.stage_match));
            if let Some(ratio) = result.formulary_ratio {
                let _ = write!(text, ", formulary {ratio}%");
            }
            text.push_str(")\n");
        }
        MatchKind::NonProtocol | MatchKind::SiteUnresolved => text.push_str(", needs review)\n"),
    }

    if let Some(regimen) = &result.best_regimen {
        let _ = write!(
            text,
            "   Best regimen: {} - {}, {}/{} drugs ({}%)",
            regimen.regimen_code,
            regimen.regimen_name,
            regimen.matched_drugs,
            regimen.total_drugs,
            regimen.drug_match_ratio
        );
        if let Some(line) = regimen.line_of_therapy {
            let _ = write!(text, ", line {line}");
        }
        if regimen.is_preferred {
            text.push_str(", preferred");
        }
        text.push('\n');
    }
    for explanation in &result.explanations {
        let _ = writeln!(text, "   - {explanation}");
    }
    text
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
