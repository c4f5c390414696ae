//! Pure protocol scoring.
//!
//! Everything the scorer needs is gathered up front into a [`MatchInput`],
//! including the patient's confirmed-protocol history, so scoring never
//! touches the store and can run on any thread.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::inference::stage_matches;
use crate::models::{
    Drug, MatchKind, MatchOutcome, MatchResult, ModalityFlags, ProtocolCandidate,
    ProtocolRegimenLink, RegimenSummary, StageInference,
};

/// Results returned per visit, sentinel included.
pub const MAX_RESULTS: usize = 10;

pub const BASE_SCORE: f64 = 20.0;
pub const STAGE_MATCH_SCORE: f64 = 25.0;
pub const STAGE_NEUTRAL_SCORE: f64 = 10.0;
pub const MODALITY_NEUTRAL_SCORE: f64 = 5.0;
pub const RADIATION_PROTOCOL_SCORE: f64 = 50.0;
pub const CONCURRENT_CRT_SCORE: f64 = 40.0;
pub const RADIATION_MISMATCH_PENALTY: f64 = -40.0;
pub const SYSTEMIC_TREATMENT_SCORE: f64 = 5.0;
pub const SYSTEMIC_DEFAULT_SCORE: f64 = 3.0;
pub const DRUG_MATCH_WEIGHT: f64 = 40.0;
pub const COUNT_BONUS_PER_DRUG: f64 = 2.0;
pub const COUNT_BONUS_CAP: f64 = 10.0;
pub const PREFERRED_BONUS: f64 = 5.0;
pub const FORMULARY_WEIGHT: f64 = 20.0;
pub const HISTORY_BONUS: f64 = 15.0;

pub const NON_PROTOCOL_CODE: &str = "NON-PROTOCOL";
pub const NON_PROTOCOL_SCORE: i64 = 100;
pub const UNRESOLVED_SITE_CODE: &str = "UNRESOLVED-SITE";

/// Everything scoring one visit needs, read from the store beforehand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchInput {
    pub vn: String,
    pub stage: StageInference,
    /// Distinct resolved drugs of the visit
    pub resolved_drugs: Vec<Drug>,
    /// Active protocols of the visit's site, in candidate order
    pub candidates: Vec<ProtocolCandidate>,
    /// Approved generic names per protocol code; codes without data are absent
    pub formulary: HashMap<String, HashSet<String>>,
    /// Protocols confirmed on the patient's other visits
    pub confirmed_protocols: HashSet<i64>,
}

impl MatchInput {
    fn resolved_drug_ids(&self) -> HashSet<i64> {
        self.resolved_drugs.iter().map(|d| d.id).collect()
    }

    fn resolved_names(&self) -> BTreeSet<String> {
        self.resolved_drugs.iter().map(Drug::formulary_key).collect()
    }
}

/// Rank the candidates of one visit.
pub fn score_visit(input: &MatchInput) -> MatchOutcome {
    let stage = input.stage.clone();

    if input.resolved_drugs.is_empty() && !stage.modality.radiation {
        return MatchOutcome::empty(
            &input.vn,
            Some(stage),
            "No resolved medications and no radiation signal; nothing to match against".into(),
        );
    }

    let mut scored: Vec<MatchResult> = input
        .candidates
        .iter()
        .map(|candidate| score_protocol(candidate, input))
        .collect();

    // Stable: equal scores keep candidate order
    scored.sort_by(|a, b| {
        b.score.cmp(&a.score).then(
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });

    let mut results = Vec::with_capacity(scored.len() + 1);
    if let Some(sentinel) = non_protocol_sentinel(input) {
        results.push(sentinel);
    }
    results.extend(scored);
    results.truncate(MAX_RESULTS);

    let note = results
        .is_empty()
        .then(|| "No active protocols for the visit's cancer site".to_string());

    MatchOutcome {
        vn: input.vn.clone(),
        results,
        stage_inference: Some(stage),
        note,
    }
}

/// Score one protocol against a visit.
pub fn score_protocol(candidate: &ProtocolCandidate, input: &MatchInput) -> MatchResult {
    let protocol = &candidate.protocol;
    let mut explanations = Vec::new();

    let (stage_score, stage_match) = stage_sub_score(candidate, &input.stage, &mut explanations);
    let modality_score = modality_sub_score(candidate, input.stage.modality, &mut explanations);

    let history_score = if input.confirmed_protocols.contains(&protocol.id) {
        explanations.push(format!("Previously confirmed for this patient (+{HISTORY_BONUS})"));
        HISTORY_BONUS
    } else {
        0.0
    };

    let mut raw_score = BASE_SCORE + stage_score + modality_score + history_score;
    let mut best_regimen = None;
    let mut formulary_ratio = None;

    let drug_ids = input.resolved_drug_ids();
    let best = candidate
        .regimens
        .iter()
        .filter(|link| !link.regimen.drugs.is_empty())
        .map(|link| evaluate_regimen(link, &drug_ids))
        .fold(None::<RegimenEvaluation<'_>>, |best, eval| match best {
            Some(current) if eval.score <= current.score => Some(current),
            _ => Some(eval),
        });

    if let Some(best) = best {
        let formulary = formulary_fraction(input, &protocol.code);
        let formulary_score = formulary.map_or(0.0, |(approved, total)| {
            FORMULARY_WEIGHT * approved as f64 / total as f64
        });
        match formulary {
            Some((approved, total)) => {
                formulary_ratio = Some(percent(approved as f64 / total as f64));
                explanations.push(format!(
                    "Formulary: {approved}/{total} visit drugs approved (+{formulary_score:.1})"
                ));
            }
            None => explanations.push("No formulary data for this protocol".to_string()),
        }

        explanations.push(format!(
            "Regimen {}: {}/{} drugs matched",
            best.link.regimen.code, best.matched, best.total
        ));
        if best.link.is_preferred {
            explanations.push(format!("Preferred regimen (+{PREFERRED_BONUS})"));
        }

        raw_score += best.score + formulary_score;
        best_regimen = Some(best.summary());
    }

    MatchResult {
        kind: MatchKind::Protocol,
        protocol_id: protocol.id,
        protocol_code: protocol.code.clone(),
        protocol_name: protocol.name_en.clone(),
        score: final_score(raw_score),
        raw_score,
        best_regimen,
        explanations,
        stage_match,
        modality: input.stage.modality,
        formulary_ratio,
    }
}

/// Floor at zero, then round.
pub fn final_score(raw_score: f64) -> i64 {
    raw_score.max(0.0).round() as i64
}

/// Sentinel placed at the top of an outcome whose site did not resolve.
pub fn site_unresolved_result(primary_diagnosis: &str, modality: ModalityFlags) -> MatchResult {
    MatchResult {
        kind: MatchKind::SiteUnresolved,
        protocol_id: 0,
        protocol_code: UNRESOLVED_SITE_CODE.to_string(),
        protocol_name: "Cancer site unresolved".to_string(),
        score: 0,
        raw_score: 0.0,
        best_regimen: None,
        explanations: vec![format!(
            "Primary diagnosis '{primary_diagnosis}' does not map to any active cancer site; \
             add an ICD-10 prefix mapping to enable matching"
        )],
        stage_match: false,
        modality,
        formulary_ratio: None,
    }
}

fn stage_sub_score(
    candidate: &ProtocolCandidate,
    stage: &StageInference,
    explanations: &mut Vec<String>,
) -> (f64, bool) {
    let inferred = stage.inferred_stage;
    if candidate.stage_codes.is_empty() {
        explanations.push(format!("Protocol declares no stages; neutral (+{STAGE_NEUTRAL_SCORE})"));
        return (STAGE_NEUTRAL_SCORE, false);
    }

    let declared = candidate.stage_codes.join(", ");
    if stage_matches(inferred, &candidate.stage_codes) {
        explanations.push(format!(
            "Stage {inferred} matches protocol stages [{declared}] (+{STAGE_MATCH_SCORE})"
        ));
        (STAGE_MATCH_SCORE, true)
    } else {
        explanations.push(format!("Stage {inferred} does not match protocol stages [{declared}]"));
        (0.0, false)
    }
}

fn modality_sub_score(
    candidate: &ProtocolCandidate,
    modality: ModalityFlags,
    explanations: &mut Vec<String>,
) -> f64 {
    let protocol = &candidate.protocol;

    if modality.radiation {
        return if protocol.is_radiation() {
            explanations.push(format!("Radiation signal fits radiation protocol (+{RADIATION_PROTOCOL_SCORE})"));
            RADIATION_PROTOCOL_SCORE
        } else if protocol.is_concurrent_crt() {
            explanations.push(format!("Radiation signal fits concurrent chemoradiation (+{CONCURRENT_CRT_SCORE})"));
            CONCURRENT_CRT_SCORE
        } else {
            explanations.push(format!(
                "Radiation signal but protocol is {} ({RADIATION_MISMATCH_PENALTY})",
                protocol.protocol_type
            ));
            RADIATION_MISMATCH_PENALTY
        };
    }

    if modality.has_systemic_signal() {
        return if protocol.is_treatment() {
            explanations.push(format!("Systemic therapy signal fits treatment protocol (+{SYSTEMIC_TREATMENT_SCORE})"));
            SYSTEMIC_TREATMENT_SCORE
        } else {
            SYSTEMIC_DEFAULT_SCORE
        };
    }

    MODALITY_NEUTRAL_SCORE
}

struct RegimenEvaluation<'c> {
    link: &'c ProtocolRegimenLink,
    matched: u32,
    total: u32,
    /// Drug, count and preferred sub-scores
    score: f64,
}

impl RegimenEvaluation<'_> {
    fn ratio(&self) -> f64 {
        self.matched as f64 / self.total as f64
    }

    fn summary(&self) -> RegimenSummary {
        RegimenSummary {
            regimen_id: self.link.regimen.id,
            regimen_code: self.link.regimen.code.clone(),
            regimen_name: self.link.regimen.name.clone(),
            line_of_therapy: self.link.line_of_therapy,
            is_preferred: self.link.is_preferred,
            matched_drugs: self.matched,
            total_drugs: self.total,
            drug_match_ratio: percent(self.ratio()),
        }
    }
}

fn evaluate_regimen<'c>(link: &'c ProtocolRegimenLink, drug_ids: &HashSet<i64>) -> RegimenEvaluation<'c> {
    let total = link.regimen.drugs.len() as u32;
    let matched = link
        .regimen
        .drugs
        .iter()
        .filter(|drug| drug_ids.contains(&drug.drug_id))
        .count() as u32;

    let ratio = matched as f64 / total as f64;
    let count_bonus = (matched as f64 * COUNT_BONUS_PER_DRUG).min(COUNT_BONUS_CAP);
    let preferred = if link.is_preferred { PREFERRED_BONUS } else { 0.0 };

    RegimenEvaluation {
        link,
        matched,
        total,
        score: ratio * DRUG_MATCH_WEIGHT + count_bonus + preferred,
    }
}

/// (approved, total) visit drug names for a protocol, `None` without data.
fn formulary_fraction(input: &MatchInput, protocol_code: &str) -> Option<(usize, usize)> {
    let approved = input
        .formulary
        .get(&protocol_code.trim().to_uppercase())
        .filter(|set| !set.is_empty())?;
    let names = input.resolved_names();
    if names.is_empty() {
        return None;
    }
    let hits = names.iter().filter(|name| approved.contains(*name)).count();
    Some((hits, names.len()))
}

/// Chemotherapy drugs of the visit that no candidate regimen contains.
fn non_protocol_sentinel(input: &MatchInput) -> Option<MatchResult> {
    let covered: HashSet<i64> = input
        .candidates
        .iter()
        .flat_map(|c| c.regimens.iter())
        .flat_map(|link| link.regimen.drug_ids())
        .collect();

    let off_protocol: Vec<&Drug> = input
        .resolved_drugs
        .iter()
        .filter(|drug| drug.is_chemotherapy() && !covered.contains(&drug.id))
        .collect();
    if off_protocol.is_empty() {
        return None;
    }

    let explanations = off_protocol
        .iter()
        .map(|drug| {
            format!(
                "{} is chemotherapy but not part of any regimen of this site's protocols",
                drug.generic_name
            )
        })
        .collect();

    Some(MatchResult {
        kind: MatchKind::NonProtocol,
        protocol_id: 0,
        protocol_code: NON_PROTOCOL_CODE.to_string(),
        protocol_name: "Off-formulary chemotherapy use".to_string(),
        score: NON_PROTOCOL_SCORE,
        raw_score: NON_PROTOCOL_SCORE as f64,
        best_regimen: None,
        explanations,
        stage_match: false,
        modality: input.stage.modality,
        formulary_ratio: None,
    })
}

fn percent(ratio: f64) -> u32 {
    (ratio * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::infer_stage;
    use crate::models::{Protocol, Regimen, RegimenDrug, INTENT_CONCURRENT_CRT};

    fn drug(id: i64, name: &str, category: &str) -> Drug {
        Drug::new(id, name.into(), category.into())
    }

    fn regimen(id: i64, code: &str, drug_ids: &[i64]) -> Regimen {
        let mut regimen = Regimen::new(id, code.into(), code.into());
        regimen.drugs = drug_ids
            .iter()
            .map(|&drug_id| RegimenDrug { drug_id, optional: false })
            .collect();
        regimen
    }

    fn link(regimen: Regimen, preferred: bool) -> ProtocolRegimenLink {
        ProtocolRegimenLink {
            regimen,
            line_of_therapy: None,
            is_preferred: preferred,
        }
    }

    fn candidate(id: i64, protocol_type: &str, stages: &[&str], regimens: Vec<ProtocolRegimenLink>) -> ProtocolCandidate {
        ProtocolCandidate {
            protocol: Protocol::new(id, format!("P-{id}"), format!("Protocol {id}"), protocol_type.into(), 1),
            stage_codes: stages.iter().map(|s| s.to_string()).collect(),
            regimens,
        }
    }

    fn input(secondary: Option<&str>, drugs: Vec<Drug>, candidates: Vec<ProtocolCandidate>) -> MatchInput {
        MatchInput {
            vn: "V001".into(),
            stage: infer_stage(secondary),
            resolved_drugs: drugs,
            candidates,
            formulary: HashMap::new(),
            confirmed_protocols: HashSet::new(),
        }
    }

    #[test]
    fn test_full_single_drug_match() {
        let input = input(
            None,
            vec![drug(1, "TAMOXIFEN", "hormonal")],
            vec![candidate(1, "treatment", &["I", "II"], vec![link(regimen(10, "TAM", &[1]), false)])],
        );
        let outcome = score_visit(&input);
        let top = &outcome.results[0];

        // 20 + 25 + 5 + 40 + 2
        assert_eq!(top.score, 92);
        assert!(top.stage_match);
        assert_eq!(top.best_regimen.as_ref().unwrap().drug_match_ratio, 100);
    }

    #[test]
    fn test_no_evidence_short_circuits() {
        let input = input(None, vec![], vec![candidate(1, "treatment", &[], vec![])]);
        let outcome = score_visit(&input);
        assert!(outcome.results.is_empty());
        assert!(outcome.note.is_some());
        assert!(outcome.stage_inference.is_some());
    }

    #[test]
    fn test_radiation_signal_scoring() {
        let mut crt = candidate(3, "treatment", &[], vec![]);
        crt.protocol.treatment_intent = Some(INTENT_CONCURRENT_CRT.into());
        let input = input(
            Some("Z510"),
            vec![],
            vec![
                candidate(1, "treatment", &[], vec![link(regimen(10, "X", &[5]), false)]),
                candidate(2, "radiation", &[], vec![]),
                crt,
            ],
        );
        let outcome = score_visit(&input);
        let codes: Vec<&str> = outcome.results.iter().map(|r| r.protocol_code.as_str()).collect();
        assert_eq!(codes, vec!["P-2", "P-3", "P-1"]);

        // 20 + 10 + 50 vs 20 + 10 - 40
        assert_eq!(outcome.results[0].score, 80);
        assert_eq!(outcome.results[2].raw_score, -10.0);
        assert_eq!(outcome.results[2].score, 0);
    }

    #[test]
    fn test_best_regimen_ties_keep_link_order() {
        let input = input(
            None,
            vec![drug(1, "A", "chemotherapy"), drug(2, "B", "chemotherapy")],
            vec![candidate(
                1,
                "treatment",
                &[],
                vec![
                    link(regimen(10, "FIRST", &[1]), false),
                    link(regimen(11, "SECOND", &[2]), false),
                    link(regimen(12, "EMPTY", &[]), true),
                ],
            )],
        );
        let result = score_protocol(&input.candidates[0], &input);
        assert_eq!(result.best_regimen.unwrap().regimen_code, "FIRST");
    }

    #[test]
    fn test_all_empty_regimens_score_as_regimen_less() {
        let input = input(
            None,
            vec![drug(1, "A", "supportive")],
            vec![candidate(1, "follow_up", &[], vec![link(regimen(10, "EMPTY", &[]), true)])],
        );
        let result = score_protocol(&input.candidates[0], &input);
        assert!(result.best_regimen.is_none());
        assert_eq!(result.raw_score, BASE_SCORE + STAGE_NEUTRAL_SCORE + MODALITY_NEUTRAL_SCORE);
    }

    #[test]
    fn test_systemic_signal_scoring() {
        let cases = [
            (Some("Z5111"), "treatment", 35.0),
            (Some("Z5112"), "treatment", 35.0),
            (Some("Z511"), "follow_up", 33.0),
            (None, "treatment", 35.0),
        ];

        for (secondary, protocol_type, expected) in cases {
            let input = input(
                secondary,
                vec![drug(1, "PACLITAXEL", "chemotherapy")],
                vec![candidate(1, protocol_type, &[], vec![])],
            );
            let result = score_protocol(&input.candidates[0], &input);
            assert_eq!(
                result.raw_score, expected,
                "{secondary:?} on {protocol_type}: {:?}",
                result.explanations
            );
        }
    }

    #[test]
    fn test_formulary_and_history_bonuses() {
        let mut input = input(
            None,
            vec![drug(1, "PACLITAXEL", "chemotherapy"), drug(2, "ONDANSETRON", "supportive")],
            vec![candidate(1, "treatment", &[], vec![link(regimen(10, "PAC", &[1]), true)])],
        );
        input
            .formulary
            .insert("P-1".into(), HashSet::from(["PACLITAXEL".to_string()]));
        input.confirmed_protocols.insert(1);

        let result = score_protocol(&input.candidates[0], &input);
        assert_eq!(result.formulary_ratio, Some(50));
        // 20 + 10 + 5 + 15 + (40 + 2 + 5) + 10
        assert_eq!(result.raw_score, 107.0);
    }

    #[test]
    fn test_non_protocol_sentinel_first() {
        let input = input(
            None,
            vec![drug(1, "PACLITAXEL", "chemotherapy"), drug(9, "ROGUEMAB", "chemotherapy")],
            vec![candidate(1, "treatment", &["I"], vec![link(regimen(10, "PAC", &[1]), true)])],
        );
        let outcome = score_visit(&input);
        assert!(outcome.has_non_protocol());
        assert_eq!(outcome.results[0].protocol_id, 0);
        assert_eq!(outcome.results[0].score, NON_PROTOCOL_SCORE);
        assert!(outcome.results[0].explanations[0].contains("ROGUEMAB"));
        assert_eq!(outcome.results.len(), 2);
    }

    #[test]
    fn test_results_capped() {
        let candidates = (1..=15)
            .map(|id| candidate(id, "treatment", &[], vec![]))
            .collect();
        let input = input(None, vec![drug(1, "A", "supportive")], candidates);
        let outcome = score_visit(&input);
        assert_eq!(outcome.results.len(), MAX_RESULTS);
        assert_eq!(outcome.results[0].protocol_id, 1);
    }

    #[test]
    fn test_clamped_ties_order_by_raw_score() {
        let input = input(
            Some("Z510"),
            vec![drug(1, "A", "supportive")],
            vec![
                candidate(1, "treatment", &["IV"], vec![]),
                candidate(2, "treatment", &[], vec![]),
            ],
        );
        let outcome = score_visit(&input);
        // Both clamp to 0; the neutral-stage protocol has the higher raw score
        assert!(outcome.results.iter().all(|r| r.score == 0));
        assert_eq!(outcome.results[0].protocol_id, 2);
    }

    #[test]
    fn test_final_score() {
        assert_eq!(final_score(-12.5), 0);
        assert_eq!(final_score(61.5), 62);
        assert_eq!(final_score(61.4), 61);
    }
}
