//! Stage and modality inference from secondary diagnosis codes.
//!
//! Every code is scanned and flags accumulate; there is no first-match-wins.
//! The result is a pure function of the input string.

use crate::models::{normalize_icd10, split_codes, ModalityFlags, Stage, StageInference};

/// Reason recorded when no code contributed anything.
pub const DEFAULT_STAGE_REASON: &str =
    "No metastasis or nodal codes in secondary diagnoses; defaulting to EARLY";

/// Descriptions of secondary malignancy sub-codes.
const METASTASIS_SITES: &[(&str, &str)] = &[
    ("C780", "lung"),
    ("C781", "mediastinum"),
    ("C782", "pleura"),
    ("C783", "other respiratory organs"),
    ("C784", "small intestine"),
    ("C785", "large intestine and rectum"),
    ("C786", "retroperitoneum and peritoneum"),
    ("C787", "liver"),
    ("C788", "other digestive organs"),
    ("C790", "kidney and renal pelvis"),
    ("C791", "bladder and other urinary organs"),
    ("C792", "skin"),
    ("C793", "brain and cerebral meninges"),
    ("C794", "other parts of nervous system"),
    ("C795", "bone and bone marrow"),
    ("C796", "ovary"),
    ("C797", "adrenal gland"),
    ("C798", "other specified sites"),
    ("C799", "unspecified site"),
];

/// Family descriptions used when the sub-code is unknown.
const METASTASIS_FAMILIES: &[(&str, &str)] = &[
    ("C78", "respiratory and digestive organs"),
    ("C79", "other and unspecified sites"),
];

/// Protocol stage codes compatible with each inferred stage.
const EARLY_CODES: &[&str] = &[
    "0", "I", "IA", "IB", "IC", "II", "IIA", "IIB", "IIC", "EARLY", "LOCALIZED",
];
const LOCALLY_ADVANCED_CODES: &[&str] = &[
    "III",
    "IIIA",
    "IIIB",
    "IIIC",
    "LOCALLY_ADVANCED",
    "REGIONAL",
];
const METASTATIC_CODES: &[&str] = &["IV", "IVA", "IVB", "IVC", "METASTATIC", "ADVANCED"];

/// Protocol stage codes compatible with an inferred stage.
pub fn compatible_stage_codes(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Early => EARLY_CODES,
        Stage::LocallyAdvanced => LOCALLY_ADVANCED_CODES,
        Stage::Metastatic => METASTATIC_CODES,
    }
}

/// Whether any declared protocol stage code is compatible with `stage`.
pub fn stage_matches(stage: Stage, declared: &[String]) -> bool {
    let compatible = compatible_stage_codes(stage);
    declared
        .iter()
        .any(|code| compatible.contains(&code.trim().to_uppercase().as_str()))
}

/// Infer disease stage and modality flags from secondary diagnoses.
///
/// Absent and empty input both yield EARLY with [`DEFAULT_STAGE_REASON`].
pub fn infer_stage(secondary_diagnoses: Option<&str>) -> StageInference {
    let mut has_distant_mets = false;
    let mut has_node_involvement = false;
    let mut modality = ModalityFlags::default();
    let mut reasons = Vec::new();

    for raw in split_codes(secondary_diagnoses.unwrap_or_default()) {
        let code = normalize_icd10(raw);

        if code.starts_with("C78") || code.starts_with("C79") {
            has_distant_mets = true;
            reasons.push(format!(
                "{code}: distant metastasis ({})",
                metastasis_description(&code)
            ));
        } else if code.starts_with("C77") {
            has_node_involvement = true;
            reasons.push(format!("{code}: lymph node involvement"));
        }

        match code.as_str() {
            "Z510" => {
                modality.radiation = true;
                reasons.push(format!("{code}: radiotherapy session"));
            }
            "9224" => {
                modality.radiation = true;
                reasons.push(format!("{code}: radiation procedure"));
            }
            "Z5111" | "Z511" => {
                modality.chemotherapy = true;
                reasons.push(format!("{code}: chemotherapy session"));
            }
            "Z5112" => {
                modality.immunotherapy = true;
                reasons.push(format!("{code}: immunotherapy session"));
            }
            _ => {}
        }
    }

    let inferred_stage = if has_distant_mets {
        Stage::Metastatic
    } else if has_node_involvement {
        Stage::LocallyAdvanced
    } else {
        Stage::Early
    };

    if reasons.is_empty() {
        reasons.push(DEFAULT_STAGE_REASON.to_string());
    }

    StageInference {
        inferred_stage,
        has_distant_mets,
        has_node_involvement,
        modality,
        reasons,
    }
}

fn metastasis_description(code: &str) -> &'static str {
    let sub_code = code.get(..4).unwrap_or(code);
    if let Some((_, description)) = METASTASIS_SITES.iter().find(|(c, _)| *c == sub_code) {
        return description;
    }

    let family = code.get(..3).unwrap_or(code);
    METASTASIS_FAMILIES
        .iter()
        .find(|(c, _)| *c == family)
        .map(|(_, description)| *description)
        .unwrap_or("unspecified site")
}
