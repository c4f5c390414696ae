//! Treatment protocol and regimen models.

use serde::{Deserialize, Serialize};

/// Protocol type value for radiation pathways.
pub const PROTOCOL_TYPE_RADIATION: &str = "radiation";
/// Protocol type value for systemic treatment pathways.
pub const PROTOCOL_TYPE_TREATMENT: &str = "treatment";
/// Treatment intent value for concurrent chemoradiation.
pub const INTENT_CONCURRENT_CRT: &str = "concurrent_crt";

/// An insurer-approved treatment pathway for one cancer site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Protocol {
    /// Store identifier
    pub id: i64,
    /// Insurer protocol code
    pub code: String,
    /// English display name
    pub name_en: String,
    /// Thai display name
    pub name_th: Option<String>,
    /// Protocol type (e.g., "treatment", "radiation", "follow_up")
    pub protocol_type: String,
    /// Treatment intent (e.g., "curative", "palliative", "concurrent_crt")
    pub treatment_intent: Option<String>,
    /// Site the protocol belongs to
    pub site_id: i64,
    /// Inactive protocols are never candidates
    pub active: bool,
}

impl Protocol {
    /// Create a new active protocol.
    pub fn new(id: i64, code: String, name_en: String, protocol_type: String, site_id: i64) -> Self {
        Self {
            id,
            code,
            name_en,
            name_th: None,
            protocol_type,
            treatment_intent: None,
            site_id,
            active: true,
        }
    }

    pub fn is_radiation(&self) -> bool {
        self.protocol_type.eq_ignore_ascii_case(PROTOCOL_TYPE_RADIATION)
    }

    pub fn is_treatment(&self) -> bool {
        self.protocol_type.eq_ignore_ascii_case(PROTOCOL_TYPE_TREATMENT)
    }

    pub fn is_concurrent_crt(&self) -> bool {
        self.treatment_intent
            .as_deref()
            .is_some_and(|intent| intent.eq_ignore_ascii_case(INTENT_CONCURRENT_CRT))
    }
}

/// A named drug combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Regimen {
    /// Store identifier
    pub id: i64,
    /// Regimen code (e.g., "AC-T")
    pub code: String,
    /// Display name
    pub name: String,
    /// Expected drugs, in stored order
    pub drugs: Vec<RegimenDrug>,
}

impl Regimen {
    /// Create a regimen with no drugs.
    pub fn new(id: i64, code: String, name: String) -> Self {
        Self {
            id,
            code,
            name,
            drugs: Vec::new(),
        }
    }

    /// Drug ids in this regimen.
    pub fn drug_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.drugs.iter().map(|d| d.drug_id)
    }
}

/// One drug slot of a regimen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegimenDrug {
    pub drug_id: i64,
    /// Optional drugs still count toward the regimen total
    pub optional: bool,
}

/// A regimen as linked from a protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolRegimenLink {
    pub regimen: Regimen,
    /// Line of therapy (1 = first line)
    pub line_of_therapy: Option<i64>,
    /// Insurer-preferred regimen for the protocol
    pub is_preferred: bool,
}

/// A protocol with everything the scorer needs, loaded in one pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolCandidate {
    pub protocol: Protocol,
    /// Declared stage codes (uppercase)
    pub stage_codes: Vec<String>,
    /// Linked regimens in stored link order
    pub regimens: Vec<ProtocolRegimenLink>,
}
