//! Drug catalog models.

use serde::{Deserialize, Serialize};

/// Category value that marks a drug as chemotherapy.
pub const CHEMOTHERAPY_CATEGORY: &str = "chemotherapy";

/// A drug identified by its generic name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Drug {
    /// Store identifier
    pub id: i64,
    /// Generic name (e.g., "PACLITAXEL")
    pub generic_name: String,
    /// Drug category (e.g., "chemotherapy", "supportive")
    pub category: String,
    /// Inactive drugs never resolve
    pub active: bool,
}

impl Drug {
    /// Create a new active drug.
    pub fn new(id: i64, generic_name: String, category: String) -> Self {
        Self {
            id,
            generic_name,
            category,
            active: true,
        }
    }

    /// Whether this drug counts toward non-protocol detection.
    pub fn is_chemotherapy(&self) -> bool {
        self.category.trim().eq_ignore_ascii_case(CHEMOTHERAPY_CATEGORY)
    }

    /// Generic name in the form formulary sets use.
    pub fn formulary_key(&self) -> String {
        self.generic_name.trim().to_uppercase()
    }
}

/// A brand/trade name owned by a drug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeName {
    /// Store identifier
    pub id: i64,
    /// Owning drug
    pub drug_id: i64,
    /// Trade name as printed on the line item
    pub name: String,
    /// Inactive trade names never resolve
    pub active: bool,
}

impl TradeName {
    /// Create a new active trade name.
    pub fn new(id: i64, drug_id: i64, name: String) -> Self {
        Self {
            id,
            drug_id,
            name,
            active: true,
        }
    }
}

/// Precedence tiers for free-text drug name lookup, tried in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NameTier {
    /// Case-insensitive equality
    Exact,
    /// Stored name starts with the candidate
    Prefix,
    /// Stored name contains the candidate
    Substring,
}

impl NameTier {
    /// All tiers in precedence order.
    pub const ALL: [NameTier; 3] = [NameTier::Exact, NameTier::Prefix, NameTier::Substring];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chemotherapy_category() {
        let drug = Drug::new(1, "Paclitaxel".into(), "Chemotherapy".into());
        assert!(drug.is_chemotherapy());

        let supportive = Drug::new(2, "Ondansetron".into(), "supportive".into());
        assert!(!supportive.is_chemotherapy());
    }

    #[test]
    fn test_formulary_key() {
        let drug = Drug::new(1, " Carboplatin ".into(), "chemotherapy".into());
        assert_eq!(drug.formulary_key(), "CARBOPLATIN");
    }
}
