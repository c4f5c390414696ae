//! Cancer site and ICD-10 prefix models.

use serde::{Deserialize, Serialize};

/// A cancer site, the leaf of the ICD-10 code hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancerSite {
    /// Store identifier
    pub id: i64,
    /// Short site code (e.g., "BREAST")
    pub code: String,
    /// English display name
    pub name_en: String,
    /// Thai display name
    pub name_th: Option<String>,
    /// Whether the site is selectable
    pub active: bool,
}

impl CancerSite {
    /// Create a new active site.
    pub fn new(id: i64, code: String, name_en: String) -> Self {
        Self {
            id,
            code,
            name_en,
            name_th: None,
            active: true,
        }
    }
}

/// Maps one exact ICD-10 prefix to a cancer site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Icd10PrefixMapping {
    /// Normalized prefix (no dots, uppercase)
    pub prefix: String,
    /// Target site
    pub site_id: i64,
    /// Inactive rows are ignored by resolution
    pub active: bool,
}

impl Icd10PrefixMapping {
    /// Create an active mapping; the prefix is normalized.
    pub fn new(prefix: &str, site_id: i64) -> Self {
        Self {
            prefix: normalize_icd10(prefix),
            site_id,
            active: true,
        }
    }
}

/// Normalize an ICD-10 code: drop dots and whitespace, uppercase.
pub fn normalize_icd10(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_icd10() {
        assert_eq!(normalize_icd10("C50.9"), "C509");
        assert_eq!(normalize_icd10(" c78.7 "), "C787");
        assert_eq!(normalize_icd10("Z51.11"), "Z5111");
        assert_eq!(normalize_icd10(""), "");
    }

    #[test]
    fn test_mapping_normalizes_prefix() {
        let mapping = Icd10PrefixMapping::new("c50.1", 3);
        assert_eq!(mapping.prefix, "C501");
        assert!(mapping.active);
    }
}
