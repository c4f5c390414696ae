//! Free-text medication name → drug resolution.
//!
//! Each name yields up to two candidates: the full uppercase string, then the
//! string with its trailing dosage/strength/form token stripped. Each candidate
//! goes through three tiers in order (exact, prefix, substring), trade names
//! before generic names inside a tier. The first hit wins.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};
use tracing::debug;

use crate::db::Database;
use crate::models::NameTier;

use super::ResolverResult;

/// Candidates shorter than this never go through the substring tier.
pub const MIN_SUBSTRING_LEN: usize = 5;

/// Minimum similarity for a name to be suggested.
const MIN_SUGGESTION_SIMILARITY: f64 = 0.6;

/// Numeric quantity followed by a unit, and everything after it.
static DOSAGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\s+\d+(?:[.,]\d+)?\s*(?:%|(?:MCG|MG|GM|ML|IU|UNITS?|TABS?|CAPS?|AMP|VIALS?|SYRINGE|PREFILL|G)\b).*$",
    )
    .expect("valid regex")
});

/// How a medication name was matched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrugMatch {
    pub drug_id: i64,
    pub tier: NameTier,
    /// The candidate string that hit
    pub candidate: String,
    pub via_trade_name: bool,
}

/// A fuzzy suggestion for an unresolved name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrugSuggestion {
    pub drug_id: i64,
    /// Generic or trade name that scored best for this drug
    pub name: String,
    /// 0.0 - 1.0
    pub similarity: f64,
}

/// Resolves medication names against active drugs and trade names.
pub struct DrugResolver<'a> {
    db: &'a Database,
}

impl<'a> DrugResolver<'a> {
    /// Create a new drug resolver.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve a free-text name to a drug id.
    pub fn resolve(&self, name: &str) -> ResolverResult<Option<i64>> {
        Ok(self.resolve_match(name)?.map(|m| m.drug_id))
    }

    /// Resolve a free-text name, reporting which tier matched.
    pub fn resolve_match(&self, name: &str) -> ResolverResult<Option<DrugMatch>> {
        for candidate in name_candidates(name) {
            for tier in NameTier::ALL {
                if tier == NameTier::Substring && candidate.chars().count() < MIN_SUBSTRING_LEN {
                    continue;
                }

                if let Some(drug_id) = self.db.find_trade_name_drug(&candidate, tier)? {
                    debug!(name, candidate = %candidate, ?tier, drug_id, "resolved via trade name");
                    return Ok(Some(DrugMatch {
                        drug_id,
                        tier,
                        candidate,
                        via_trade_name: true,
                    }));
                }

                if let Some(drug_id) = self.db.find_generic_drug(&candidate, tier)? {
                    debug!(name, candidate = %candidate, ?tier, drug_id, "resolved via generic name");
                    return Ok(Some(DrugMatch {
                        drug_id,
                        tier,
                        candidate,
                        via_trade_name: false,
                    }));
                }
            }
        }

        debug!(name, "medication name unresolved");
        Ok(None)
    }

    /// Rank active names by similarity to `name`, one entry per drug.
    pub fn suggest(&self, name: &str, limit: usize) -> ResolverResult<Vec<DrugSuggestion>> {
        let candidates = name_candidates(name);
        let Some(query) = candidates.last() else {
            return Ok(Vec::new());
        };

        let mut best: HashMap<i64, DrugSuggestion> = HashMap::new();
        for (drug_id, stored_name) in self.db.list_active_drug_names()? {
            let similarity = fuzzy_match(query, &stored_name.trim().to_ascii_uppercase());
            if similarity < MIN_SUGGESTION_SIMILARITY {
                continue;
            }
            let better = best
                .get(&drug_id)
                .map_or(true, |existing| similarity > existing.similarity);
            if better {
                best.insert(
                    drug_id,
                    DrugSuggestion {
                        drug_id,
                        name: stored_name,
                        similarity,
                    },
                );
            }
        }

        let mut suggestions: Vec<DrugSuggestion> = best.into_values().collect();
        suggestions.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.drug_id.cmp(&b.drug_id))
        });
        suggestions.truncate(limit);
        Ok(suggestions)
    }
}

/// Lookup candidates for a name: full string, then without dosage suffix.
///
/// Folding is ASCII-only to match SQLite's `UPPER`.
pub fn name_candidates(name: &str) -> Vec<String> {
    let full = name.trim().to_ascii_uppercase();
    if full.is_empty() {
        return Vec::new();
    }

    let stripped = DOSAGE_SUFFIX.replace(&full, "").trim().to_string();
    if stripped.is_empty() || stripped == full {
        vec![full]
    } else {
        vec![full, stripped]
    }
}

/// Compute fuzzy string similarity using combined metrics.
fn fuzzy_match(a: &str, b: &str) -> f64 {
    // Jaro-Winkler favours shared prefixes, which brand/generic typos usually keep
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Drug, TradeName};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();

        db.upsert_drug(&Drug::new(1, "PACLITAXEL".into(), "chemotherapy".into()))
            .unwrap();
        db.upsert_drug(&Drug::new(2, "TRASTUZUMAB".into(), "targeted".into()))
            .unwrap();
        db.upsert_drug(&Drug::new(3, "CISPLATIN".into(), "chemotherapy".into()))
            .unwrap();
        db.upsert_drug(&Drug::new(4, "ONDANSETRON".into(), "supportive".into()))
            .unwrap();
        db.upsert_drug(&Drug::new(5, "CARBOPLATIN".into(), "chemotherapy".into()))
            .unwrap();

        db.upsert_trade_name(&TradeName::new(1, 2, "Herceptin".into()))
            .unwrap();
        db.upsert_trade_name(&TradeName::new(2, 1, "Taxol".into()))
            .unwrap();
        // Trade name that contains another drug's generic name
        db.upsert_trade_name(&TradeName::new(3, 5, "Paraplatin-CISPLATIN free".into()))
            .unwrap();

        db
    }

    #[test]
    fn test_name_candidates() {
        assert_eq!(
            name_candidates("Paclitaxel 300 mg"),
            vec!["PACLITAXEL 300 MG", "PACLITAXEL"]
        );
        assert_eq!(
            name_candidates("HERCEPTIN 440MG/20ML VIAL"),
            vec!["HERCEPTIN 440MG/20ML VIAL", "HERCEPTIN"]
        );
        assert_eq!(name_candidates("Povidone 10 %"), vec!["POVIDONE 10 %", "POVIDONE"]);
        assert_eq!(name_candidates("5-FU"), vec!["5-FU"]);
        assert_eq!(name_candidates("ZOLEDRONIC ACID 4 PREFILL"), vec!["ZOLEDRONIC ACID 4 PREFILL", "ZOLEDRONIC ACID"]);
        assert!(name_candidates("   ").is_empty());
    }

    #[test]
    fn test_non_ascii_names_fold_like_sqlite() {
        let db = setup_db();
        db.upsert_drug(&Drug::new(7, "Bévacizumab".into(), "targeted".into()))
            .unwrap();
        let resolver = DrugResolver::new(&db);

        assert_eq!(name_candidates("bévacizumab 400 mg"), vec!["BéVACIZUMAB 400 MG", "BéVACIZUMAB"]);
        let hit = resolver.resolve_match("bévacizumab 400 mg").unwrap().unwrap();
        assert_eq!(hit.drug_id, 7);
        assert_eq!(hit.tier, NameTier::Exact);
    }

    #[test]
    fn test_resolve_exact_generic() {
        let db = setup_db();
        let resolver = DrugResolver::new(&db);

        let hit = resolver.resolve_match("paclitaxel").unwrap().unwrap();
        assert_eq!(hit.drug_id, 1);
        assert_eq!(hit.tier, NameTier::Exact);
        assert!(!hit.via_trade_name);
    }

    #[test]
    fn test_trade_name_beats_generic_in_same_tier() {
        let db = setup_db();
        db.upsert_drug(&Drug::new(6, "TAXOL".into(), "legacy".into()))
            .unwrap();
        let resolver = DrugResolver::new(&db);

        let hit = resolver.resolve_match("TAXOL").unwrap().unwrap();
        assert_eq!(hit.drug_id, 1);
        assert!(hit.via_trade_name);
    }

    #[test]
    fn test_exact_beats_substring_on_unrelated_name() {
        let db = setup_db();
        let resolver = DrugResolver::new(&db);

        // "Paraplatin-CISPLATIN free" contains CISPLATIN, but the exact generic wins
        assert_eq!(resolver.resolve("Cisplatin").unwrap(), Some(3));
    }

    #[test]
    fn test_dosage_stripped_candidate() {
        let db = setup_db();
        let resolver = DrugResolver::new(&db);

        let hit = resolver.resolve_match("Herceptin 440 mg vial").unwrap().unwrap();
        assert_eq!(hit.drug_id, 2);
        assert_eq!(hit.candidate, "HERCEPTIN");
        assert_eq!(hit.tier, NameTier::Exact);
    }

    #[test]
    fn test_prefix_tier() {
        let db = setup_db();
        let resolver = DrugResolver::new(&db);

        let hit = resolver.resolve_match("ONDANSET").unwrap().unwrap();
        assert_eq!(hit.drug_id, 4);
        assert_eq!(hit.tier, NameTier::Prefix);
    }

    #[test]
    fn test_short_candidates_skip_substring_tier() {
        let db = setup_db();
        let resolver = DrugResolver::new(&db);

        // "AXOL" occurs inside TAXOL, but 4 characters is too short
        assert_eq!(resolver.resolve("AXOL").unwrap(), None);
        // Five characters are enough
        assert_eq!(resolver.resolve("ASTUZ").unwrap(), Some(2));
    }

    #[test]
    fn test_inactive_rows_do_not_resolve() {
        let db = setup_db();
        let mut trade = TradeName::new(1, 2, "Herceptin".into());
        trade.active = false;
        db.upsert_trade_name(&trade).unwrap();

        let resolver = DrugResolver::new(&db);
        assert_eq!(resolver.resolve("HERCEPTIN").unwrap(), None);
        assert_eq!(resolver.resolve("TRASTUZUMAB").unwrap(), Some(2));
    }

    #[test]
    fn test_unresolved_returns_none() {
        let db = setup_db();
        let resolver = DrugResolver::new(&db);
        assert_eq!(resolver.resolve("NORMAL SALINE 1000 ML").unwrap(), None);
        assert_eq!(resolver.resolve("").unwrap(), None);
    }

    #[test]
    fn test_suggest_typo() {
        let db = setup_db();
        let resolver = DrugResolver::new(&db);

        let suggestions = resolver.suggest("PACLITAXL 300 MG", 3).unwrap();
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].drug_id, 1);
        assert!(suggestions.len() <= 3);
        assert!(suggestions.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_fuzzy_match() {
        assert!(fuzzy_match("PACLITAXEL", "PACLITAXEL") > 0.99);
        assert!(fuzzy_match("PACLITAXEL", "PACLITAXL") > 0.85);
        assert!(fuzzy_match("PACLITAXEL", "ONDANSETRON") < 0.5);
    }
}
