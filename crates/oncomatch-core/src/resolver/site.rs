//! Longest-prefix ICD-10 → cancer site resolution.
//!
//! The store holds exact prefix rows rather than ranges, so specificity is
//! enforced by lookup order: the full normalized code is tried first, then
//! one character shorter, down to two characters.

use tracing::debug;

use crate::db::Database;
use crate::models::normalize_icd10;

use super::ResolverResult;

/// Shortest prefix ever looked up.
pub const MIN_PREFIX_LEN: usize = 2;

/// Resolves ICD-10 codes to cancer site ids.
pub struct SiteResolver<'a> {
    db: &'a Database,
}

impl<'a> SiteResolver<'a> {
    /// Create a new site resolver.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve a code to the site of its most specific active prefix.
    pub fn resolve(&self, icd_code: &str) -> ResolverResult<Option<i64>> {
        let normalized = normalize_icd10(icd_code);
        let chars: Vec<char> = normalized.chars().collect();

        for len in (MIN_PREFIX_LEN..=chars.len()).rev() {
            let prefix: String = chars[..len].iter().collect();
            if let Some(site_id) = self.db.find_active_prefix(&prefix)? {
                debug!(code = %normalized, prefix = %prefix, site_id, "resolved cancer site");
                return Ok(Some(site_id));
            }
        }

        debug!(code = %normalized, "no cancer site mapping");
        Ok(None)
    }
}
