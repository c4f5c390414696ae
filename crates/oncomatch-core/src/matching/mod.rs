//! Protocol matching for visits.
//!
//! Matching happens in two phases. Gathering reads everything a visit needs
//! from the store (and lazily caches the visit's site). Scoring is pure and
//! runs on the gathered [`MatchInput`]; batches score in parallel.

mod scorer;

pub use scorer::*;

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{Database, DbError};
use crate::formulary::FormularySource;
use crate::inference::infer_stage;
use crate::models::{BatchSummary, MatchOutcome};
use crate::resolver::{ResolverError, SiteResolver};

/// Largest batch `match_visits_batch` accepts.
pub const MAX_BATCH_SIZE: usize = 20;

/// Matching errors.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Batch of {requested} visits exceeds the limit of {max}")]
    BatchTooLarge { requested: usize, max: usize },
}

pub type MatchEngineResult<T> = Result<T, MatchError>;

/// Result of the gathering phase for one visit.
#[derive(Debug, Clone)]
pub enum Gathered {
    /// Short-circuited before scoring
    Done(MatchOutcome),
    /// Ready to score
    Input(Box<MatchInput>),
}

impl Gathered {
    pub fn into_outcome(self) -> MatchOutcome {
        match self {
            Gathered::Done(outcome) => outcome,
            Gathered::Input(input) => score_visit(&input),
        }
    }
}

/// Matches visits against the protocol catalog.
pub struct MatchEngine<'a> {
    db: &'a Database,
    formulary: &'a dyn FormularySource,
}

impl<'a> MatchEngine<'a> {
    pub fn new(db: &'a Database, formulary: &'a dyn FormularySource) -> Self {
        Self { db, formulary }
    }

    /// Rank protocols for one visit.
    pub fn match_visit(&self, vn: &str) -> MatchEngineResult<MatchOutcome> {
        Ok(self.gather(vn)?.into_outcome())
    }

    /// Match up to [`MAX_BATCH_SIZE`] visits.
    ///
    /// A visit that fails maps to `None`; its siblings are unaffected.
    pub fn match_visits_batch(
        &self,
        vns: &[String],
    ) -> MatchEngineResult<BTreeMap<String, Option<BatchSummary>>> {
        if vns.len() > MAX_BATCH_SIZE {
            return Err(MatchError::BatchTooLarge {
                requested: vns.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        // The connection is single-threaded; only scoring fans out
        let gathered: Vec<(String, Option<Gathered>)> = vns
            .iter()
            .map(|vn| {
                let result = self
                    .gather(vn)
                    .inspect_err(|e| warn!(vn = %vn, error = %e, "batch item failed"))
                    .ok();
                (vn.clone(), result)
            })
            .collect();

        Ok(gathered
            .into_par_iter()
            .map(|(vn, gathered)| {
                let summary = gathered.map(|g| BatchSummary::from(&g.into_outcome()));
                (vn, summary)
            })
            .collect())
    }

    /// Read everything needed to score a visit.
    pub fn gather(&self, vn: &str) -> MatchEngineResult<Gathered> {
        let Some(visit) = self.db.get_visit(vn)? else {
            return Ok(Gathered::Done(MatchOutcome::empty(
                vn,
                None,
                format!("Visit {vn} not found"),
            )));
        };

        let stage = infer_stage(visit.secondary_diagnoses.as_deref());

        let site_id = match visit.resolved_site_id {
            Some(site_id) => Some(site_id),
            None => {
                let resolved = SiteResolver::new(self.db).resolve(&visit.primary_diagnosis)?;
                if let Some(site_id) = resolved {
                    // Same input always resolves to the same site, so a lost race is harmless
                    let written = self.db.cache_visit_site(visit.id, site_id)?;
                    debug!(vn, site_id, written, "cached resolved site");
                }
                resolved
            }
        };

        let Some(site_id) = site_id else {
            let modality = stage.modality;
            return Ok(Gathered::Done(MatchOutcome {
                vn: vn.to_string(),
                results: vec![site_unresolved_result(&visit.primary_diagnosis, modality)],
                stage_inference: Some(stage),
                note: Some(format!(
                    "Cancer site unresolved for primary diagnosis {}",
                    visit.primary_diagnosis
                )),
            }));
        };

        let drug_ids: Vec<i64> = self
            .db
            .list_visit_medications(visit.id)?
            .iter()
            .filter_map(|med| med.resolved_drug_id)
            .collect();
        let resolved_drugs = self.db.get_drugs(&drug_ids)?;

        let candidates = self.db.load_site_candidates(site_id)?;

        let mut formulary = HashMap::new();
        for candidate in &candidates {
            let code = candidate.protocol.code.trim().to_uppercase();
            match self.formulary.approved_drug_names(&code) {
                Ok(names) if !names.is_empty() => {
                    formulary.insert(code, names);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(protocol = %code, error = %e, "formulary unavailable; scoring without it");
                }
            }
        }

        let confirmed_protocols = self.db.confirmed_protocols_for_patient(&visit.hn, &visit.vn)?;

        Ok(Gathered::Input(Box::new(MatchInput {
            vn: visit.vn,
            stage,
            resolved_drugs,
            candidates,
            formulary,
            confirmed_protocols,
        })))
    }
}
