//! Formulary lookup: per-protocol sets of approved generic drug names.
//!
//! The formulary is maintained outside this crate. A missing or empty set is
//! "no data", and a failing source degrades to "no data" at the call site.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Formulary lookup errors.
#[derive(Error, Debug)]
pub enum FormularyError {
    #[error("Formulary source unavailable: {0}")]
    Unavailable(String),
}

/// Source of approved drug names keyed by protocol code.
pub trait FormularySource: Send + Sync {
    /// Normalized (uppercase) generic names approved for `protocol_code`.
    ///
    /// An unknown code yields an empty set.
    fn approved_drug_names(&self, protocol_code: &str) -> Result<HashSet<String>, FormularyError>;
}

/// In-memory formulary loaded by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StaticFormulary {
    entries: HashMap<String, HashSet<String>>,
}

impl StaticFormulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the approved names of one protocol. Names are normalized.
    pub fn set<I, S>(&mut self, protocol_code: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: HashSet<String> = names
            .into_iter()
            .map(|name| normalize_name(name.as_ref()))
            .filter(|name| !name.is_empty())
            .collect();
        self.entries.insert(normalize_name(protocol_code), names);
    }
}

impl FormularySource for StaticFormulary {
    fn approved_drug_names(&self, protocol_code: &str) -> Result<HashSet<String>, FormularyError> {
        Ok(self
            .entries
            .get(&normalize_name(protocol_code))
            .cloned()
            .unwrap_or_default())
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}
