//! Resolvers that turn free-text clinical entries into catalog ids.
//!
//! - [`SiteResolver`]: longest-prefix ICD-10 → cancer site
//! - [`DrugResolver`]: medication name → drug via tiered name matching

mod drug;
mod site;

pub use drug::*;
pub use site::*;

use thiserror::Error;

/// Resolver errors.
///
/// "No match" is never an error; only store failures surface here.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),
}

pub type ResolverResult<T> = Result<T, ResolverError>;
