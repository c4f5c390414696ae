//! Domain models for the oncomatch system.

mod drug;
mod matching;
mod protocol;
mod site;
mod visit;

pub use drug::*;
pub use matching::*;
pub use protocol::*;
pub use site::*;
pub use visit::*;
