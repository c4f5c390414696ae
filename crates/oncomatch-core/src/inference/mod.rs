//! Rule-based clinical signal extraction from diagnosis codes.

mod stage;

pub use stage::*;
