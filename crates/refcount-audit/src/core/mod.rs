//! Core types shared by the audit pipeline.
//!
//! - [`range`]: identifiers, half-open ranges and the balanced partition
//! - [`counts`]: per-identifier count sets and mismatches
//! - [`check`]: the referencing locations to recount
//! - [`identifier`]: SQL identifier validation and quoting
//! - [`traits`]: the connection provider and mismatch sink seams

pub mod check;
pub mod counts;
pub mod identifier;
pub mod range;
pub mod traits;

pub use check::{CheckPlan, CheckSpec};
pub use counts::{CountRecord, CountSet, Mismatch};
pub use range::{BlobId, IdRange, RangeCollection, Ranges, ID_MAX};
pub use traits::{ConnectionProvider, MismatchSink};
