//! Install and manage conda environments.
//!
//! This crate ties the krait components together: the [`Context`]
//! configuration value, the [`PrefixData`] ledger of an installed prefix,
//! and the [`install`] module with the atomic unlink/link transaction engine
//! that applies a solver result to a prefix.

mod context;
pub mod install;
pub mod ops;
mod prefix_data;

pub use context::{Context, PathConflict};
pub use ops::{update_prefix, OpsError, PrefixUpdate, PrefixUpdateRequest};
pub use prefix_data::{PrefixData, PrefixDataError};
