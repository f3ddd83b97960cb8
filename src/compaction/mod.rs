//! Contains compaction strategies and the compaction worker

pub(crate) mod major;
pub(crate) mod stream;
pub(crate) mod tiered;
pub(crate) mod worker;

pub use major::Strategy as Major;
pub use tiered::Strategy as SizeTiered;

#[doc(hidden)]
pub use worker::{CompactionHandle, Compactor};

use crate::table::SsTable;
use crate::{Config, GenerationId};
use std::sync::Arc;

/// Describes what to do (compact or not)
#[derive(Debug, Eq, PartialEq)]
pub enum Choice {
    /// Just do nothing.
    DoNothing,

    /// Merges some tables into a new generation.
    Merge(Vec<GenerationId>),
}

/// Trait for a compaction strategy
///
/// The strategy receives the current set of sorted tables
/// and emits a choice on what to do.
#[allow(clippy::module_name_repetitions)]
pub trait CompactionStrategy: Send + Sync {
    /// Name of the strategy, for logging.
    fn get_name(&self) -> &'static str;

    /// Decides on what to do based on the current set of sorted tables.
    fn choose(&self, tables: &[Arc<SsTable>], config: &Config) -> Choice;
}
