use super::{Choice, CompactionStrategy};
use crate::table::SsTable;
use crate::Config;
use std::sync::Arc;

/// Major compaction
///
/// Merges every sorted table into a single one. Runs whenever it is
/// scheduled (after a flush lands, or on a manual compaction trigger).
#[derive(Clone, Default)]
pub struct Strategy;

impl CompactionStrategy for Strategy {
    fn get_name(&self) -> &'static str {
        "MajorCompaction"
    }

    fn choose(&self, tables: &[Arc<SsTable>], _config: &Config) -> Choice {
        if tables.len() < 2 {
            return Choice::DoNothing;
        }

        let mut generations: Vec<_> = tables.iter().map(|table| table.generation()).collect();
        generations.sort_unstable();

        Choice::Merge(generations)
    }
}
