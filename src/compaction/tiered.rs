use super::{Choice, CompactionStrategy};
use crate::table::SsTable;
use crate::Config;
use std::sync::Arc;

/// Size-tiered compaction strategy (STCS)
///
/// Tables are bucketed into tiers by file size; once a tier accumulates
/// enough tables, they are merged into a single larger table, which then
/// lands in a higher tier.
///
/// STCS suffers from high read and temporarily doubled space
/// amplification, but has good write amplification.
#[derive(Clone)]
pub struct Strategy {
    /// Size of the smallest tier
    pub base_size: u64,

    /// Number of same-tier tables that triggers a merge
    pub tier_min_tables: usize,

    /// Upper bound of tables merged at once
    pub tier_max_tables: usize,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            base_size: 8 * 1_024 * 1_024,
            tier_min_tables: 4,
            tier_max_tables: 8,
        }
    }
}

impl Strategy {
    /// Tier of a table: the number of doublings above the base size.
    fn tier_of(&self, file_size: u64) -> u32 {
        (file_size.max(self.base_size) / self.base_size)
            .next_power_of_two()
            .trailing_zeros()
    }
}

impl CompactionStrategy for Strategy {
    fn get_name(&self) -> &'static str {
        "TieredStrategy"
    }

    fn choose(&self, tables: &[Arc<SsTable>], _config: &Config) -> Choice {
        let mut tiers: std::collections::BTreeMap<u32, Vec<&Arc<SsTable>>> =
            std::collections::BTreeMap::new();

        for table in tables {
            tiers.entry(self.tier_of(table.file_size())).or_default().push(table);
        }

        // Merge the smallest tier that is full; smaller tiers churn faster
        for (tier, members) in tiers {
            if members.len() >= self.tier_min_tables {
                let mut generations: Vec<_> =
                    members.iter().map(|table| table.generation()).collect();

                // Prefer the oldest tables of the tier
                generations.sort_unstable();
                generations.truncate(self.tier_max_tables);

                log::debug!(
                    "tier {tier} is full ({} tables), merging {generations:?}",
                    members.len(),
                );

                return Choice::Merge(generations);
            }
        }

        Choice::DoNothing
    }
}
