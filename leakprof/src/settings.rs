use std::time::Duration;

use crate::{LeakError, SearchStrategy};

/// Configuration for sampling and path-to-gc-roots searches.
#[derive(Debug, Clone)]
pub struct LeakSettings {
    /// Maximum number of samples kept. 0 disables sampling.
    pub sample_capacity: usize,
    /// Maximum length of a path explored by the depth-first search.
    pub max_dfs_depth: usize,
    /// Capacity of the depth-first probe stack, in entries. 0 means the search
    /// finds nothing (but still runs and reports samples without chains).
    pub probe_stack_capacity: usize,
    /// Object arrays are visited this many elements at a time.
    pub array_chunk_size: usize,
    /// Number of edges nearest the leak candidate stored in full, the
    /// candidate's own edge included.
    pub leak_context: usize,
    /// Number of edges nearest the root stored in full.
    pub root_context: usize,
    /// Capacity of the breadth-first edge queue, in edges.
    pub edge_queue_capacity: usize,
    pub strategy: SearchStrategy,
    /// Wall-clock budget for one search pass. `None` runs to completion.
    pub time_budget: Option<Duration>,
    /// The time budget is checked once every this many probes.
    pub timer_granularity: u32,
    /// Report samples allocated after the last collection too.
    pub emit_all: bool,
}

impl Default for LeakSettings {
    fn default() -> Self {
        Self {
            sample_capacity: 256,
            max_dfs_depth: 4000,
            probe_stack_capacity: 256 * 1024,
            array_chunk_size: 64,
            leak_context: 100,
            root_context: 100,
            edge_queue_capacity: 64 * 1024,
            strategy: SearchStrategy::DepthFirst,
            time_budget: None,
            timer_granularity: 1000,
            emit_all: false,
        }
    }
}

impl LeakSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_dfs_depth == 0 {
            return Err("max_dfs_depth must be > 0");
        }
        if self.max_dfs_depth > u32::MAX as usize {
            return Err("max_dfs_depth must fit in 32 bits");
        }
        if self.array_chunk_size == 0 {
            return Err("array_chunk_size must be > 0");
        }
        if self.leak_context == 0 || self.root_context == 0 {
            return Err("leak_context and root_context must be > 0");
        }
        if self.strategy == SearchStrategy::BreadthFirst
            && self.edge_queue_capacity == 0
        {
            return Err("breadth-first search needs an edge queue");
        }
        if self.timer_granularity == 0 {
            return Err("timer_granularity must be > 0");
        }
        Ok(())
    }

    pub(crate) fn checked(&self) -> Result<&Self, LeakError> {
        self.validate().map_err(LeakError::InvalidSettings)?;
        Ok(self)
    }

    /// Upper bound on edges materialized for a single chain.
    pub fn max_stored_per_chain(&self) -> usize {
        self.leak_context + 1 + self.root_context
    }
}
