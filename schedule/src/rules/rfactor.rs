//! Reduction factoring for reductions too sequential for the available cores.

use std::fmt;

use bon::bon;
use snafu::ensure;
use vesta_ir::{BlockRef, Schedule};

use crate::analysis::{needs_rfactor_or_cross_thread, reorder_and_fuse_reduction_loops};
use crate::attr;
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::{RuleState, ScheduleRule, derive};

#[derive(Debug, Clone)]
pub struct AddRFactor {
    /// `-1` disables the rule.
    max_jobs_per_core: i64,
    max_innermost_factor: i64,
    max_parallel_extent: i64,
    max_parallel_basic: i64,
    state: RuleState,
}

#[bon]
impl AddRFactor {
    /// Create an rfactor rule with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = 16)] max_jobs_per_core: i64,
        #[builder(default = -1)] max_innermost_factor: i64,
    ) -> Result<Self> {
        ensure!(
            max_innermost_factor > 0 || max_innermost_factor == -1,
            InvalidInnermostFactorSnafu { value: max_innermost_factor }
        );
        Ok(Self {
            max_jobs_per_core,
            max_innermost_factor,
            max_parallel_extent: -1,
            max_parallel_basic: -1,
            state: RuleState::default(),
        })
    }
}

impl ScheduleRule for AddRFactor {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        if self.state.initialize("AddRFactor", context) {
            let cores = context.target().num_cores;
            self.max_parallel_basic = cores;
            self.max_parallel_extent = cores.saturating_mul(self.max_jobs_per_core);
        }
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        if self.max_jobs_per_core == -1 {
            return Vec::new();
        }
        let program = sch.program();
        if !program.block(block).is_ok_and(|b| b.is_reduction()) {
            return Vec::new();
        }
        if !needs_rfactor_or_cross_thread(program, block, self.max_parallel_extent, self.max_parallel_basic) {
            tracing::trace!("reduction is parallel enough");
            return Vec::new();
        }

        let max_innermost_factor = self.max_innermost_factor;
        let rng = self.state.rng();
        let split = derive(sch, |sch| {
            let fused = reorder_and_fuse_reduction_loops(sch, block)?;
            let factors = sch.sample_perfect_tile(fused, 2, max_innermost_factor, rng)?;
            sch.split(fused, &factors)
        });
        let Some((base, pieces)) = split else { return Vec::new() };

        let mut out = Vec::with_capacity(pieces.len() + 1);
        for &l in &pieces {
            let factored = derive(&base, |sch| {
                sch.rfactor(l)?;
                sch.annotate_block(block, attr::RANDOM_COMPUTE_PRODUCER, 1)
            });
            if let Some((sch, ())) = factored {
                out.push(sch);
            }
        }
        out.push(sch.clone());
        tracing::debug!(rule = "AddRFactor", candidates = out.len(), "factored reduction");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for AddRFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AddRFactor(max_jobs_per_core={}, max_innermost_factor={})",
            self.max_jobs_per_core, self.max_innermost_factor
        )
    }
}
