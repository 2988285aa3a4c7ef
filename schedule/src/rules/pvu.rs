//! Parallelization, vectorization and unrolling hints on the root block.

use std::fmt;

use bon::bon;
use vesta_ir::{BlockRef, Schedule};

use crate::attr;
use crate::config::TuneContext;
use crate::rule::{RuleState, ScheduleRule, derive};

/// Marks the root block with limits that lowering uses to parallelize, vectorize and unroll the
/// outer loops of every block. `-1` disables the corresponding hint.
#[derive(Debug, Clone)]
pub struct ParallelizeVectorizeUnroll {
    max_jobs_per_core: i64,
    max_vectorize_extent: i64,
    unroll_max_steps: Vec<i64>,
    unroll_explicit: bool,
    max_parallel_extent: i64,
    state: RuleState,
}

#[bon]
impl ParallelizeVectorizeUnroll {
    /// Create a parallelize/vectorize/unroll rule with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = 16)] max_jobs_per_core: i64,
        #[builder(default = 16)] max_vectorize_extent: i64,
        #[builder(default)] unroll_max_steps: Vec<i64>,
        #[builder(default = true)] unroll_explicit: bool,
    ) -> Self {
        Self {
            max_jobs_per_core,
            max_vectorize_extent,
            unroll_max_steps,
            unroll_explicit,
            max_parallel_extent: -1,
            state: RuleState::default(),
        }
    }
}

impl ScheduleRule for ParallelizeVectorizeUnroll {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        if self.state.initialize("ParallelizeVectorizeUnroll", context) && self.max_jobs_per_core != -1 {
            self.max_parallel_extent = context.target().num_cores.saturating_mul(self.max_jobs_per_core);
        }
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        if block != sch.root() {
            return Vec::new();
        }
        let marked = derive(sch, |sch| {
            if self.max_parallel_extent != -1 {
                sch.annotate_block(block, attr::PARALLEL, self.max_parallel_extent)?;
            }
            if self.max_vectorize_extent != -1 {
                sch.annotate_block(block, attr::VECTORIZE, self.max_vectorize_extent)?;
            }
            Ok(())
        });
        let Some((base, ())) = marked else { return Vec::new() };
        if self.unroll_max_steps.is_empty() || base.program().is_pure_spatial() {
            return vec![base];
        }

        let key = if self.unroll_explicit { attr::UNROLL_EXPLICIT } else { attr::UNROLL_IMPLICIT };
        let out: Vec<Schedule> = self
            .unroll_max_steps
            .iter()
            .filter_map(|&steps| derive(&base, |sch| sch.annotate_block(block, key, steps)))
            .map(|(sch, ())| sch)
            .collect();
        tracing::debug!(rule = "ParallelizeVectorizeUnroll", candidates = out.len(), "marked root");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for ParallelizeVectorizeUnroll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ParallelizeVectorizeUnroll(max_jobs_per_core={}, max_vectorize_extent={}, unroll_max_steps={:?}, \
             unroll_explicit={})",
            self.max_jobs_per_core, self.max_vectorize_extent, self.unroll_max_steps, self.unroll_explicit
        )
    }
}
