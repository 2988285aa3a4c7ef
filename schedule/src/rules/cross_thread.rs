//! Cross-thread reduction on GPU targets.

use std::fmt;

use bon::bon;
use snafu::ensure;
use vesta_ir::{BlockRef, Schedule};

use crate::analysis::{needs_rfactor_or_cross_thread, reorder_and_fuse_reduction_loops};
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::{RuleState, ScheduleRule, derive};

/// Binds the fused reduction loop of a block to `threadIdx.x`, one candidate per thread extent
/// that divides it.
#[derive(Debug, Clone)]
pub struct CrossThreadReduction {
    thread_extents: Vec<i64>,
    /// `(max_threads_per_block, warp_size)`, when the target has thread blocks.
    limits: Option<(i64, i64)>,
    state: RuleState,
}

#[bon]
impl CrossThreadReduction {
    /// Create a cross-thread reduction rule with builder pattern.
    #[builder]
    pub fn new(thread_extents: Vec<i64>) -> Result<Self> {
        ensure!(
            !thread_extents.is_empty(),
            InvalidThreadExtentsSnafu { extents: thread_extents.clone(), reason: "at least one extent is required" }
        );
        ensure!(
            thread_extents.iter().all(|&t| t > 0),
            InvalidThreadExtentsSnafu { extents: thread_extents.clone(), reason: "extents must be positive" }
        );
        Ok(Self { thread_extents, limits: None, state: RuleState::default() })
    }
}

impl CrossThreadReduction {
    pub fn thread_extents(&self) -> &[i64] {
        &self.thread_extents
    }
}

impl ScheduleRule for CrossThreadReduction {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        if self.state.initialize("CrossThreadReduction", context) {
            let target = context.target();
            self.limits = target.max_threads_per_block.zip(target.warp_size);
        }
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        let Some((max_threads, warp_size)) = self.limits else { return Vec::new() };
        let program = sch.program();
        if !needs_rfactor_or_cross_thread(program, block, max_threads, warp_size) {
            return Vec::new();
        }
        let Ok(loops) = sch.get_loops(block) else { return Vec::new() };
        let bound = loops.iter().any(|l| sch.for_loop(*l).is_ok_and(|lp| lp.kind.thread_tag().is_some()));
        if bound {
            return Vec::new();
        }

        let Some((base, fused)) = derive(sch, |sch| reorder_and_fuse_reduction_loops(sch, block)) else {
            return Vec::new();
        };
        let Ok(extent) = base.for_loop(fused).map(|l| l.extent) else { return Vec::new() };
        let mut out = Vec::new();
        for &threads in self.thread_extents.iter().filter(|&&t| extent % t == 0) {
            let bound = derive(&base, |sch| {
                let pieces = sch.split(fused, &[extent / threads, threads])?;
                sch.bind(pieces[1], "threadIdx.x")
            });
            if let Some((sch, ())) = bound {
                out.push(sch);
            }
        }
        tracing::debug!(rule = "CrossThreadReduction", extent, candidates = out.len(), "bound reduction");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for CrossThreadReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CrossThreadReduction(thread_extents={:?})", self.thread_extents)
    }
}
