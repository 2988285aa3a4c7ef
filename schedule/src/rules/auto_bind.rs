//! GPU thread binding for blocks left unbound by the other rules.

use std::fmt;

use bon::bon;
use snafu::ensure;
use vesta_ir::{BlockRef, LoopRef, Schedule};

use crate::analysis::{LoopKind, is_tiled, loop_kind};
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::{RuleState, ScheduleRule, derive};

const BLOCK_IDX: &str = "blockIdx.x";
const THREAD_IDX: &str = "threadIdx.x";

#[derive(Debug, Clone)]
pub struct AutoBind {
    max_threadblocks: i64,
    thread_extents: Vec<i64>,
    /// `-1` until resolved from the target.
    max_threads_per_block: i64,
    state: RuleState,
}

#[bon]
impl AutoBind {
    /// Create an auto-bind rule with builder pattern.
    ///
    /// `max_threads_per_block` of `-1` takes the target's limit at initialization.
    #[builder]
    pub fn new(
        #[builder(default = 256)] max_threadblocks: i64,
        #[builder(default = vec![32, 64, 128, 256, 512, 1024])] thread_extents: Vec<i64>,
        #[builder(default = -1)] max_threads_per_block: i64,
    ) -> Result<Self> {
        ensure!(
            thread_extents.iter().all(|&t| t > 0),
            InvalidThreadExtentsSnafu { extents: thread_extents.clone(), reason: "extents must be positive" }
        );
        ensure!(
            max_threadblocks > 0,
            InvalidThreadExtentsSnafu { extents: vec![max_threadblocks], reason: "max_threadblocks must be positive" }
        );
        Ok(Self { max_threadblocks, thread_extents, max_threads_per_block, state: RuleState::default() })
    }
}

impl AutoBind {
    /// Thread extents to choose from for a fused loop of `extent` iterations.
    ///
    /// Extents above the per-block limit are dropped. Short loops keep the extents that fit them,
    /// or the smallest one when none does.
    fn thread_candidates(&self, extent: i64) -> Vec<i64> {
        let allowed: Vec<i64> =
            self.thread_extents.iter().copied().filter(|&t| t <= self.max_threads_per_block).collect();
        let Some(&smallest) = allowed.iter().min() else { return vec![self.max_threads_per_block] };
        let fitting: Vec<i64> = allowed.iter().copied().filter(|&t| t <= extent).collect();
        if fitting.is_empty() { vec![smallest] } else { fitting }
    }
}

impl ScheduleRule for AutoBind {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        if self.state.initialize("AutoBind", context) && self.max_threads_per_block == -1 {
            self.max_threads_per_block = context.target().max_threads_per_block.unwrap_or(-1);
        }
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        if self.max_threads_per_block <= 0 {
            return Vec::new();
        }
        let program = sch.program();
        if block == program.root() {
            return Vec::new();
        }
        let Ok(blk) = program.block(block) else { return Vec::new() };
        if is_tiled(blk) {
            return Vec::new();
        }
        let Ok(loops) = sch.get_loops(block) else { return Vec::new() };
        let tags: Vec<Option<&str>> =
            loops.iter().map(|l| sch.for_loop(*l).ok().and_then(|lp| lp.kind.thread_tag())).collect();
        if tags.first().is_none_or(|t| t.is_some()) {
            tracing::trace!("no loops or already bound");
            return Vec::new();
        }

        let leading: Vec<LoopRef> = loops
            .iter()
            .copied()
            .take_while(|l| {
                sch.for_loop(*l).is_ok_and(|lp| lp.kind.is_serial()) && loop_kind(blk, *l) == LoopKind::Spatial
            })
            .collect();
        if leading.is_empty() {
            return Vec::new();
        }
        let threads_bound = tags.iter().flatten().any(|t| t.starts_with("threadIdx"));

        let candidates = if threads_bound {
            derive(sch, |sch| {
                let fused = sch.fuse(&leading)?;
                sch.bind(fused, BLOCK_IDX)
            })
        } else {
            let max_threadblocks = self.max_threadblocks;
            let extent: i64 = leading.iter().filter_map(|l| sch.for_loop(*l).ok()).map(|lp| lp.extent).product();
            let choices = self.thread_candidates(extent);
            let probs = vec![1.0 / choices.len() as f64; choices.len()];
            let rng = self.state.rng();
            derive(sch, |sch| {
                let fused = sch.fuse(&leading)?;
                let threads = sch.sample_categorical(&choices, &probs, rng)?;
                let blocks = (extent + threads - 1) / threads;
                if blocks > max_threadblocks {
                    let pieces = sch.split_guarded(fused, &[max_threadblocks, threads])?;
                    sch.bind(pieces[1], BLOCK_IDX)?;
                    sch.bind(pieces[2], THREAD_IDX)
                } else {
                    let pieces = sch.split_guarded(fused, &[threads])?;
                    sch.bind(pieces[0], BLOCK_IDX)?;
                    sch.bind(pieces[1], THREAD_IDX)
                }
            })
        };
        let out: Vec<Schedule> = candidates.map(|(sch, ())| sch).into_iter().collect();
        tracing::debug!(rule = "AutoBind", threads_bound, candidates = out.len(), "bound loops");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for AutoBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AutoBind(max_threadblocks={}, thread_extents={:?}, max_threads_per_block={})",
            self.max_threadblocks, self.thread_extents, self.max_threads_per_block
        )
    }
}
