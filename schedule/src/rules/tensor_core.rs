//! Multi-level tiling for Tensor Core intrinsic groups.
//!
//! Each matching group yields its own candidates: the block's inner tile is tensorized with the
//! group's compute intrinsic, the outer block is tiled, the accumulator is staged through a
//! `wmma.accumulator` fragment and both operands through `wmma.matrix_a`/`wmma.matrix_b`
//! fragments, each cache annotated with the group intrinsic that will move it.

use std::fmt;
use std::sync::Arc;

use bon::bon;
use snafu::ensure;
use vesta_ir::{BlockRef, IterKind, LoopRef, Schedule, Value};

use super::multi_level_tiling::{BlockFilter, MultiLevelTiling, TilingConfig, TilingState, expand};
use super::with_intrin::tile_with_tensor_intrin;
use crate::attr;
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::{ScheduleRule, derive};
use crate::structure::{IntrinGroup, ReuseConfig};

const ACCUMULATOR_SCOPE: &str = "wmma.accumulator";
const MATRIX_A_SCOPE: &str = "wmma.matrix_a";
const MATRIX_B_SCOPE: &str = "wmma.matrix_b";

#[derive(Clone)]
pub struct MultiLevelTilingTensorCore {
    groups: Arc<Vec<IntrinGroup>>,
    use_software_pipeline: bool,
    tiling: MultiLevelTiling,
}

#[bon]
impl MultiLevelTilingTensorCore {
    /// Create a Tensor Core tiling rule with builder pattern.
    ///
    /// Every group is validated; an empty group list is rejected.
    #[builder]
    pub fn new(
        intrin_groups: Vec<IntrinGroup>,
        #[builder(into)] structure: String,
        tile_binds: Option<Vec<String>>,
        #[builder(default = -1)] max_innermost_factor: i64,
        vector_load_lens: Option<Vec<i64>>,
        #[builder(default)] reuse_read: ReuseConfig,
        #[builder(default)] reuse_write: ReuseConfig,
        #[builder(default)] use_software_pipeline: bool,
        filter_fn: Option<BlockFilter>,
    ) -> Result<Self> {
        ensure!(!intrin_groups.is_empty(), NoIntrinGroupsSnafu);
        for group in &intrin_groups {
            group.validate()?;
        }
        let config = TilingConfig::new(
            &structure,
            tile_binds,
            max_innermost_factor,
            vector_load_lens,
            reuse_read,
            reuse_write,
            filter_fn,
        )?;
        Ok(Self {
            groups: Arc::new(intrin_groups),
            use_software_pipeline,
            tiling: MultiLevelTiling::from_config(config),
        })
    }
}

impl MultiLevelTilingTensorCore {
    pub fn intrin_groups(&self) -> &[IntrinGroup] {
        &self.groups
    }

    fn reduce_levels(&self) -> Vec<usize> {
        self.tiling.config.structure.positions(IterKind::Reduce)
    }

    /// Stage the accumulator through a fragment written back inside the outermost reduction level.
    fn add_accumulator_reuse(&self, state: TilingState, group: &IntrinGroup) -> Vec<TilingState> {
        let r_idx = self.reduce_levels();
        let Some(anchor) = r_idx.first().and_then(|&r| last_loop_before(&state.tiles, r)) else {
            return Vec::new();
        };
        let staged = derive(&state.sch, |sch| {
            let acc = sch.cache_write(state.block, 0, ACCUMULATOR_SCOPE)?;
            sch.reverse_compute_at(acc, anchor)?;
            sch.annotate_block(acc, attr::AUTO_TENSORIZE, group.store.as_str())
        });
        staged.map(|(sch, ())| state.with_schedule(sch)).into_iter().collect()
    }

    /// Load both operands into fragments inside the second reduction level.
    fn add_fragment_reuse(&self, state: TilingState, group: &IntrinGroup) -> Vec<TilingState> {
        let r_idx = self.reduce_levels();
        let Some(anchor) = r_idx.get(1).or(r_idx.last()).and_then(|&r| state.tiles.get(r)?.last().copied()) else {
            return Vec::new();
        };
        let staged = derive(&state.sch, |sch| {
            let (a_read, b_read) = match &sch.block(state.block)?.body {
                Some(Value::Intrin(_, operands)) => match operands.as_slice() {
                    [a, b] => (a.as_load(), b.as_load()),
                    _ => (None, None),
                },
                _ => (None, None),
            };
            let operands = [(a_read, MATRIX_A_SCOPE, &group.load_a), (b_read, MATRIX_B_SCOPE, &group.load_b)];
            for (read, scope, intrin) in operands {
                let Some(read) = read else { continue };
                let fragment = sch.cache_read(state.block, read, scope)?;
                sch.compute_at(fragment, anchor)?;
                sch.annotate_block(fragment, attr::AUTO_TENSORIZE, intrin.as_str())?;
            }
            Ok(())
        });
        staged.map(|(sch, ())| state.with_schedule(sch)).into_iter().collect()
    }

    /// Annotate the two outer reduction loops as a software pipeline.
    fn add_software_pipeline(&self, state: TilingState) -> Vec<TilingState> {
        let r_idx = self.reduce_levels();
        let loops = |level: Option<&usize>| level.and_then(|&r| state.tiles.get(r)?.last().copied());
        let (Some(outer), Some(inner)) = (loops(r_idx.first()), loops(r_idx.get(1))) else {
            return vec![state];
        };
        let staged = derive(&state.sch, |sch| {
            sch.annotate_loop(outer, attr::SOFTWARE_PIPELINE_STAGE, vec![0, 0, 0, 0, 0, 1, 1])?;
            sch.annotate_loop(outer, attr::SOFTWARE_PIPELINE_ORDER, vec![0, 3, 1, 4, 5, 2, 6])?;
            sch.annotate_loop(inner, attr::SOFTWARE_PIPELINE_STAGE, vec![0, 0, 1])?;
            sch.annotate_loop(inner, attr::SOFTWARE_PIPELINE_ORDER, vec![0, 1, 2])
        });
        staged.map(|(sch, ())| state.with_schedule(sch)).into_iter().collect()
    }

    fn apply_group(&mut self, sch: &Schedule, block: BlockRef, group: &IntrinGroup) -> Vec<Schedule> {
        let tensorized = derive(sch, |sch| {
            let Some(outer) = tile_with_tensor_intrin(sch, block, &group.compute)? else { return Ok(None) };
            sch.tensorize(outer, &group.compute)?;
            sch.annotate_block(outer, attr::AUTO_TENSORIZE, group.compute.as_str())?;
            sch.annotate_block(outer, attr::AUTO_TENSORIZE_INIT, group.init.as_str())?;
            Ok(Some(outer))
        });
        let Some((tensorized, Some(outer))) = tensorized else { return Vec::new() };

        let states: Vec<TilingState> =
            self.tiling.tile_loop_nest(TilingState::new(tensorized, outer)).into_iter().collect();
        let states = expand(states, |s| self.tiling.add_write_reuse(s));
        let states = expand(states, |s| self.add_accumulator_reuse(s, group));
        let states = expand(states, |s| self.tiling.add_read_reuse(s));
        let mut states = expand(states, |s| self.add_fragment_reuse(s, group));
        if self.use_software_pipeline {
            states = expand(states, |s| self.add_software_pipeline(s));
        }
        states.into_iter().map(|s| s.sch).collect()
    }
}

/// Last loop of the level right outside `level`.
fn last_loop_before(tiles: &[Vec<LoopRef>], level: usize) -> Option<LoopRef> {
    tiles.get(level.checked_sub(1)?)?.last().copied()
}

impl ScheduleRule for MultiLevelTilingTensorCore {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        self.tiling.initialize("MultiLevelTilingTensorCore", context);
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.tiling.state.check();
        if !self.tiling.is_applicable(sch, block) {
            return Vec::new();
        }
        let groups = self.groups.clone();
        let mut out = Vec::new();
        for group in groups.iter() {
            let candidates = self.apply_group(sch, block, group);
            tracing::trace!(group = %group, candidates = candidates.len(), "intrinsic group");
            out.extend(candidates);
        }
        tracing::debug!(rule = "MultiLevelTilingTensorCore", candidates = out.len(), "tiled");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for MultiLevelTilingTensorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self.groups.iter().map(ToString::to_string).collect();
        write!(
            f,
            "MultiLevelTilingTensorCore(intrin_groups=[{}], {}, use_software_pipeline={})",
            groups.join(", "),
            self.tiling.config,
            self.use_software_pipeline
        )
    }
}
