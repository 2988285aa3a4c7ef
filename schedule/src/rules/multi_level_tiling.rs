//! Multi-level tiling.
//!
//! Every loop of a block is split into as many pieces as the [`TilingStructure`] has levels of
//! the loop's kind, and the pieces are reordered level by level, outer to inner. Reads and writes
//! can then be staged through caches placed at the last loop of chosen levels.
//!
//! The tensor-intrinsic, tensor-core and wide-vector variants drive the same pipeline through
//! [`MultiLevelTiling`]'s crate-private steps.

use std::fmt;
use std::sync::Arc;

use bon::bon;
use itertools::Itertools;
use rand::rngs::StdRng;
use snafu::ensure;
use vesta_ir::{BlockRef, IterKind, LoopRef, Schedule};

use crate::analysis::{bound_iter, innermost_write_iter, iter_extent, needs_multi_level_tiling};
use crate::attr;
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::{RuleState, ScheduleRule, derive};
use crate::structure::{ReuseConfig, ReuseType, TilingStructure};

/// Predicate replacing the default applicability test.
pub type BlockFilter = Arc<dyn Fn(&Schedule, BlockRef) -> bool + Send + Sync>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Validated, immutable tiling configuration shared by every clone of a rule.
pub(crate) struct TilingConfig {
    pub structure: TilingStructure,
    pub tile_binds: Vec<String>,
    /// `-1` leaves the innermost factor unbounded.
    pub max_innermost_factor: i64,
    pub vector_load_lens: Vec<i64>,
    pub reuse_read: ReuseConfig,
    pub reuse_write: ReuseConfig,
    pub filter_fn: Option<BlockFilter>,
    /// Register width used by the wide-vector variant for the output's innermost loop.
    pub vector_length_in_bits: Option<i64>,
}

impl TilingConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        structure: &str,
        tile_binds: Option<Vec<String>>,
        max_innermost_factor: i64,
        vector_load_lens: Option<Vec<i64>>,
        reuse_read: ReuseConfig,
        reuse_write: ReuseConfig,
        filter_fn: Option<BlockFilter>,
    ) -> Result<Self> {
        let structure: TilingStructure = structure.parse()?;
        let tile_binds = tile_binds.unwrap_or_default();
        ensure!(
            tile_binds.len() <= structure.len(),
            InvalidStructureSnafu { structure: structure.to_string(), reason: "more tile bindings than tile levels" }
        );
        ensure!(
            max_innermost_factor > 0 || max_innermost_factor == -1,
            InvalidInnermostFactorSnafu { value: max_innermost_factor }
        );
        ensure!(reuse_read.req != ReuseType::May, OptionalReadReuseSnafu);
        reuse_read.validate("read", structure.len())?;
        reuse_write.validate("write", structure.len())?;
        Ok(Self {
            structure,
            tile_binds,
            max_innermost_factor,
            vector_load_lens: vector_load_lens.unwrap_or_default(),
            reuse_read,
            reuse_write,
            filter_fn,
            vector_length_in_bits: None,
        })
    }

    fn level_anchor(&self, tiles: &[Vec<LoopRef>], level: usize) -> Option<LoopRef> {
        tiles.get(level.checked_sub(1)?)?.last().copied()
    }
}

impl fmt::Display for TilingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "structure={}", self.structure)?;
        if !self.tile_binds.is_empty() {
            write!(f, ", tile_binds=[{}]", self.tile_binds.join(", "))?;
        }
        write!(f, ", max_innermost_factor={}", self.max_innermost_factor)?;
        if !self.vector_load_lens.is_empty() {
            write!(f, ", vector_load_lens={:?}", self.vector_load_lens)?;
        }
        if let Some(bits) = self.vector_length_in_bits {
            write!(f, ", vector_length_in_bits={bits}")?;
        }
        write!(f, ", reuse_read={}, reuse_write={}", self.reuse_read, self.reuse_write)?;
        if self.filter_fn.is_some() {
            f.write_str(", filter_fn=<fn>")?;
        }
        Ok(())
    }
}

/// Thread limits of a GPU target, resolved at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ThreadLimits {
    pub warp_size: i64,
    pub max_threads_per_block: i64,
}

// ============================================================================
// STATE
// ============================================================================

/// A candidate in flight: its schedule, the tiled block and the loops of every tile level.
#[derive(Debug, Clone)]
pub(crate) struct TilingState {
    pub sch: Schedule,
    pub block: BlockRef,
    pub tiles: Vec<Vec<LoopRef>>,
}

impl TilingState {
    pub fn new(sch: Schedule, block: BlockRef) -> Self {
        Self { sch, block, tiles: Vec::new() }
    }

    pub fn with_schedule(&self, sch: Schedule) -> Self {
        Self { sch, block: self.block, tiles: self.tiles.clone() }
    }
}

/// Feed every state through `step`, concatenating the results in order.
pub(crate) fn expand(states: Vec<TilingState>, step: impl FnMut(TilingState) -> Vec<TilingState>) -> Vec<TilingState> {
    states.into_iter().flat_map(step).collect()
}

// ============================================================================
// RULE
// ============================================================================

/// Multi-level tiling with optional cache stages.
#[derive(Clone)]
pub struct MultiLevelTiling {
    pub(crate) config: Arc<TilingConfig>,
    pub(crate) thread_limits: Option<ThreadLimits>,
    pub(crate) state: RuleState,
}

#[bon]
impl MultiLevelTiling {
    /// Create a multi-level tiling rule with builder pattern.
    ///
    /// Fails when the structure does not parse, a reuse level is outside it, read reuse is
    /// optional or the innermost factor is neither positive nor `-1`.
    #[builder]
    pub fn new(
        #[builder(into)] structure: String,
        tile_binds: Option<Vec<String>>,
        #[builder(default = -1)] max_innermost_factor: i64,
        vector_load_lens: Option<Vec<i64>>,
        #[builder(default)] reuse_read: ReuseConfig,
        #[builder(default)] reuse_write: ReuseConfig,
        filter_fn: Option<BlockFilter>,
    ) -> Result<Self> {
        let config = TilingConfig::new(
            &structure,
            tile_binds,
            max_innermost_factor,
            vector_load_lens,
            reuse_read,
            reuse_write,
            filter_fn,
        )?;
        Ok(Self::from_config(config))
    }
}

impl MultiLevelTiling {
    pub(crate) fn from_config(config: TilingConfig) -> Self {
        Self { config: Arc::new(config), thread_limits: None, state: RuleState::default() }
    }

    pub fn structure(&self) -> &TilingStructure {
        &self.config.structure
    }

    pub(crate) fn initialize(&mut self, rule: &str, context: &TuneContext) {
        if !self.state.initialize(rule, context) {
            return;
        }
        let target = context.target();
        self.thread_limits = match (target.warp_size, target.max_threads_per_block) {
            (Some(warp_size), Some(max_threads_per_block)) => Some(ThreadLimits { warp_size, max_threads_per_block }),
            _ => None,
        };
    }

    pub(crate) fn is_applicable(&self, sch: &Schedule, block: BlockRef) -> bool {
        match &self.config.filter_fn {
            Some(filter) => filter(sch, block),
            None => needs_multi_level_tiling(sch.program(), block),
        }
    }

    /// Tiling followed by write and read reuse.
    pub(crate) fn run(&mut self, states: Vec<TilingState>) -> Vec<TilingState> {
        let states = expand(states, |s| self.tile_loop_nest(s).into_iter().collect());
        let states = expand(states, |s| self.add_write_reuse(s));
        expand(states, |s| self.add_read_reuse(s))
    }

    /// Split and reorder the block's loops into tile levels, binding the leading ones.
    pub(crate) fn tile_loop_nest(&mut self, state: TilingState) -> Option<TilingState> {
        let config = self.config.clone();
        let limits = self.thread_limits;
        let rng = self.state.rng();
        let block = state.block;
        let (sch, tiles) = derive(&state.sch, |sch| tile(&config, limits, sch, block, rng))?;
        Some(TilingState { sch, block, tiles })
    }

    /// Stage the block's output through a cache written back at each configured level.
    pub(crate) fn add_write_reuse(&self, state: TilingState) -> Vec<TilingState> {
        let reuse = &self.config.reuse_write;
        if reuse.req == ReuseType::No {
            return vec![state];
        }
        let mut out = Vec::with_capacity(reuse.levels.len() + 1);
        if reuse.req == ReuseType::May {
            out.push(state.clone());
        }
        let Some((base, cache)) = derive(&state.sch, |sch| sch.cache_write(state.block, 0, &reuse.scope)) else {
            return out;
        };
        for &level in &reuse.levels {
            let Some(anchor) = self.config.level_anchor(&state.tiles, level) else { continue };
            if let Some((sch, ())) = derive(&base, |sch| sch.reverse_compute_at(cache, anchor)) {
                out.push(state.with_schedule(sch));
            }
        }
        out
    }

    /// Stage every input through a cache loaded at each configured level, one candidate per
    /// level and vector load length.
    pub(crate) fn add_read_reuse(&self, state: TilingState) -> Vec<TilingState> {
        let reuse = &self.config.reuse_read;
        if reuse.req == ReuseType::No {
            return vec![state];
        }
        let lens: Vec<Option<i64>> = match self.config.vector_load_lens.as_slice() {
            [] => vec![None],
            lens => lens.iter().copied().map(Some).collect(),
        };
        let mut out = Vec::new();
        for &level in &reuse.levels {
            let Some(anchor) = self.config.level_anchor(&state.tiles, level) else { continue };
            for &len in &lens {
                let staged = derive(&state.sch, |sch| cache_reads_at(sch, state.block, anchor, &reuse.scope, len));
                if let Some((sch, ())) = staged {
                    out.push(state.with_schedule(sch));
                }
            }
        }
        out
    }
}

impl ScheduleRule for MultiLevelTiling {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        self.initialize("MultiLevelTiling", context);
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        if !self.is_applicable(sch, block) {
            tracing::trace!("block does not need multi-level tiling");
            return Vec::new();
        }
        let out: Vec<Schedule> =
            self.run(vec![TilingState::new(sch.clone(), block)]).into_iter().map(|s| s.sch).collect();
        tracing::debug!(rule = "MultiLevelTiling", candidates = out.len(), "tiled");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for MultiLevelTiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiLevelTiling({})", self.config)
    }
}

// ============================================================================
// STEPS
// ============================================================================

fn tile(
    config: &TilingConfig,
    limits: Option<ThreadLimits>,
    sch: &mut Schedule,
    block: BlockRef,
    rng: &mut StdRng,
) -> vesta_ir::Result<Vec<Vec<LoopRef>>> {
    let structure = &config.structure;
    let s_idx = structure.positions(IterKind::Spatial);
    let r_idx = structure.positions(IterKind::Reduce);
    sch.annotate_block(block, attr::TILING_STRUCTURE, structure.to_string())?;

    let blk = sch.block(block)?.clone();
    let vector_iter = config.vector_length_in_bits.and(innermost_write_iter(&blk));
    let mut tiles: Vec<Vec<LoopRef>> = vec![Vec::new(); structure.len()];
    let mut vector_loop = None;
    for l in sch.get_loops(block)? {
        let Some(iter) = bound_iter(&blk, l) else { continue };
        let levels = match blk.iter_vars[iter].kind {
            IterKind::Spatial => &s_idx,
            IterKind::Reduce => &r_idx,
        };
        if levels.is_empty() {
            continue;
        }
        let pieces = match config.vector_length_in_bits {
            Some(bits) if vector_iter == Some(iter) => {
                let (pieces, vector) = split_wide_vector(config, sch, l, bits, levels.len(), rng)?;
                vector_loop = vector;
                pieces
            }
            _ => {
                let factors = sch.sample_perfect_tile(l, levels.len(), config.max_innermost_factor, rng)?;
                sch.split(l, &factors)?
            }
        };
        for (&level, piece) in levels.iter().zip(pieces) {
            tiles[level].push(piece);
        }
    }

    let order = tiles.iter().flatten().copied().collect_vec();
    sch.reorder(&order)?;
    if let Some(vector) = vector_loop {
        sch.vectorize(vector)?;
    }

    for (level, thread) in config.tile_binds.iter().enumerate() {
        if tiles[level].is_empty() {
            continue;
        }
        let fused = sch.fuse(&tiles[level])?;
        sch.bind(fused, thread)?;
        tiles[level] = vec![fused];
    }

    if let Some(limits) = limits {
        let spatial = iter_extent(&blk, IterKind::Spatial);
        let low = if spatial > 2 * limits.warp_size { limits.warp_size } else { 1 };
        sch.annotate_block(block, attr::THREAD_EXTENT_LOW_INCLUSIVE, low)?;
        sch.annotate_block(block, attr::THREAD_EXTENT_HIGH_INCLUSIVE, limits.max_threads_per_block)?;
    }
    tracing::trace!(levels = tiles.len(), "tiled loop nest");
    Ok(tiles)
}

/// Split the output's innermost loop so its last piece spans one vector register.
///
/// Falls back to regular sampling when the extent is not a multiple of the vector length.
fn split_wide_vector(
    config: &TilingConfig,
    sch: &mut Schedule,
    loop_ref: LoopRef,
    bits: i64,
    n: usize,
    rng: &mut StdRng,
) -> vesta_ir::Result<(Vec<LoopRef>, Option<LoopRef>)> {
    let blk_dtype_bits = output_bits(sch, loop_ref)?;
    let vec_len = (bits / blk_dtype_bits.max(1)).max(1);
    let extent = sch.for_loop(loop_ref)?.extent;
    if n == 1 {
        let pieces = sch.split(loop_ref, &[extent])?;
        return Ok((pieces.clone(), pieces.last().copied()));
    }
    if extent <= vec_len {
        let mut factors = vec![1; n - 1];
        factors.push(extent);
        let pieces = sch.split(loop_ref, &factors)?;
        let vector = pieces.last().copied();
        return Ok((pieces, vector));
    }
    if extent % vec_len == 0 {
        let halves = sch.split(loop_ref, &[extent / vec_len, vec_len])?;
        let (outer, inner) = (halves[0], halves[1]);
        let factors = sch.sample_perfect_tile(outer, n - 1, config.max_innermost_factor, rng)?;
        let mut pieces = sch.split(outer, &factors)?;
        pieces.push(inner);
        return Ok((pieces, Some(inner)));
    }
    let factors = sch.sample_perfect_tile(loop_ref, n, config.max_innermost_factor, rng)?;
    Ok((sch.split(loop_ref, &factors)?, None))
}

/// Element width of the buffer written by the single block under `loop_ref`.
fn output_bits(sch: &Schedule, loop_ref: LoopRef) -> vesta_ir::Result<i64> {
    let program = sch.program();
    for block in program.leaf_blocks_under(loop_ref.id())? {
        if let Some(write) = program.block(block)?.writes.first() {
            return Ok(program.buffer(&write.buffer)?.dtype.bits() as i64);
        }
    }
    Ok(32)
}

/// Cache every input of `block` not also written by it, computed at `anchor`.
fn cache_reads_at(
    sch: &mut Schedule,
    block: BlockRef,
    anchor: LoopRef,
    scope: &str,
    vector_len: Option<i64>,
) -> vesta_ir::Result<()> {
    let blk = sch.block(block)?.clone();
    for (i, read) in blk.reads.iter().enumerate() {
        if blk.writes_buffer(&read.buffer) {
            continue;
        }
        let copy = sch.cache_read(block, i, scope)?;
        sch.compute_at(copy, anchor)?;
        let inner = sch.get_loops(copy)?.into_iter().skip_while(|l| *l != anchor).skip(1).collect_vec();
        if !inner.is_empty() {
            sch.fuse(&inner)?;
        }
        if let Some(len) = vector_len {
            sch.annotate_block(copy, attr::COOPERATIVE_FETCH, len)?;
        }
    }
    Ok(())
}
