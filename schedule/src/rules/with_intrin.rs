//! Multi-level tiling around a tensor intrinsic.

use std::fmt;

use bon::bon;
use itertools::Itertools;
use snafu::{OptionExt, ensure};
use vesta_ir::{BlockRef, Schedule, get_intrin};

use super::multi_level_tiling::{BlockFilter, MultiLevelTiling, TilingConfig, TilingState};
use crate::analysis::bound_iter;
use crate::attr;
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::{ScheduleRule, derive};
use crate::structure::ReuseConfig;

/// Split the loops of `block` so the intrinsic's iterators form an inner tile of exactly its
/// shape, and blockize that tile.
///
/// Returns the new outer block, or `None` when the block does not match the intrinsic.
pub(crate) fn tile_with_tensor_intrin(
    sch: &mut Schedule,
    block: BlockRef,
    intrin: &str,
) -> vesta_ir::Result<Option<BlockRef>> {
    let intrin = get_intrin(intrin)?;
    let Some(compute) = intrin.compute() else { return Ok(None) };
    if !sch.program().has_trivial_binding(block)? {
        return Ok(None);
    }
    let blk = sch.block(block)?.clone();
    let Some(matched) = compute.match_block(sch.program(), &blk) else { return Ok(None) };
    let tiles = matched.tiles(compute);

    let mut outer = Vec::new();
    let mut inner = Vec::new();
    for l in sch.get_loops(block)? {
        let tile = bound_iter(&blk, l).and_then(|it| tiles.iter().position(|(i, _)| *i == it));
        match tile {
            Some(rank) => {
                let extent = sch.for_loop(l)?.extent;
                let size = tiles[rank].1;
                let pieces = sch.split(l, &[extent / size, size])?;
                outer.push(pieces[0]);
                inner.push((rank, pieces[1]));
            }
            None => outer.push(l),
        }
    }
    inner.sort_by_key(|(rank, _)| *rank);
    let Some(&(_, first)) = inner.first() else { return Ok(None) };
    let order = outer.iter().copied().chain(inner.iter().map(|(_, l)| *l)).collect_vec();
    sch.reorder(&order)?;
    sch.blockize(first).map(Some)
}

/// Check that `name` is a registered compute intrinsic.
pub(crate) fn require_compute_intrin(role: &'static str, name: &str) -> Result<()> {
    let intrin = get_intrin(name).ok().context(UnknownIntrinSnafu { role, name })?;
    ensure!(intrin.compute().is_some(), IntrinRoleMismatchSnafu { role, name });
    Ok(())
}

/// Multi-level tiling of the outer block left by tensorizing a block's inner tile.
#[derive(Clone)]
pub struct MultiLevelTilingWithIntrin {
    intrin_name: String,
    tiling: MultiLevelTiling,
}

#[bon]
impl MultiLevelTilingWithIntrin {
    /// Create a tensor-intrinsic tiling rule with builder pattern.
    #[builder]
    pub fn new(
        #[builder(into)] intrin_name: String,
        #[builder(into)] structure: String,
        tile_binds: Option<Vec<String>>,
        #[builder(default = -1)] max_innermost_factor: i64,
        vector_load_lens: Option<Vec<i64>>,
        #[builder(default)] reuse_read: ReuseConfig,
        #[builder(default)] reuse_write: ReuseConfig,
        filter_fn: Option<BlockFilter>,
    ) -> Result<Self> {
        require_compute_intrin("compute", &intrin_name)?;
        let config = TilingConfig::new(
            &structure,
            tile_binds,
            max_innermost_factor,
            vector_load_lens,
            reuse_read,
            reuse_write,
            filter_fn,
        )?;
        Ok(Self { intrin_name, tiling: MultiLevelTiling::from_config(config) })
    }
}

impl MultiLevelTilingWithIntrin {
    pub fn intrin_name(&self) -> &str {
        &self.intrin_name
    }
}

impl ScheduleRule for MultiLevelTilingWithIntrin {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        self.tiling.initialize("MultiLevelTilingWithIntrin", context);
    }

    #[tracing::instrument(skip_all, fields(block = %block, intrin = %self.intrin_name))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.tiling.state.check();
        if !self.tiling.is_applicable(sch, block) {
            return Vec::new();
        }
        let intrin = self.intrin_name.as_str();
        let tensorized = derive(sch, |sch| {
            let Some(outer) = tile_with_tensor_intrin(sch, block, intrin)? else { return Ok(None) };
            sch.tensorize(outer, intrin)?;
            sch.annotate_block(outer, attr::AUTO_TENSORIZE, intrin)?;
            Ok(Some(outer))
        });
        let Some((tensorized, Some(outer))) = tensorized else {
            tracing::trace!("block does not match the intrinsic");
            return Vec::new();
        };
        let out: Vec<Schedule> =
            self.tiling.run(vec![TilingState::new(tensorized, outer)]).into_iter().map(|s| s.sch).collect();
        tracing::debug!(rule = "MultiLevelTilingWithIntrin", candidates = out.len(), "tiled");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for MultiLevelTilingWithIntrin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiLevelTilingWithIntrin(intrin={}, {})", self.intrin_name, self.tiling.config)
    }
}
