//! Block and loop-nest analysis shared by the rules.

use vesta_ir::{Block, BlockRef, IterKind, LoopRef, Program, Schedule};

use crate::attr;

/// Kind of a loop, derived from the iterators it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Spatial,
    Reduce,
    /// Drives both spatial and reduction iterators.
    Mixed,
}

/// Whether multi-level tiling already processed the block.
pub fn is_tiled(block: &Block) -> bool {
    block.annotation(attr::TILING_STRUCTURE).is_some()
}

/// Whether a bound loop drives the block's iterators.
pub fn loop_kind(block: &Block, loop_ref: LoopRef) -> LoopKind {
    let mut spatial = false;
    let mut reduce = false;
    for (iv, binding) in block.iter_vars.iter().zip(&block.bindings) {
        if binding.mentions(|l| *l == loop_ref) {
            match iv.kind {
                IterKind::Spatial => spatial = true,
                IterKind::Reduce => reduce = true,
            }
        }
    }
    match (spatial, reduce) {
        (_, false) => LoopKind::Spatial,
        (false, true) => LoopKind::Reduce,
        (true, true) => LoopKind::Mixed,
    }
}

/// Iterator a loop is bound to, when the binding is the bare loop variable.
pub fn bound_iter(block: &Block, loop_ref: LoopRef) -> Option<usize> {
    block.bindings.iter().position(|b| b.as_var() == Some(&loop_ref))
}

/// Whether a block is a good candidate for multi-level tiling: a reduction with room for data
/// reuse, a single output and trivially bound iterators.
pub fn needs_multi_level_tiling(program: &Program, block: BlockRef) -> bool {
    let Ok(blk) = program.block(block) else { return false };
    if is_tiled(blk) || blk.writes.len() != 1 || blk.reads.is_empty() || !blk.is_reduction() {
        return false;
    }
    if !program.has_trivial_binding(block).unwrap_or(false) {
        return false;
    }
    let output = &blk.writes[0].buffer;
    let mut seen: Vec<&str> = Vec::with_capacity(blk.reads.len());
    let mut reuse = 0;
    for read in blk.reads.iter().filter(|r| r.buffer != *output) {
        if seen.contains(&read.buffer.as_str()) {
            return false;
        }
        seen.push(&read.buffer);
        reuse += blk
            .iter_vars
            .iter()
            .enumerate()
            .filter(|(_, iv)| iv.kind == IterKind::Spatial && iv.extent > 1)
            .filter(|(i, _)| !read.region.iter().any(|r| r.min.mentions(|v| v == i)))
            .count();
    }
    reuse >= 1
}

/// Whether a reduction is too sequential for the parallelism available, so that rfactor or a
/// cross-thread reduction would help.
///
/// The block's loops must form a single-child chain with no loop driving both spatial and
/// reduction iterators.
pub fn needs_rfactor_or_cross_thread(
    program: &Program,
    block: BlockRef,
    max_parallel_extent: i64,
    max_parallel_basic: i64,
) -> bool {
    let Ok(blk) = program.block(block) else { return false };
    if blk.writes.is_empty() || blk.reduction.is_none() || !blk.is_reduction() || is_tiled(blk) {
        return false;
    }
    if !program.has_trivial_binding(block).unwrap_or(false) {
        return false;
    }
    let Ok(loops) = program.loops_above(block.id()) else { return false };

    let mut spatial_extent = 1i64;
    let mut reduce_extent = 1i64;
    let mut has_reduce_loop = false;
    for (i, &l) in loops.iter().enumerate() {
        let Ok(extent) = program.extent(l) else { return false };
        match loop_kind(blk, l) {
            LoopKind::Mixed => return false,
            LoopKind::Reduce => {
                has_reduce_loop = true;
                reduce_extent = reduce_extent.saturating_mul(extent);
            }
            LoopKind::Spatial => spatial_extent = spatial_extent.saturating_mul(extent),
        }
        let next = loops.get(i + 1).map_or(block.id(), |n| n.id());
        if program.children(l.id()).map(|c| c != [next]).unwrap_or(true) {
            return false;
        }
    }
    if !has_reduce_loop {
        return false;
    }

    if needs_multi_level_tiling(program, block) {
        !(spatial_extent >= reduce_extent || spatial_extent > max_parallel_extent)
    } else if reduce_extent > 1 {
        reduce_extent > max_parallel_basic
    } else {
        false
    }
}

/// Move the block's reduction loops innermost and fuse them into one.
pub fn reorder_and_fuse_reduction_loops(sch: &mut Schedule, block: BlockRef) -> vesta_ir::Result<LoopRef> {
    let loops = sch.get_loops(block)?;
    let blk = sch.block(block)?;
    let (reduce, spatial): (Vec<LoopRef>, Vec<LoopRef>) =
        loops.iter().partition(|l| loop_kind(blk, **l) == LoopKind::Reduce);
    let order: Vec<LoopRef> = spatial.into_iter().chain(reduce.iter().copied()).collect();
    sch.reorder(&order)?;
    sch.fuse(&reduce)
}

/// Product of the extents of iterators of the given kind.
pub fn iter_extent(block: &Block, kind: IterKind) -> i64 {
    block.iter_vars.iter().filter(|iv| iv.kind == kind).map(|iv| iv.extent).product()
}

/// Iterator indexing the innermost dimension of the block's first write.
pub fn innermost_write_iter(block: &Block) -> Option<usize> {
    block.writes.first()?.region.last()?.min.as_var().copied()
}

/// Whether every read indexes distinct bare iterators.
pub fn reads_are_injective(block: &Block) -> bool {
    block.reads.iter().all(|r| match r.direct_iters() {
        Some(iters) => iters.iter().enumerate().all(|(i, it)| !iters[..i].contains(it)),
        None => false,
    })
}

/// Whether every read visits iterators in the order the write does.
pub fn reads_are_ordered(block: &Block) -> bool {
    let Some(order) = block.writes.first().and_then(|w| w.direct_iters()) else { return false };
    block.reads.iter().all(|r| {
        let Some(iters) = r.direct_iters() else { return false };
        let ranks: Option<Vec<usize>> = iters.iter().map(|it| order.iter().position(|o| o == it)).collect();
        ranks.is_some_and(|ranks| ranks.windows(2).all(|w| w[0] < w[1]))
    })
}
