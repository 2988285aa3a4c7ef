//! Blockize and tensorize.

use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::expr::Expr;
use crate::intrin::get_intrin;
use crate::program::{Block, BlockRef, LoopRef, Node, Program};
use crate::types::{BufferRegion, IterVar, Range};
use crate::value::Value;

impl Program {
    /// Wrap the subtree of `loop_ref` into a new outer block iterating over whole tiles.
    ///
    /// The subtree must be a perfect loop nest around one leaf block. Each iterator is split into
    /// an outer part (bound outside the loop) and an inner tile driven by the loops under it.
    #[tracing::instrument(skip_all, fields(loop_ref = %loop_ref))]
    pub(crate) fn blockize(&mut self, loop_ref: LoopRef) -> Result<BlockRef> {
        let leaves = self.leaf_blocks_under(loop_ref.0)?;
        ensure!(leaves.len() == 1, BlockizeRejectedSnafu { reason: "loop must enclose exactly one block" });
        let inner = leaves[0];
        ensure!(
            self.scope_of(loop_ref.0)? == self.scope_of(inner.0)?,
            BlockizeRejectedSnafu { reason: "loop and block are in different scopes" }
        );
        let mut current = loop_ref.0;
        loop {
            let children = self.children(current)?;
            ensure!(children.len() == 1, BlockizeRejectedSnafu { reason: "loop nest is not perfect" });
            if children[0] == inner.0 {
                break;
            }
            current = children[0];
        }

        let blk = self.block(inner)?.clone();
        ensure!(!blk.is_guarded(), GuardedBlockSnafu { block: blk.name.clone(), operation: "blockize" });
        let is_inner = |l: &LoopRef| self.is_ancestor(loop_ref.0, l.0);
        let mut iter_vars = Vec::with_capacity(blk.iter_vars.len());
        let mut bindings = Vec::with_capacity(blk.iter_vars.len());
        let mut tile = Vec::with_capacity(blk.iter_vars.len());
        for (iv, binding) in blk.iter_vars.iter().zip(&blk.bindings) {
            let (outer, coeffs) = binding
                .split_inner(&is_inner)
                .context(BlockizeRejectedSnafu { reason: "binding is not affine in the inner loops" })?;
            let mut extent = 1;
            for (l, c) in coeffs {
                ensure!(c > 0, BlockizeRejectedSnafu { reason: "negative inner stride" });
                extent += c * (self.extent(l)? - 1);
            }
            ensure!(iv.extent % extent == 0, BlockizeRejectedSnafu { reason: "inner tile does not divide the iterator" });
            let outer = outer
                .try_div_exact(extent)
                .context(BlockizeRejectedSnafu { reason: "outer binding is not a multiple of the tile" })?;
            iter_vars.push(IterVar { kind: iv.kind, extent: iv.extent / extent });
            bindings.push(outer);
            tile.push(extent);
        }

        let mut outer = Block::named(self.fresh_block_name(&format!("{}_o", blk.name)));
        outer.iter_vars = iter_vars;
        outer.bindings = bindings;
        outer.reads = blk.reads.iter().map(|r| self.tile_region(r, &tile)).collect::<Result<_>>()?;
        outer.writes = blk.writes.iter().map(|r| self.tile_region(r, &tile)).collect::<Result<_>>()?;
        outer.reduction = blk.reduction.clone();

        let (parent, pos) = self.detach(loop_ref.0)?;
        let id = self.alloc(Node::Block(outer));
        self.attach(id, parent, pos)?;
        self.attach(loop_ref.0, id, 0)?;
        Ok(BlockRef(id))
    }

    /// Region covered by one outer-block instance, given the inner tile of every iterator.
    fn tile_region(&self, region: &BufferRegion, tile: &[i64]) -> Result<BufferRegion> {
        let shape = &self.buffer(&region.buffer)?.shape;
        let mut out = region.substitute(&mut |i| Expr::Var(*i).scale(tile.get(*i).copied().unwrap_or(1)));
        for (d, (range, orig)) in out.region.iter_mut().zip(&region.region).enumerate() {
            match orig.min.linear() {
                Some(lin) if lin.coeffs.values().all(|c| *c >= 0) => {
                    let spread: i64 = lin.coeffs.iter().map(|(i, c)| c * (tile.get(*i).copied().unwrap_or(1) - 1)).sum();
                    range.extent = orig.extent + spread;
                }
                _ => *range = Range { min: Expr::Const(0), extent: shape.get(d).copied().unwrap_or(1) },
            }
        }
        Ok(out)
    }

    /// Replace the body of a blockized block with a compute intrinsic.
    ///
    /// The single leaf inside must match the intrinsic and its tile must have exactly the
    /// intrinsic's shape. The inner loops and block are discarded.
    #[tracing::instrument(skip_all, fields(block = %block, intrin = %intrin))]
    pub(crate) fn tensorize(&mut self, block: BlockRef, intrin: &str) -> Result<()> {
        let desc = get_intrin(intrin)?;
        let outer = self.block(block)?.clone();
        let mismatch = || IntrinMismatchSnafu { block: outer.name.clone(), intrin };
        let compute = desc.compute().context(mismatch())?;

        let leaves = self.leaf_blocks_under(block.0)?;
        ensure!(leaves.len() == 1 && leaves[0] != block, mismatch());
        let inner = self.block(leaves[0])?;
        let matched = compute.match_block(self, inner).context(mismatch())?;
        ensure!(
            inner.reads.len() == outer.reads.len() && inner.iter_vars.len() == outer.iter_vars.len(),
            mismatch()
        );

        let tiles = matched.tiles(compute);
        let is_inner = |l: &LoopRef| self.is_ancestor(block.0, l.0);
        for (i, binding) in inner.bindings.iter().enumerate() {
            let (_, coeffs) = binding.split_inner(&is_inner).context(mismatch())?;
            let mut extent = 1;
            for (l, c) in coeffs {
                extent += c * (self.extent(l)? - 1);
            }
            let expected = tiles.iter().find(|(it, _)| *it == i).map_or(1, |(_, e)| *e);
            ensure!(extent == expected, mismatch());
        }

        for child in self.children(block.0)?.to_vec() {
            self.release_subtree(child)?;
        }
        self.entry_mut(block.0)?.children.clear();
        let operands = vec![Value::Load(matched.a_read), Value::Load(matched.b_read)];
        self.block_mut(block)?.body = Some(Value::Intrin(intrin.to_string(), operands));
        Ok(())
    }
}
