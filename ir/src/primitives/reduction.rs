//! Reduction factoring.

use std::collections::BTreeMap;

use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::expr::Expr;
use crate::program::{Block, BlockRef, LoopRef, Node, Program};
use crate::types::{Annotations, Buffer, IterKind, IterVar, Range};
use crate::value::Value;

impl Program {
    /// Factor the reduction driven by `loop_ref` into a partial-result block.
    ///
    /// The loop's iterations become a spatial dimension of a new `<out>_rf` buffer, computed by a
    /// new block returned here. The original block keeps its name and handle, moves to a fresh
    /// loop nest right after its old subtree, and reduces the partial results.
    #[tracing::instrument(skip_all, fields(loop_ref = %loop_ref))]
    pub(crate) fn rfactor(&mut self, loop_ref: LoopRef) -> Result<BlockRef> {
        let rf_extent = self.extent(loop_ref)?;
        let leaves = self.leaf_blocks_under(loop_ref.0)?;
        ensure!(leaves.len() == 1, RFactorRejectedSnafu { reason: "loop must enclose exactly one block" });
        let block = leaves[0];
        let blk = self.block(block)?.clone();
        ensure!(!blk.is_guarded(), GuardedBlockSnafu { block: blk.name.clone(), operation: "rfactor" });
        let reduction = blk.reduction.clone().context(RFactorRejectedSnafu { reason: "block is not a reduction" })?;
        ensure!(
            blk.writes.len() == 1 && blk.writes[0].is_point(),
            RFactorRejectedSnafu { reason: "block must write one point region" }
        );
        let spatial: Vec<usize> = (0..blk.iter_vars.len()).filter(|&i| blk.iter_vars[i].kind == IterKind::Spatial).collect();
        ensure!(
            blk.writes[0].region.iter().all(|r| !r.min.mentions(|i| !spatial.contains(i))),
            RFactorRejectedSnafu { reason: "output is indexed by a reduction iterator" }
        );

        let drives = |e: &Expr<LoopRef>| e.mentions(|l| *l == loop_ref);
        let factored: Vec<usize> = (0..blk.iter_vars.len())
            .filter(|&i| blk.iter_vars[i].kind == IterKind::Reduce && drives(&blk.bindings[i]))
            .collect();
        ensure!(!factored.is_empty(), RFactorRejectedSnafu { reason: "loop does not drive a reduction iterator" });
        ensure!(
            spatial.iter().all(|&i| !drives(&blk.bindings[i])),
            RFactorRejectedSnafu { reason: "loop drives a spatial iterator" }
        );
        let mut rf_loops: Vec<LoopRef> = Vec::new();
        for &i in &factored {
            for l in blk.bindings[i].vars() {
                if !rf_loops.contains(&l) {
                    rf_loops.push(l);
                }
            }
        }
        ensure!(
            (0..blk.iter_vars.len())
                .filter(|i| !factored.contains(i))
                .all(|i| !blk.bindings[i].mentions(|l| rf_loops.contains(l))),
            RFactorRejectedSnafu { reason: "factored loops also drive other iterators" }
        );

        // rf block: untouched iterators first, then one iterator per factored loop.
        let mut iter_vars = Vec::new();
        let mut bindings = Vec::new();
        let mut subst = vec![Expr::Const(0); blk.iter_vars.len()];
        for i in (0..blk.iter_vars.len()).filter(|i| !factored.contains(i)) {
            subst[i] = Expr::Var(iter_vars.len());
            iter_vars.push(blk.iter_vars[i]);
            bindings.push(blk.bindings[i].clone());
        }
        let mut loop_iter = BTreeMap::new();
        for &l in &rf_loops {
            let kind = if l == loop_ref { IterKind::Spatial } else { IterKind::Reduce };
            loop_iter.insert(l, iter_vars.len());
            iter_vars.push(IterVar { kind, extent: self.extent(l)? });
            bindings.push(Expr::Var(l));
        }
        for &i in &factored {
            subst[i] = blk.bindings[i].substitute(&mut |l| loop_iter.get(l).map_or(Expr::Const(0), |p| Expr::Var(*p)));
        }
        let rf_iter = loop_iter.get(&loop_ref).copied().unwrap_or_default();

        let out = &blk.writes[0];
        let out_buffer = self.buffer(&out.buffer)?.clone();
        let rf_name = self.fresh_buffer_name(&format!("{}_rf", out.buffer));
        let mut rf_shape = vec![rf_extent];
        rf_shape.extend(&out_buffer.shape);
        self.add_buffer(Buffer {
            name: rf_name.clone(),
            shape: rf_shape,
            dtype: out_buffer.dtype,
            scope: out_buffer.scope.clone(),
            is_output: false,
        });

        let mut rf_write = out.substitute(&mut |i| subst[*i].clone());
        rf_write.buffer = rf_name.clone();
        rf_write.region.insert(0, Range::point(Expr::Var(rf_iter)));
        let rf_block = Block {
            name: self.fresh_block_name(&format!("{}_rf", blk.name)),
            iter_vars,
            bindings,
            reads: blk.reads.iter().map(|r| r.substitute(&mut |i| subst[*i].clone())).collect(),
            writes: vec![rf_write],
            body: blk.body.clone(),
            reduction: Some(reduction.clone()),
            predicates: Vec::new(),
            annotations: Annotations::new(),
        };

        // Write-back: the original spatial iterators plus the factored axis as a reduction.
        let mut wb_subst = vec![Expr::Const(0); blk.iter_vars.len()];
        for (j, &i) in spatial.iter().enumerate() {
            wb_subst[i] = Expr::Var(j);
        }
        let mut wb_iters: Vec<IterVar> = spatial.iter().map(|&i| blk.iter_vars[i]).collect();
        wb_iters.push(IterVar::reduce(rf_extent));
        let wb_write = out.substitute(&mut |i| wb_subst[*i].clone());
        let mut wb_read = wb_write.clone();
        wb_read.buffer = rf_name;
        wb_read.region.insert(0, Range::point(Expr::Var(spatial.len())));

        let (scope, _, pos) = self.scope_anchor(block.0)?;
        let (parent, at) = self.detach(block.0)?;
        let rf_id = self.alloc(Node::Block(rf_block));
        self.attach(rf_id, parent, at)?;

        let extents: Vec<i64> = wb_iters.iter().map(|iv| iv.extent).filter(|&e| e > 1).collect();
        let loops = self.insert_loop_nest(scope, pos + 1, &extents)?;
        let mut fresh = loops.iter();
        let wb_bindings = wb_iters
            .iter()
            .map(|iv| match iv.extent {
                1 => Expr::Const(0),
                _ => fresh.next().map_or(Expr::Const(0), |l| Expr::Var(*l)),
            })
            .collect();

        let wb = self.block_mut(block)?;
        wb.iter_vars = wb_iters;
        wb.bindings = wb_bindings;
        wb.reads = vec![wb_read];
        wb.writes = vec![wb_write];
        wb.body = Some(Value::Load(0));
        wb.reduction = Some(reduction);
        match loops.last() {
            Some(l) => self.attach(block.0, l.0, 0)?,
            None => self.attach(block.0, scope, pos + 1)?,
        }
        Ok(BlockRef(rf_id))
    }
}
