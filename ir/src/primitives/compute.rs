//! Block placement: compute-at and inlining.

use std::collections::HashMap;

use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::expr::Expr;
use crate::program::{Block, BlockRef, LoopRef, Program};
use crate::types::BufferRegion;
use crate::value::Value;

use super::{is_permutation, push_unique};

/// An access by a block under the target loop that links it to the moved block.
struct Anchor {
    link: String,
    region: BufferRegion,
    bindings: Vec<Expr<LoopRef>>,
}

impl Program {
    /// Move a leaf block under `loop_ref`, shrinking its domain to what the blocks under the loop
    /// consume (`reverse == false`) or produce (`reverse == true`).
    ///
    /// The block lands first under the loop when computing forward and last when computing in
    /// reverse. Iterators whose footprint cannot be derived keep their full extent.
    #[tracing::instrument(skip_all, fields(block = %block, loop_ref = %loop_ref, reverse = reverse))]
    pub(crate) fn compute_at(&mut self, block: BlockRef, loop_ref: LoopRef, reverse: bool) -> Result<()> {
        ensure!(block != self.root(), RootBlockSnafu);
        let blk = self.block(block)?.clone();
        let reject = |reason| ComputeAtRejectedSnafu { block: blk.name.clone(), reason };
        ensure!(self.is_leaf(block)?, NotALeafBlockSnafu { block: blk.name.clone() });
        ensure!(!blk.is_guarded(), GuardedBlockSnafu { block: blk.name.clone(), operation: "move" });
        self.for_loop(loop_ref)?;
        ensure!(!self.is_ancestor(loop_ref.0, block.0), reject("target loop encloses the block"));
        ensure!(self.scope_of(loop_ref.0)? == self.scope_of(block.0)?, reject("target loop is in another scope"));

        let links = if reverse { &blk.reads } else { &blk.writes };
        let mut anchors = Vec::new();
        for leaf in self.leaf_blocks_under(loop_ref.0)? {
            let other = self.block(leaf)?;
            ensure!(!other.is_guarded(), GuardedBlockSnafu { block: other.name.clone(), operation: "anchor at" });
            let accesses = if reverse { &other.writes } else { &other.reads };
            for access in accesses.iter().filter(|a| links.iter().any(|l| l.buffer == a.buffer)) {
                anchors.push(Anchor {
                    link: access.buffer.clone(),
                    region: access.clone(),
                    bindings: other.bindings.clone(),
                });
            }
        }
        ensure!(!anchors.is_empty(), reject("no block under the target loop accesses its buffers"));

        // (outer offset, extent) per iterator; `None` offset means the full range.
        let mut plan: Vec<(Option<Expr<LoopRef>>, i64)> = Vec::with_capacity(blk.iter_vars.len());
        for (i, iv) in blk.iter_vars.iter().enumerate() {
            match self.required_range(links, i, &anchors, loop_ref)? {
                Some((outer, extent)) if extent < iv.extent => plan.push((Some(outer), extent)),
                _ => plan.push((None, iv.extent)),
            }
        }

        let (old_parent, _) = self.detach(block.0)?;
        self.prune_empty_loops(old_parent)?;
        let pos = if reverse { self.children(loop_ref.0)?.len() } else { 0 };
        let extents: Vec<i64> = plan.iter().map(|(_, e)| *e).filter(|&e| e > 1).collect();
        let loops = self.insert_loop_nest(loop_ref.0, pos, &extents)?;

        let mut fresh = loops.iter();
        let mut bindings = Vec::with_capacity(plan.len());
        for (outer, extent) in plan {
            let inner = match extent {
                1 => Expr::Const(0),
                _ => fresh.next().map(|l| Expr::Var(*l)).unwrap_or(Expr::Const(0)),
            };
            bindings.push(outer.unwrap_or(Expr::Const(0)).add(inner));
        }
        self.block_mut(block)?.bindings = bindings;
        match loops.last() {
            Some(l) => self.attach(block.0, l.0, 0),
            None => self.attach(block.0, loop_ref.0, pos),
        }
    }

    /// Offset (over loops outside `loop_ref`) and extent that iterator `iter` of a block must cover
    /// for the anchors, when the iterator indexes one of `links` directly.
    fn required_range(
        &self,
        links: &[BufferRegion],
        iter: usize,
        anchors: &[Anchor],
        loop_ref: LoopRef,
    ) -> Result<Option<(Expr<LoopRef>, i64)>> {
        let Some((link, dim)) = links.iter().find_map(|l| {
            let dim = l.region.iter().position(|r| r.extent == 1 && r.min.as_var() == Some(&iter))?;
            Some((l.buffer.as_str(), dim))
        }) else {
            return Ok(None);
        };

        let is_inner = |l: &LoopRef| *l != loop_ref && self.is_ancestor(loop_ref.0, l.0);
        let mut required: Option<(Expr<LoopRef>, i64)> = None;
        for anchor in anchors.iter().filter(|a| a.link == link) {
            let Some(range) = anchor.region.region.get(dim) else { return Ok(None) };
            let index = range.min.substitute(&mut |j| anchor.bindings.get(*j).cloned().unwrap_or(Expr::Const(0)));
            let Some((outer, coeffs)) = index.split_inner(&is_inner) else { return Ok(None) };
            let mut extent = range.extent;
            for (l, c) in coeffs {
                if c < 0 {
                    return Ok(None);
                }
                extent += c * (self.extent(l)? - 1);
            }
            required = match required {
                None => Some((outer, extent)),
                Some((prev, prev_extent)) if prev == outer => Some((prev, prev_extent.max(extent))),
                Some(_) => return Ok(None),
            };
        }
        Ok(required)
    }

    /// Substitute a spatial block's body into every consumer and remove it.
    #[tracing::instrument(skip_all, fields(block = %block))]
    pub(crate) fn compute_inline(&mut self, block: BlockRef) -> Result<()> {
        ensure!(block != self.root(), RootBlockSnafu);
        let blk = self.block(block)?.clone();
        let reject = |reason| InlineRejectedSnafu { block: blk.name.clone(), reason };
        ensure!(self.is_leaf(block)?, NotALeafBlockSnafu { block: blk.name.clone() });
        ensure!(blk.is_spatial() && blk.reduction.is_none(), reject("block is a reduction"));
        ensure!(blk.writes.len() == 1, reject("block must write exactly one buffer"));
        let body = blk.body.clone().context(reject("block has no body"))?;
        let target = blk.writes[0].buffer.clone();
        ensure!(!self.buffer(&target)?.is_output, reject("block writes a program output"));
        ensure!(!blk.reads_buffer(&target), reject("block reads its own output"));
        let dims = blk.writes[0].direct_iters().context(reject("write indices must be bare iterators"))?;
        ensure!(is_permutation(&dims, blk.iter_vars.len()), reject("write indices must cover every iterator once"));

        let consumers: Vec<BlockRef> = self.leaf_accessors(&target, false)?.into_iter().filter(|b| *b != block).collect();
        ensure!(!consumers.is_empty(), reject("block has no consumer"));
        for &c in &consumers {
            let consumer = self.block(c)?;
            ensure!(consumer.body.is_some(), reject("a consumer has no body"));
            ensure!(
                consumer.reads.iter().filter(|r| r.buffer == target).all(BufferRegion::is_point),
                reject("a consumer reads a range of the buffer")
            );
        }

        for c in consumers {
            let mut consumer = self.block(c)?.clone();
            inline_into(&mut consumer, &blk, &body, &dims);
            *self.block_mut(c)? = consumer;
        }
        let (parent, _) = self.detach(block.0)?;
        self.release(block.0);
        self.prune_empty_loops(parent)?;
        if self.leaf_accessors(&target, false)?.is_empty() && self.leaf_accessors(&target, true)?.is_empty() {
            self.remove_buffer(&target);
        }
        Ok(())
    }

    /// Fold a spatial consumer into the single block producing its input and remove it.
    #[tracing::instrument(skip_all, fields(block = %block))]
    pub(crate) fn reverse_compute_inline(&mut self, block: BlockRef) -> Result<()> {
        ensure!(block != self.root(), RootBlockSnafu);
        let blk = self.block(block)?.clone();
        let reject = |reason| InlineRejectedSnafu { block: blk.name.clone(), reason };
        ensure!(self.is_leaf(block)?, NotALeafBlockSnafu { block: blk.name.clone() });
        ensure!(!blk.is_guarded(), GuardedBlockSnafu { block: blk.name.clone(), operation: "inline" });
        ensure!(blk.is_spatial() && blk.reduction.is_none(), reject("block is a reduction"));
        ensure!(blk.writes.len() == 1, reject("block must write exactly one buffer"));
        let body = blk.body.clone().context(reject("block has no body"))?;

        let mut produced = Vec::new();
        for (i, r) in blk.reads.iter().enumerate() {
            if self.leaf_accessors(&r.buffer, true)?.iter().any(|p| *p != block) {
                produced.push(i);
            }
        }
        ensure!(produced.len() == 1, reject("block must read exactly one produced buffer"));
        let read = produced[0];
        let source = blk.reads[read].buffer.clone();
        ensure!(
            blk.reads.iter().filter(|r| r.buffer == source).count() == 1,
            reject("block reads the produced buffer more than once")
        );
        ensure!(!self.buffer(&source)?.is_output, reject("producer writes a program output"));

        let producers = self.leaf_accessors(&source, true)?;
        ensure!(producers.len() == 1, reject("buffer has several producers"));
        let producer = producers[0];
        ensure!(
            self.leaf_accessors(&source, false)?.iter().all(|c| *c == block),
            reject("buffer has other consumers")
        );
        let prod = self.block(producer)?.clone();
        ensure!(prod.is_spatial() && prod.reduction.is_none(), reject("producer is a reduction"));
        ensure!(prod.writes.len() == 1 && prod.writes[0].is_point(), reject("producer must write one point region"));
        let prod_body = prod.body.clone().context(reject("producer has no body"))?;

        let dims = blk.reads[read].direct_iters().context(reject("read indices must be bare iterators"))?;
        ensure!(is_permutation(&dims, blk.iter_vars.len()), reject("read indices must cover every iterator once"));
        ensure!(dims.len() == prod.writes[0].region.len(), reject("buffer rank mismatch"));

        // Consumer iterator q reads dimension d, which the producer writes at its own index.
        let mut subst = vec![Expr::Const(0); blk.iter_vars.len()];
        for (d, &q) in dims.iter().enumerate() {
            subst[q] = prod.writes[0].region[d].min.clone();
        }

        let mut merged = prod.clone();
        let mut reads = prod.reads.clone();
        let new_body = body.map_loads(&mut |j| {
            if j == read {
                prod_body.clone()
            } else {
                let region = blk.reads[j].substitute(&mut |q| subst[*q].clone());
                Value::Load(push_unique(&mut reads, region))
            }
        });
        merged.reads = reads;
        merged.writes = vec![blk.writes[0].substitute(&mut |q| subst[*q].clone())];
        merged.body = Some(new_body);
        *self.block_mut(producer)? = merged;

        let (parent, _) = self.detach(block.0)?;
        self.release(block.0);
        self.prune_empty_loops(parent)?;
        self.remove_buffer(&source);
        Ok(())
    }
}

/// Replace the consumer's point reads of the producer's output by the producer's body.
fn inline_into(consumer: &mut Block, producer: &Block, body: &Value, dims: &[usize]) {
    let target = &producer.writes[0].buffer;
    let mut reads = Vec::new();
    let mut remap = HashMap::new();
    for (i, r) in consumer.reads.iter().enumerate().filter(|(_, r)| r.buffer != *target) {
        remap.insert(i, push_unique(&mut reads, r.clone()));
    }

    let mut inlined = HashMap::new();
    for (i, r) in consumer.reads.iter().enumerate().filter(|(_, r)| r.buffer == *target) {
        // Producer iterator dims[d] takes the consumer's index at dimension d.
        let mut subst = vec![Expr::Const(0); producer.iter_vars.len()];
        for (d, &p) in dims.iter().enumerate() {
            if let Some(range) = r.region.get(d) {
                subst[p] = range.min.clone();
            }
        }
        let value = body.map_loads(&mut |j| {
            let region = producer.reads[j].substitute(&mut |p| subst[*p].clone());
            Value::Load(push_unique(&mut reads, region))
        });
        inlined.insert(i, value);
    }

    consumer.body = consumer.body.as_ref().map(|b| {
        b.map_loads(&mut |i| match inlined.get(&i) {
            Some(v) => v.clone(),
            None => Value::Load(remap.get(&i).copied().unwrap_or(i)),
        })
    });
    consumer.reads = reads;
}
