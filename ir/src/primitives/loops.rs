//! Loop transformations: split, fuse, reorder, loop kinds and annotations.

use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::expr::Expr;
use crate::program::{Loop, LoopRef, Node, NodeId, Predicate, Program};
use crate::types::{AnnValue, ForKind};

impl Program {
    /// Replace a serial loop by a nest whose extents are `factors`, outermost first.
    pub(crate) fn split(&mut self, loop_ref: LoopRef, factors: &[i64]) -> Result<Vec<LoopRef>> {
        let extent = self.for_loop(loop_ref)?.extent;
        ensure!(
            !factors.is_empty() && factors.iter().all(|&f| f >= 1) && factors.iter().product::<i64>() == extent,
            SplitFactorMismatchSnafu { extent, factors: factors.to_vec() }
        );
        self.replace_by_nest(loop_ref, factors).map(|(loops, _)| loops)
    }

    /// Split a serial loop by `inner` factors, letting the outermost loop round up.
    ///
    /// The new outermost extent is `ceil(extent / Π inner)`. When that overshoots the old extent,
    /// every block under the nest gets the predicate `fused index < extent`.
    pub(crate) fn split_guarded(&mut self, loop_ref: LoopRef, inner: &[i64]) -> Result<Vec<LoopRef>> {
        let extent = self.for_loop(loop_ref)?.extent;
        ensure!(
            !inner.is_empty() && inner.iter().all(|&f| f >= 1),
            SplitFactorMismatchSnafu { extent, factors: inner.to_vec() }
        );
        let tile: i64 = inner.iter().product();
        let mut factors = vec![(extent + tile - 1) / tile];
        factors.extend_from_slice(inner);
        let (loops, index) = self.replace_by_nest(loop_ref, &factors)?;
        if factors[0] * tile != extent {
            for b in self.blocks_under(loops[0].0)? {
                self.block_mut(b)?.predicates.push(Predicate { expr: index.clone(), bound: extent });
            }
        }
        Ok(loops)
    }

    /// Swap `loop_ref` for a fresh nest of `factors` and rebind the blocks below it.
    /// Returns the nest and the expression that replaced the old loop variable.
    fn replace_by_nest(&mut self, loop_ref: LoopRef, factors: &[i64]) -> Result<(Vec<LoopRef>, Expr<LoopRef>)> {
        let lp = self.for_loop(loop_ref)?;
        ensure!(lp.kind.is_serial(), LoopKindConflictSnafu { loop_ref, kind: lp.kind.clone() });
        let extent = lp.extent;

        let (parent, pos) = self.detach(loop_ref.0)?;
        let loops = self.insert_loop_nest(parent, pos, factors)?;
        let innermost = *loops.last().context(SplitFactorMismatchSnafu { extent, factors: factors.to_vec() })?;
        self.adopt_children(loop_ref.0, innermost.0)?;
        self.release(loop_ref.0);

        // l = Σ l_i * Π_{j>i} f_j
        let mut stride = 1;
        let mut replacement = Expr::Const(0);
        for (l, f) in loops.iter().zip(factors).rev() {
            replacement = Expr::Var(*l).scale(stride).add(replacement);
            stride *= f;
        }
        self.rewrite_bindings(loops[0].0, &|l| (*l == loop_ref).then(|| replacement.clone()))?;
        Ok((loops, replacement))
    }

    /// Fuse a perfectly nested chain of serial loops into one.
    pub(crate) fn fuse(&mut self, loops: &[LoopRef]) -> Result<LoopRef> {
        let (first, last) = match (loops.first(), loops.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return NotAChainSnafu { reason: "no loops to fuse" }.fail(),
        };
        for pair in loops.windows(2) {
            ensure!(
                self.children(pair[0].0)? == [pair[1].0],
                NotAChainSnafu { reason: "each loop must be the only child of the previous one" }
            );
        }
        let mut extents = Vec::with_capacity(loops.len());
        for &l in loops {
            let lp = self.for_loop(l)?;
            ensure!(lp.kind.is_serial(), LoopKindConflictSnafu { loop_ref: l, kind: lp.kind.clone() });
            extents.push(lp.extent);
        }
        if loops.len() == 1 {
            return Ok(first);
        }

        let (parent, pos) = self.detach(first.0)?;
        let fused = self.alloc(Node::Loop(Loop::serial(extents.iter().product())));
        self.attach(fused, parent, pos)?;
        self.adopt_children(last.0, fused)?;
        for l in loops {
            self.release(l.0);
        }

        // l_i = (f // Π_{j>i} e_j) % e_i
        let mut replacements = Vec::with_capacity(loops.len());
        let mut stride = 1;
        for (i, e) in extents.iter().enumerate().rev() {
            let mut expr = Expr::Var(LoopRef(fused)).floordiv(stride);
            if i > 0 {
                expr = expr.floormod(*e);
            }
            replacements.push(expr);
            stride *= e;
        }
        replacements.reverse();
        self.rewrite_bindings(fused, &|l| loops.iter().position(|x| x == l).map(|i| replacements[i].clone()))?;
        Ok(LoopRef(fused))
    }

    /// Permute loops lying on one perfectly nested chain.
    ///
    /// Loops on the chain that are not listed keep their positions; the listed loops fill their own
    /// positions in the given order.
    pub(crate) fn reorder(&mut self, order: &[LoopRef]) -> Result<()> {
        for (i, l) in order.iter().enumerate() {
            self.for_loop(*l)?;
            ensure!(!order[..i].contains(l), NotAChainSnafu { reason: "a loop is listed twice" });
        }
        if order.len() <= 1 {
            return Ok(());
        }

        let outer = *order
            .iter()
            .find(|a| order.iter().all(|b| self.is_ancestor(a.0, b.0)))
            .context(NotAChainSnafu { reason: "loops are not on one path" })?;
        let mut chain = vec![outer];
        let mut found = 1;
        while found < order.len() {
            let children = self.children(chain[chain.len() - 1].0)?;
            ensure!(
                children.len() == 1 && self.is_loop(children[0]),
                NotAChainSnafu { reason: "loops between the reordered ones must be perfectly nested" }
            );
            let next = LoopRef(children[0]);
            if order.contains(&next) {
                found += 1;
            }
            chain.push(next);
        }

        let mut reordered = chain.clone();
        let slots = chain.iter().enumerate().filter(|(_, l)| order.contains(l)).map(|(i, _)| i);
        for (slot, l) in slots.zip(order) {
            reordered[slot] = *l;
        }
        if reordered == chain {
            return Ok(());
        }

        let (parent, pos) = self.detach(outer.0)?;
        let bottom = std::mem::take(&mut self.entry_mut(chain[chain.len() - 1].0)?.children);
        for l in &chain {
            let entry = self.entry_mut(l.0)?;
            entry.children.clear();
            entry.parent = None;
        }
        for pair in reordered.windows(2) {
            self.attach(pair[1].0, pair[0].0, 0)?;
        }
        let new_last = reordered[reordered.len() - 1].0;
        for &child in &bottom {
            self.entry_mut(child)?.parent = Some(new_last);
        }
        self.entry_mut(new_last)?.children = bottom;
        self.attach(reordered[0].0, parent, pos)
    }

    /// Change the execution kind of a serial loop.
    pub(crate) fn set_kind(&mut self, loop_ref: LoopRef, kind: ForKind) -> Result<()> {
        let lp = self.for_loop_mut(loop_ref)?;
        ensure!(lp.kind.is_serial(), LoopKindConflictSnafu { loop_ref, kind: lp.kind.clone() });
        lp.kind = kind;
        Ok(())
    }

    pub(crate) fn annotate(&mut self, target: NodeId, key: &str, value: AnnValue) -> Result<()> {
        let annotations = match &mut self.entry_mut(target)?.node {
            Node::Block(b) => &mut b.annotations,
            Node::Loop(l) => &mut l.annotations,
        };
        annotations.insert(key.to_string(), value);
        Ok(())
    }

    pub(crate) fn unannotate(&mut self, target: NodeId, key: &str) -> Result<()> {
        let annotations = match &mut self.entry_mut(target)?.node {
            Node::Block(b) => &mut b.annotations,
            Node::Loop(l) => &mut l.annotations,
        };
        annotations.remove(key);
        Ok(())
    }
}
