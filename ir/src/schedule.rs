//! Traced schedule state.
//!
//! A [`Schedule`] owns the program being transformed, the program it started from and the trace
//! of every primitive applied since. Cloning a schedule is the way to branch: rules clone the
//! input, apply primitives to the copy and return it, leaving the input untouched.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use snafu::OptionExt;

use crate::error::*;
use crate::primitives::{sample_categorical, sample_perfect_tile};
use crate::program::{Block, BlockRef, Loop, LoopRef, NodeId, Program};
use crate::trace::{Instruction, Trace};
use crate::types::{AnnValue, ForKind};

#[derive(Debug, Clone)]
pub struct Schedule {
    base: Arc<Program>,
    program: Program,
    trace: Trace,
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.program == other.program && self.trace == other.trace
    }
}

impl Schedule {
    pub fn new(program: Program) -> Self {
        Self { base: Arc::new(program.clone()), program, trace: Trace::default() }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Program the schedule started from.
    pub fn base(&self) -> &Program {
        &self.base
    }

    /// Rebuild the schedule by re-executing its trace on the base program.
    pub fn replay(&self) -> Result<Schedule> {
        let mut program = (*self.base).clone();
        self.trace.apply_to(&mut program)?;
        Ok(Self { base: self.base.clone(), program, trace: self.trace.clone() })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn root(&self) -> BlockRef {
        self.program.root()
    }

    pub fn block(&self, block: BlockRef) -> Result<&Block> {
        self.program.block(block)
    }

    pub fn for_loop(&self, loop_ref: LoopRef) -> Result<&Loop> {
        self.program.for_loop(loop_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.program.contains(id)
    }

    pub fn get_block(&self, name: &str) -> Result<BlockRef> {
        self.program.find_block(name).context(BlockNotFoundSnafu { name })
    }

    /// Loops enclosing the block in its scope, outermost first.
    pub fn get_loops(&self, block: BlockRef) -> Result<Vec<LoopRef>> {
        self.program.loops_above(block.0)
    }

    pub fn get_child_blocks(&self, block: BlockRef) -> Result<Vec<BlockRef>> {
        self.program.child_blocks(block.0)
    }

    pub fn get_producers(&self, block: BlockRef) -> Result<Vec<BlockRef>> {
        self.program.producers(block)
    }

    pub fn get_consumers(&self, block: BlockRef) -> Result<Vec<BlockRef>> {
        self.program.consumers(block)
    }

    // ------------------------------------------------------------------------
    // Loop primitives
    // ------------------------------------------------------------------------

    pub fn split(&mut self, loop_ref: LoopRef, factors: &[i64]) -> Result<Vec<LoopRef>> {
        let outputs = self.program.split(loop_ref, factors)?;
        self.trace.push(Instruction::Split { loop_ref, factors: factors.to_vec(), outputs: outputs.clone() });
        Ok(outputs)
    }

    /// Split by `inner` factors with a rounded-up outermost loop. Blocks below an overshooting
    /// nest are guarded by a predicate.
    pub fn split_guarded(&mut self, loop_ref: LoopRef, inner: &[i64]) -> Result<Vec<LoopRef>> {
        let outputs = self.program.split_guarded(loop_ref, inner)?;
        self.trace.push(Instruction::SplitGuarded { loop_ref, inner: inner.to_vec(), outputs: outputs.clone() });
        Ok(outputs)
    }

    pub fn fuse(&mut self, loops: &[LoopRef]) -> Result<LoopRef> {
        let output = self.program.fuse(loops)?;
        self.trace.push(Instruction::Fuse { loops: loops.to_vec(), output });
        Ok(output)
    }

    pub fn reorder(&mut self, loops: &[LoopRef]) -> Result<()> {
        self.program.reorder(loops)?;
        self.trace.push(Instruction::Reorder { loops: loops.to_vec() });
        Ok(())
    }

    fn set_kind(&mut self, loop_ref: LoopRef, kind: ForKind) -> Result<()> {
        self.program.set_kind(loop_ref, kind.clone())?;
        self.trace.push(Instruction::SetKind { loop_ref, kind });
        Ok(())
    }

    pub fn bind(&mut self, loop_ref: LoopRef, thread: &str) -> Result<()> {
        self.set_kind(loop_ref, ForKind::ThreadBinding(thread.to_string()))
    }

    pub fn parallel(&mut self, loop_ref: LoopRef) -> Result<()> {
        self.set_kind(loop_ref, ForKind::Parallel)
    }

    pub fn vectorize(&mut self, loop_ref: LoopRef) -> Result<()> {
        self.set_kind(loop_ref, ForKind::Vectorized)
    }

    pub fn unroll(&mut self, loop_ref: LoopRef) -> Result<()> {
        self.set_kind(loop_ref, ForKind::Unrolled)
    }

    pub fn annotate_block(&mut self, block: BlockRef, key: &str, value: impl Into<AnnValue>) -> Result<()> {
        self.annotate(block.0, key, value.into())
    }

    pub fn annotate_loop(&mut self, loop_ref: LoopRef, key: &str, value: impl Into<AnnValue>) -> Result<()> {
        self.annotate(loop_ref.0, key, value.into())
    }

    fn annotate(&mut self, target: NodeId, key: &str, value: AnnValue) -> Result<()> {
        self.program.annotate(target, key, value.clone())?;
        self.trace.push(Instruction::Annotate { target, key: key.to_string(), value });
        Ok(())
    }

    pub fn unannotate_block(&mut self, block: BlockRef, key: &str) -> Result<()> {
        self.program.unannotate(block.0, key)?;
        self.trace.push(Instruction::Unannotate { target: block.0, key: key.to_string() });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Block primitives
    // ------------------------------------------------------------------------

    pub fn cache_read(&mut self, block: BlockRef, read_index: usize, scope: &str) -> Result<BlockRef> {
        let output = self.program.cache_read(block, read_index, scope)?;
        self.trace.push(Instruction::CacheRead { block, read_index, scope: scope.to_string(), output });
        Ok(output)
    }

    pub fn cache_write(&mut self, block: BlockRef, write_index: usize, scope: &str) -> Result<BlockRef> {
        let output = self.program.cache_write(block, write_index, scope)?;
        self.trace.push(Instruction::CacheWrite { block, write_index, scope: scope.to_string(), output });
        Ok(output)
    }

    pub fn compute_at(&mut self, block: BlockRef, loop_ref: LoopRef) -> Result<()> {
        self.program.compute_at(block, loop_ref, false)?;
        self.trace.push(Instruction::ComputeAt { block, loop_ref });
        Ok(())
    }

    pub fn reverse_compute_at(&mut self, block: BlockRef, loop_ref: LoopRef) -> Result<()> {
        self.program.compute_at(block, loop_ref, true)?;
        self.trace.push(Instruction::ReverseComputeAt { block, loop_ref });
        Ok(())
    }

    pub fn compute_inline(&mut self, block: BlockRef) -> Result<()> {
        self.program.compute_inline(block)?;
        self.trace.push(Instruction::ComputeInline { block });
        Ok(())
    }

    pub fn reverse_compute_inline(&mut self, block: BlockRef) -> Result<()> {
        self.program.reverse_compute_inline(block)?;
        self.trace.push(Instruction::ReverseComputeInline { block });
        Ok(())
    }

    pub fn rfactor(&mut self, loop_ref: LoopRef) -> Result<BlockRef> {
        let output = self.program.rfactor(loop_ref)?;
        self.trace.push(Instruction::RFactor { loop_ref, output });
        Ok(output)
    }

    pub fn blockize(&mut self, loop_ref: LoopRef) -> Result<BlockRef> {
        let output = self.program.blockize(loop_ref)?;
        self.trace.push(Instruction::Blockize { loop_ref, output });
        Ok(output)
    }

    pub fn tensorize(&mut self, block: BlockRef, intrin: &str) -> Result<()> {
        self.program.tensorize(block, intrin)?;
        self.trace.push(Instruction::Tensorize { block, intrin: intrin.to_string() });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------------

    /// Sample `n` tile sizes for a loop; the decision is recorded in the trace.
    pub fn sample_perfect_tile(
        &mut self,
        loop_ref: LoopRef,
        n: usize,
        max_innermost_factor: i64,
        rng: &mut impl Rng,
    ) -> Result<Vec<i64>> {
        let extent = self.program.extent(loop_ref)?;
        let decision = sample_perfect_tile(extent, n, max_innermost_factor, rng)?;
        self.trace.push(Instruction::SamplePerfectTile { loop_ref, n, max_innermost_factor, decision: decision.clone() });
        Ok(decision)
    }

    /// Pick one of `candidates` with the given weights.
    pub fn sample_categorical(&mut self, candidates: &[i64], probs: &[f64], rng: &mut impl Rng) -> Result<i64> {
        snafu::ensure!(
            candidates.len() == probs.len(),
            InvalidSamplingSnafu { reason: "candidates and probabilities differ in length" }
        );
        let decision = sample_categorical(probs, rng)?;
        self.trace.push(Instruction::SampleCategorical {
            candidates: candidates.to_vec(),
            probs: probs.to_vec(),
            decision,
        });
        Ok(candidates[decision])
    }

    /// Pick a loop to compute the block at, or `None` for its current root location.
    pub fn sample_compute_location(&mut self, block: BlockRef, rng: &mut impl Rng) -> Result<Option<LoopRef>> {
        let candidates = self.program.compute_location_candidates(block)?;
        let pick = rng.gen_range(0..=candidates.len());
        let decision = pick.checked_sub(1).map(|i| candidates[i]);
        self.trace.push(Instruction::SampleComputeLocation { block, decision });
        Ok(decision)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)
    }
}
