//! Instruction log of a schedule.
//!
//! Every primitive applied through [`crate::Schedule`] appends one [`Instruction`], including the
//! decisions taken by sampling primitives. Replaying the log on the original program reproduces
//! the schedule exactly, handles included.

use std::fmt;

use itertools::Itertools;

use crate::error::*;
use crate::program::{BlockRef, LoopRef, NodeId, Program};
use crate::types::{AnnValue, ForKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Split { loop_ref: LoopRef, factors: Vec<i64>, outputs: Vec<LoopRef> },
    SplitGuarded { loop_ref: LoopRef, inner: Vec<i64>, outputs: Vec<LoopRef> },
    Fuse { loops: Vec<LoopRef>, output: LoopRef },
    Reorder { loops: Vec<LoopRef> },
    SetKind { loop_ref: LoopRef, kind: ForKind },
    Annotate { target: NodeId, key: String, value: AnnValue },
    Unannotate { target: NodeId, key: String },
    CacheRead { block: BlockRef, read_index: usize, scope: String, output: BlockRef },
    CacheWrite { block: BlockRef, write_index: usize, scope: String, output: BlockRef },
    ComputeAt { block: BlockRef, loop_ref: LoopRef },
    ReverseComputeAt { block: BlockRef, loop_ref: LoopRef },
    ComputeInline { block: BlockRef },
    ReverseComputeInline { block: BlockRef },
    RFactor { loop_ref: LoopRef, output: BlockRef },
    Blockize { loop_ref: LoopRef, output: BlockRef },
    Tensorize { block: BlockRef, intrin: String },
    SamplePerfectTile { loop_ref: LoopRef, n: usize, max_innermost_factor: i64, decision: Vec<i64> },
    SampleCategorical { candidates: Vec<i64>, probs: Vec<f64>, decision: usize },
    SampleComputeLocation { block: BlockRef, decision: Option<LoopRef> },
}

impl Instruction {
    /// Re-execute the instruction. Sampling instructions carry their decision and do nothing.
    pub(crate) fn apply(&self, program: &mut Program) -> Result<()> {
        match self {
            Self::Split { loop_ref, factors, .. } => program.split(*loop_ref, factors).map(drop),
            Self::SplitGuarded { loop_ref, inner, .. } => program.split_guarded(*loop_ref, inner).map(drop),
            Self::Fuse { loops, .. } => program.fuse(loops).map(drop),
            Self::Reorder { loops } => program.reorder(loops),
            Self::SetKind { loop_ref, kind } => program.set_kind(*loop_ref, kind.clone()),
            Self::Annotate { target, key, value } => program.annotate(*target, key, value.clone()),
            Self::Unannotate { target, key } => program.unannotate(*target, key),
            Self::CacheRead { block, read_index, scope, .. } => program.cache_read(*block, *read_index, scope).map(drop),
            Self::CacheWrite { block, write_index, scope, .. } => {
                program.cache_write(*block, *write_index, scope).map(drop)
            }
            Self::ComputeAt { block, loop_ref } => program.compute_at(*block, *loop_ref, false),
            Self::ReverseComputeAt { block, loop_ref } => program.compute_at(*block, *loop_ref, true),
            Self::ComputeInline { block } => program.compute_inline(*block),
            Self::ReverseComputeInline { block } => program.reverse_compute_inline(*block),
            Self::RFactor { loop_ref, .. } => program.rfactor(*loop_ref).map(drop),
            Self::Blockize { loop_ref, .. } => program.blockize(*loop_ref).map(drop),
            Self::Tensorize { block, intrin } => program.tensorize(*block, intrin),
            Self::SamplePerfectTile { .. } | Self::SampleCategorical { .. } | Self::SampleComputeLocation { .. } => {
                Ok(())
            }
        }
    }

    pub fn is_sampling(&self) -> bool {
        matches!(
            self,
            Self::SamplePerfectTile { .. } | Self::SampleCategorical { .. } | Self::SampleComputeLocation { .. }
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Split { loop_ref, factors, outputs } => {
                write!(f, "{} = split({loop_ref}, factors={factors:?})", outputs.iter().join(", "))
            }
            Self::SplitGuarded { loop_ref, inner, outputs } => {
                write!(f, "{} = split({loop_ref}, factors=[None, {}])", outputs.iter().join(", "), inner.iter().join(", "))
            }
            Self::Fuse { loops, output } => write!(f, "{output} = fuse({})", loops.iter().join(", ")),
            Self::Reorder { loops } => write!(f, "reorder({})", loops.iter().join(", ")),
            Self::SetKind { loop_ref, kind } => write!(f, "set_kind({loop_ref}, {kind})"),
            Self::Annotate { target, key, value } => write!(f, "annotate({target}, {key:?}, {value})"),
            Self::Unannotate { target, key } => write!(f, "unannotate({target}, {key:?})"),
            Self::CacheRead { block, read_index, scope, output } => {
                write!(f, "{output} = cache_read({block}, {read_index}, {scope:?})")
            }
            Self::CacheWrite { block, write_index, scope, output } => {
                write!(f, "{output} = cache_write({block}, {write_index}, {scope:?})")
            }
            Self::ComputeAt { block, loop_ref } => write!(f, "compute_at({block}, {loop_ref})"),
            Self::ReverseComputeAt { block, loop_ref } => write!(f, "reverse_compute_at({block}, {loop_ref})"),
            Self::ComputeInline { block } => write!(f, "compute_inline({block})"),
            Self::ReverseComputeInline { block } => write!(f, "reverse_compute_inline({block})"),
            Self::RFactor { loop_ref, output } => write!(f, "{output} = rfactor({loop_ref})"),
            Self::Blockize { loop_ref, output } => write!(f, "{output} = blockize({loop_ref})"),
            Self::Tensorize { block, intrin } => write!(f, "tensorize({block}, {intrin:?})"),
            Self::SamplePerfectTile { loop_ref, n, max_innermost_factor, decision } => write!(
                f,
                "sample_perfect_tile({loop_ref}, n={n}, max_innermost_factor={max_innermost_factor}) -> {decision:?}"
            ),
            Self::SampleCategorical { candidates, probs, decision } => {
                write!(f, "sample_categorical({candidates:?}, probs={probs:?}) -> {decision}")
            }
            Self::SampleComputeLocation { block, decision } => match decision {
                Some(loop_ref) => write!(f, "sample_compute_location({block}) -> {loop_ref}"),
                None => write!(f, "sample_compute_location({block}) -> root"),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    insts: Vec<Instruction>,
}

impl Trace {
    pub fn instructions(&self) -> &[Instruction] {
        &self.insts
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Sampling decisions in the order they were taken.
    pub fn decisions(&self) -> impl Iterator<Item = &Instruction> {
        self.insts.iter().filter(|i| i.is_sampling())
    }

    pub(crate) fn push(&mut self, inst: Instruction) {
        tracing::trace!(inst = %inst, "schedule instruction");
        self.insts.push(inst);
    }

    /// Re-execute every instruction against `program`.
    pub fn apply_to(&self, program: &mut Program) -> Result<()> {
        self.insts.iter().try_for_each(|inst| inst.apply(program))
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.insts {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}
