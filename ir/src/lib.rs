//! Tensor program representation and schedule primitives for Vesta.
//!
//! A [`Program`] is a tree of loops and blocks: blocks carry an iteration domain, the buffer regions
//! they access and a compute body; loops bind block iterators to concrete iteration. A
//! [`Schedule`] transforms a program through primitives (split, fuse, cache, compute-at, inline,
//! rfactor, blockize, tensorize, ...) and records every step, random decisions included, in a
//! replayable [`Trace`].
//!
//! # Module Organization
//!
//! - [`builder`] - Construction of unscheduled programs
//! - [`program`] - Program arena, blocks, loops and handles
//! - [`schedule`] - Traced schedule state and primitive entry points
//! - [`trace`] - Instruction log
//! - [`expr`] - Index expressions
//! - [`value`] - Block compute bodies
//! - [`intrin`] - Tensor intrinsic registry
//! - [`error`] - Error types and result handling

pub mod builder;
pub mod error;
pub mod expr;
pub mod intrin;
mod primitives;
pub mod program;
pub mod schedule;
pub mod trace;
pub mod types;
pub mod value;


pub use builder::{BlockBuilder, ProgramBuilder, v};
pub use error::{Error, Result};
pub use expr::{Expr, Linear};
pub use intrin::{ComputeDesc, ComputeMatch, IntrinDesc, Operand, TensorIntrin, get_intrin, register_intrin};
pub use primitives::{factorize, sample_categorical, sample_perfect_tile};
pub use program::{Block, BlockRef, Loop, LoopRef, Node, NodeId, Predicate, Program};
pub use schedule::Schedule;
pub use trace::{Instruction, Trace};
pub use types::{AnnValue, Annotations, Buffer, BufferRegion, ForKind, IterKind, IterVar, Range};
pub use value::{BinaryOp, ConstValue, ReduceOp, Reduction, Value};

pub use vesta_dtype::{DType, ScalarDType};
