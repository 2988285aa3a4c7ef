use snafu::Snafu;

use crate::program::{LoopRef, NodeId};
use crate::types::ForKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Handle refers to a node removed by an earlier mutation.
    #[snafu(display("handle {id} does not refer to a live node"))]
    StaleHandle { id: NodeId },

    #[snafu(display("node {id} is not a block"))]
    NotABlock { id: NodeId },

    #[snafu(display("node {id} is not a loop"))]
    NotALoop { id: NodeId },

    #[snafu(display("operation is not allowed on the root block"))]
    RootBlock,

    #[snafu(display("no block named {name}"))]
    BlockNotFound { name: String },

    #[snafu(display("no buffer named {name}"))]
    UnknownBuffer { name: String },

    #[snafu(display("{kind} region index {index} is out of range for block {block}"))]
    RegionIndexOutOfRange { block: String, kind: &'static str, index: usize },

    /// Split factors must be positive and multiply to the loop extent.
    #[snafu(display("split factors {factors:?} do not tile extent {extent}"))]
    SplitFactorMismatch { extent: i64, factors: Vec<i64> },

    /// Blocks under an imperfect split only run where their predicate holds.
    #[snafu(display("cannot {operation} block {block}: it is guarded by a predicate"))]
    GuardedBlock { block: String, operation: &'static str },

    #[snafu(display("loops do not form a nested chain: {reason}"))]
    NotAChain { reason: &'static str },

    #[snafu(display("loop {loop_ref} is already {kind}"))]
    LoopKindConflict { loop_ref: LoopRef, kind: ForKind },

    #[snafu(display("block {block} contains nested blocks"))]
    NotALeafBlock { block: String },

    #[snafu(display("cannot inline block {block}: {reason}"))]
    InlineRejected { block: String, reason: &'static str },

    #[snafu(display("cannot move block {block}: {reason}"))]
    ComputeAtRejected { block: String, reason: &'static str },

    #[snafu(display("cannot rfactor: {reason}"))]
    RFactorRejected { reason: &'static str },

    #[snafu(display("cannot blockize: {reason}"))]
    BlockizeRejected { reason: &'static str },

    #[snafu(display("no tensor intrinsic named {name}"))]
    UnknownIntrin { name: String },

    #[snafu(display("tensor intrinsic {name} is already registered"))]
    DuplicateIntrin { name: String },

    #[snafu(display("block {block} does not match tensor intrinsic {intrin}"))]
    IntrinMismatch { block: String, intrin: String },

    #[snafu(display("invalid sampling request: {reason}"))]
    InvalidSampling { reason: &'static str },
}
