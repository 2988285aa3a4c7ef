//! Construction of programs in their initial, unscheduled form.
//!
//! Every block gets its own perfectly nested loop nest, one loop per iterator, directly under the
//! root block, in the order blocks are finished.

use vesta_dtype::DType;

use crate::expr::Expr;
use crate::program::{Block, BlockRef, Node, Program};
use crate::types::{AnnValue, Buffer, BufferRegion, IterVar};
use crate::value::{ReduceOp, Reduction, Value};

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a global buffer.
    pub fn buffer(&mut self, name: &str, shape: &[i64], dtype: DType) -> &mut Self {
        self.program.add_buffer(Buffer {
            name: name.to_string(),
            shape: shape.to_vec(),
            dtype,
            scope: "global".to_string(),
            is_output: false,
        });
        self
    }

    /// Declare a global buffer that is a program output.
    pub fn output(&mut self, name: &str, shape: &[i64], dtype: DType) -> &mut Self {
        self.program.add_buffer(Buffer {
            name: name.to_string(),
            shape: shape.to_vec(),
            dtype,
            scope: "global".to_string(),
            is_output: true,
        });
        self
    }

    pub fn block(&mut self, name: &str) -> BlockBuilder<'_> {
        BlockBuilder { program: &mut self.program, block: Block::named(name) }
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Accumulates one block; [`BlockBuilder::finish`] inserts it with its loop nest.
pub struct BlockBuilder<'a> {
    program: &'a mut Program,
    block: Block,
}

impl BlockBuilder<'_> {
    pub fn spatial(mut self, extent: i64) -> Self {
        self.block.iter_vars.push(IterVar::spatial(extent));
        self
    }

    pub fn reduce(mut self, extent: i64) -> Self {
        self.block.iter_vars.push(IterVar::reduce(extent));
        self
    }

    pub fn read(mut self, buffer: &str, indices: impl IntoIterator<Item = Expr<usize>>) -> Self {
        self.block.reads.push(BufferRegion::point(buffer, indices));
        self
    }

    pub fn write(mut self, buffer: &str, indices: impl IntoIterator<Item = Expr<usize>>) -> Self {
        self.block.writes.push(BufferRegion::point(buffer, indices));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.block.body = Some(body);
        self
    }

    /// Turn the block into a reduction: `body` is combined into the output with `op`.
    pub fn combine(mut self, op: ReduceOp, init: Value) -> Self {
        self.block.reduction = Some(Reduction { op, init });
        self
    }

    pub fn annotate(mut self, key: &str, value: impl Into<AnnValue>) -> Self {
        self.block.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn finish(self) -> BlockRef {
        let Self { program, mut block } = self;
        let root = program.root().id();
        let pos = program.children(root).map(|c| c.len()).unwrap_or_default();
        let extents: Vec<i64> = block.iter_vars.iter().map(|iv| iv.extent).collect();
        let loops = program.insert_loop_nest(root, pos, &extents).unwrap_or_default();
        block.bindings = loops.iter().map(|l| Expr::Var(*l)).collect();

        let (parent, at) = loops.last().map_or((root, pos), |l| (l.id(), 0));
        let id = program.alloc(Node::Block(block));
        // A freshly allocated node always attaches.
        let _ = program.attach(id, parent, at);
        BlockRef(id)
    }
}

/// Shorthand for an access index on block iterator `i`.
pub fn v(i: usize) -> Expr<usize> {
    Expr::Var(i)
}
