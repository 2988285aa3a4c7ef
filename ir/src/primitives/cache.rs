//! Cache stages: copy blocks between a buffer and a scoped duplicate of it.

use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::expr::Expr;
use crate::program::{Block, BlockRef, Node, NodeId, Program};
use crate::types::{Buffer, BufferRegion, IterVar};
use crate::value::Value;

impl Program {
    /// Stage the `read_index`-th read of `block` through a new buffer in `scope`.
    ///
    /// The copy block is placed right before the block's top-level subtree in its scope, and
    /// `block` together with every block nested in it reads the cache instead.
    pub(crate) fn cache_read(&mut self, block: BlockRef, read_index: usize, scope: &str) -> Result<BlockRef> {
        ensure!(block != self.root(), RootBlockSnafu);
        let blk = self.block(block)?;
        let source = blk
            .reads
            .get(read_index)
            .context(RegionIndexOutOfRangeSnafu { block: blk.name.clone(), kind: "read", index: read_index })?
            .buffer
            .clone();
        let cache = self.add_cache_buffer(&source, scope)?;

        let (parent, _, pos) = self.scope_anchor(block.0)?;
        let copy = self.insert_copy_block(&source, &cache, &cache, parent, pos)?;

        let mut targets = self.blocks_under(block.0)?;
        targets.push(block);
        for b in targets {
            for r in self.block_mut(b)?.reads.iter_mut().filter(|r| r.buffer == source) {
                r.buffer = cache.clone();
            }
        }
        Ok(copy)
    }

    /// Redirect the `write_index`-th write of `block` to a new buffer in `scope`, and copy the
    /// result back right after the block's top-level subtree.
    pub(crate) fn cache_write(&mut self, block: BlockRef, write_index: usize, scope: &str) -> Result<BlockRef> {
        ensure!(block != self.root(), RootBlockSnafu);
        let blk = self.block(block)?;
        let target = blk
            .writes
            .get(write_index)
            .context(RegionIndexOutOfRangeSnafu { block: blk.name.clone(), kind: "write", index: write_index })?
            .buffer
            .clone();
        let cache = self.add_cache_buffer(&target, scope)?;

        let (parent, _, pos) = self.scope_anchor(block.0)?;
        let copy = self.insert_copy_block(&cache, &target, &cache, parent, pos + 1)?;

        let mut targets = self.blocks_under(block.0)?;
        targets.push(block);
        for b in targets {
            let blk = self.block_mut(b)?;
            for r in blk.writes.iter_mut().chain(blk.reads.iter_mut()).filter(|r| r.buffer == target) {
                r.buffer = cache.clone();
            }
        }
        Ok(copy)
    }

    fn add_cache_buffer(&mut self, source: &str, scope: &str) -> Result<String> {
        let src = self.buffer(source)?;
        let name = self.fresh_buffer_name(&format!("{source}_{}", scope.replace('.', "_")));
        let cache = Buffer {
            name: name.clone(),
            shape: src.shape.clone(),
            dtype: src.dtype,
            scope: scope.to_string(),
            is_output: false,
        };
        self.add_buffer(cache);
        Ok(name)
    }

    /// Element-wise copy `dst[v...] = src[v...]` over the full buffer, in its own loop nest.
    fn insert_copy_block(&mut self, src: &str, dst: &str, name: &str, parent: NodeId, pos: usize) -> Result<BlockRef> {
        let shape = self.buffer(src)?.shape.clone();
        let indices = || (0..shape.len()).map(Expr::Var);

        let mut block = Block::named(self.fresh_block_name(name));
        block.iter_vars = shape.iter().map(|&e| IterVar::spatial(e)).collect();
        block.reads = vec![BufferRegion::point(src, indices())];
        block.writes = vec![BufferRegion::point(dst, indices())];
        block.body = Some(Value::Load(0));

        let loops = self.insert_loop_nest(parent, pos, &shape)?;
        block.bindings = loops.iter().map(|l| Expr::Var(*l)).collect();
        let id = self.alloc(Node::Block(block));
        let (anchor, at) = match loops.last() {
            Some(l) => (l.0, 0),
            None => (parent, pos),
        };
        self.attach(id, anchor, at)?;
        Ok(BlockRef(id))
    }
}
