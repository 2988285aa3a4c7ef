//! Program tree: an arena of blocks and loops under a root block.
//!
//! Nodes are addressed by generation-counted [`NodeId`]s. Removing a node bumps its slot generation,
//! so any handle obtained before a structural mutation can be checked with [`Program::contains`]
//! instead of silently aliasing a new node. Slots are never reused; allocation order is therefore a
//! pure function of the mutation sequence, which is what makes trace replay reproduce handles.

use std::collections::BTreeMap;
use std::fmt;

use snafu::OptionExt;

use crate::error::*;
use crate::expr::Expr;
use crate::types::{Annotations, Buffer, BufferRegion, ForKind, IterKind, IterVar};
use crate::value::{Reduction, Value};

// ============================================================================
// HANDLES
// ============================================================================

/// Generation-counted arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

/// Handle to a block node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(pub(crate) NodeId);

/// Handle to a loop node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopRef(pub(crate) NodeId);

impl BlockRef {
    pub fn id(&self) -> NodeId {
        self.0
    }
}

impl LoopRef {
    pub fn id(&self) -> NodeId {
        self.0
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl fmt::Display for LoopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

// ============================================================================
// NODES
// ============================================================================

/// A computation unit: iteration domain, accessed regions and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub iter_vars: Vec<IterVar>,
    /// One binding per iterator, expressed over enclosing loops.
    pub bindings: Vec<Expr<LoopRef>>,
    pub reads: Vec<BufferRegion>,
    pub writes: Vec<BufferRegion>,
    pub body: Option<Value>,
    pub reduction: Option<Reduction>,
    /// Guards left by imperfect splits; the body runs only where all of them hold.
    pub predicates: Vec<Predicate>,
    pub annotations: Annotations,
}

/// `expr < bound`, over enclosing loops.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub expr: Expr<LoopRef>,
    pub bound: i64,
}

impl Predicate {
    pub fn holds(&self, env: &impl Fn(&LoopRef) -> i64) -> bool {
        self.expr.eval(env) < self.bound
    }
}

impl Block {
    pub(crate) fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iter_vars: Vec::new(),
            bindings: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            body: None,
            reduction: None,
            predicates: Vec::new(),
            annotations: Annotations::new(),
        }
    }

    pub fn is_guarded(&self) -> bool {
        !self.predicates.is_empty()
    }

    pub fn is_reduction(&self) -> bool {
        self.iter_vars.iter().any(|iv| iv.kind == IterKind::Reduce)
    }

    pub fn is_spatial(&self) -> bool {
        !self.is_reduction()
    }

    pub fn annotation(&self, key: &str) -> Option<&crate::AnnValue> {
        self.annotations.get(key)
    }

    pub fn reads_buffer(&self, buffer: &str) -> bool {
        self.reads.iter().any(|r| r.buffer == buffer)
    }

    pub fn writes_buffer(&self, buffer: &str) -> bool {
        self.writes.iter().any(|r| r.buffer == buffer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub extent: i64,
    pub kind: ForKind,
    pub annotations: Annotations,
}

impl Loop {
    pub(crate) fn serial(extent: i64) -> Self {
        Self { extent, kind: ForKind::Serial, annotations: Annotations::new() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Block(Block),
    Loop(Loop),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry {
    pub(crate) node: Node,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

// ============================================================================
// PROGRAM
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    slots: Vec<Slot>,
    root: BlockRef,
    buffers: BTreeMap<String, Buffer>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Empty program holding only the root block.
    pub fn new() -> Self {
        let root = Entry { node: Node::Block(Block::named("root")), parent: None, children: Vec::new() };
        let slots = vec![Slot { generation: 0, entry: Some(root) }];
        Self { slots, root: BlockRef(NodeId { index: 0, generation: 0 }), buffers: BTreeMap::new() }
    }

    pub fn root(&self) -> BlockRef {
        self.root
    }

    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------

    pub fn buffer(&self, name: &str) -> Result<&Buffer> {
        self.buffers.get(name).context(UnknownBufferSnafu { name })
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.values()
    }

    /// Names of the program's output buffers.
    pub fn outputs(&self) -> Vec<&str> {
        self.buffers.values().filter(|b| b.is_output).map(|b| b.name.as_str()).collect()
    }

    pub(crate) fn add_buffer(&mut self, buffer: Buffer) {
        self.buffers.insert(buffer.name.clone(), buffer);
    }

    pub(crate) fn remove_buffer(&mut self, name: &str) {
        self.buffers.remove(name);
    }

    pub(crate) fn fresh_buffer_name(&self, base: &str) -> String {
        fresh_name(base, |n| self.buffers.contains_key(n))
    }

    pub(crate) fn fresh_block_name(&self, base: &str) -> String {
        fresh_name(base, |n| self.find_block(n).is_some())
    }

    // ------------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------------

    /// Whether the handle still refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots.get(id.index as usize).is_some_and(|s| s.generation == id.generation && s.entry.is_some())
    }

    pub(crate) fn entry(&self, id: NodeId) -> Result<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_ref())
            .context(StaleHandleSnafu { id })
    }

    pub(crate) fn entry_mut(&mut self, id: NodeId) -> Result<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_mut())
            .context(StaleHandleSnafu { id })
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        Ok(&self.entry(id)?.node)
    }

    pub fn block(&self, block: BlockRef) -> Result<&Block> {
        match self.node(block.0)? {
            Node::Block(b) => Ok(b),
            Node::Loop(_) => NotABlockSnafu { id: block.0 }.fail(),
        }
    }

    pub(crate) fn block_mut(&mut self, block: BlockRef) -> Result<&mut Block> {
        match &mut self.entry_mut(block.0)?.node {
            Node::Block(b) => Ok(b),
            Node::Loop(_) => NotABlockSnafu { id: block.0 }.fail(),
        }
    }

    pub fn for_loop(&self, loop_: LoopRef) -> Result<&Loop> {
        match self.node(loop_.0)? {
            Node::Loop(l) => Ok(l),
            Node::Block(_) => NotALoopSnafu { id: loop_.0 }.fail(),
        }
    }

    pub(crate) fn for_loop_mut(&mut self, loop_: LoopRef) -> Result<&mut Loop> {
        match &mut self.entry_mut(loop_.0)?.node {
            Node::Loop(l) => Ok(l),
            Node::Block(_) => NotALoopSnafu { id: loop_.0 }.fail(),
        }
    }

    pub fn extent(&self, loop_: LoopRef) -> Result<i64> {
        Ok(self.for_loop(loop_)?.extent)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.entry(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(&self.entry(id)?.children)
    }

    pub(crate) fn is_loop(&self, id: NodeId) -> bool {
        matches!(self.node(id), Ok(Node::Loop(_)))
    }

    // ------------------------------------------------------------------------
    // Structural mutation
    // ------------------------------------------------------------------------

    /// Allocate a detached node.
    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, entry: Some(Entry { node, parent: None, children: Vec::new() }) });
        NodeId { index, generation: 0 }
    }

    /// Release a detached node; its children must already be re-homed or released.
    pub(crate) fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize)
            && slot.generation == id.generation
        {
            slot.entry = None;
            slot.generation += 1;
        }
    }

    pub(crate) fn release_subtree(&mut self, id: NodeId) -> Result<()> {
        let children = self.children(id)?.to_vec();
        for child in children {
            self.release_subtree(child)?;
        }
        self.release(id);
        Ok(())
    }

    /// Unlink a node from its parent, returning the parent and former position.
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<(NodeId, usize)> {
        let parent = self.parent(id)?.context(RootBlockSnafu)?;
        let siblings = &mut self.entry_mut(parent)?.children;
        let pos = siblings.iter().position(|c| *c == id).context(StaleHandleSnafu { id })?;
        siblings.remove(pos);
        self.entry_mut(id)?.parent = None;
        Ok((parent, pos))
    }

    pub(crate) fn attach(&mut self, id: NodeId, parent: NodeId, pos: usize) -> Result<()> {
        let siblings = &mut self.entry_mut(parent)?.children;
        let pos = pos.min(siblings.len());
        siblings.insert(pos, id);
        self.entry_mut(id)?.parent = Some(parent);
        Ok(())
    }

    /// Move all children of `from` under `to`, appended in order.
    pub(crate) fn adopt_children(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let children = std::mem::take(&mut self.entry_mut(from)?.children);
        for child in &children {
            self.entry_mut(*child)?.parent = Some(to);
        }
        self.entry_mut(to)?.children.extend(children);
        Ok(())
    }

    /// Remove loops left without children, walking upwards from `start`.
    pub(crate) fn prune_empty_loops(&mut self, start: NodeId) -> Result<()> {
        let mut current = start;
        while self.is_loop(current) && self.children(current)?.is_empty() {
            let (parent, _) = self.detach(current)?;
            self.release(current);
            current = parent;
        }
        Ok(())
    }

    /// Build a loop nest under `parent` at `pos` and return the loops outer to inner.
    pub(crate) fn insert_loop_nest(&mut self, parent: NodeId, pos: usize, extents: &[i64]) -> Result<Vec<LoopRef>> {
        let mut loops = Vec::with_capacity(extents.len());
        let mut anchor = (parent, pos);
        for &extent in extents {
            let id = self.alloc(Node::Loop(Loop::serial(extent)));
            self.attach(id, anchor.0, anchor.1)?;
            anchor = (id, 0);
            loops.push(LoopRef(id));
        }
        Ok(loops)
    }

    /// Rewrite loop variables in the bindings and predicates of every block under `root`.
    pub(crate) fn rewrite_bindings(
        &mut self,
        root: NodeId,
        f: &impl Fn(&LoopRef) -> Option<Expr<LoopRef>>,
    ) -> Result<()> {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let entry = self.entry_mut(id)?;
            if let Node::Block(block) = &mut entry.node {
                block.bindings = block
                    .bindings
                    .iter()
                    .map(|b| b.substitute(&mut |l| f(l).unwrap_or_else(|| Expr::Var(*l))))
                    .collect();
                for p in &mut block.predicates {
                    p.expr = p.expr.substitute(&mut |l| f(l).unwrap_or_else(|| Expr::Var(*l)));
                }
            }
            stack.extend(entry.children.iter().copied());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Whether `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node).ok().flatten();
        }
        false
    }

    /// Enclosing loops of a node within its block scope, outermost first.
    pub fn loops_above(&self, id: NodeId) -> Result<Vec<LoopRef>> {
        let mut loops = Vec::new();
        let mut current = self.parent(id)?;
        while let Some(node) = current {
            if !self.is_loop(node) {
                break;
            }
            loops.push(LoopRef(node));
            current = self.parent(node)?;
        }
        loops.reverse();
        Ok(loops)
    }

    /// Nearest enclosing block.
    pub fn scope_of(&self, id: NodeId) -> Result<BlockRef> {
        let mut current = self.parent(id)?;
        while let Some(node) = current {
            if !self.is_loop(node) {
                return Ok(BlockRef(node));
            }
            current = self.parent(node)?;
        }
        RootBlockSnafu.fail()
    }

    /// Blocks directly in the scope rooted at `id` (not descending into nested blocks).
    pub fn child_blocks(&self, id: NodeId) -> Result<Vec<BlockRef>> {
        let mut out = Vec::new();
        self.collect_child_blocks(id, &mut out)?;
        Ok(out)
    }

    fn collect_child_blocks(&self, id: NodeId, out: &mut Vec<BlockRef>) -> Result<()> {
        for &child in self.children(id)? {
            match self.node(child)? {
                Node::Block(_) => out.push(BlockRef(child)),
                Node::Loop(_) => self.collect_child_blocks(child, out)?,
            }
        }
        Ok(())
    }

    /// All blocks strictly under `id`, in program order.
    pub fn blocks_under(&self, id: NodeId) -> Result<Vec<BlockRef>> {
        let mut out = Vec::new();
        self.collect_blocks(id, &mut out)?;
        Ok(out)
    }

    fn collect_blocks(&self, id: NodeId, out: &mut Vec<BlockRef>) -> Result<()> {
        for &child in self.children(id)? {
            if matches!(self.node(child)?, Node::Block(_)) {
                out.push(BlockRef(child));
            }
            self.collect_blocks(child, out)?;
        }
        Ok(())
    }

    pub fn is_leaf(&self, block: BlockRef) -> Result<bool> {
        Ok(self.blocks_under(block.0)?.is_empty())
    }

    /// Blocks without nested blocks at or under `id`, in program order.
    pub fn leaf_blocks_under(&self, id: NodeId) -> Result<Vec<BlockRef>> {
        if matches!(self.node(id)?, Node::Block(_)) && self.is_leaf(BlockRef(id))? {
            return Ok(vec![BlockRef(id)]);
        }
        let blocks = self.blocks_under(id)?;
        let mut out = Vec::new();
        for b in blocks {
            if self.is_leaf(b)? {
                out.push(b);
            }
        }
        Ok(out)
    }

    /// All blocks except the root, in program order.
    pub fn all_blocks(&self) -> Vec<BlockRef> {
        self.blocks_under(self.root.0).unwrap_or_default()
    }

    pub fn find_block(&self, name: &str) -> Option<BlockRef> {
        self.all_blocks().into_iter().find(|b| self.block(*b).is_ok_and(|blk| blk.name == name))
    }

    /// Blocks in the same scope that write a buffer `block` reads.
    pub fn producers(&self, block: BlockRef) -> Result<Vec<BlockRef>> {
        let scope = self.scope_of(block.0)?;
        let target = self.block(block)?;
        let mut out = Vec::new();
        for other in self.child_blocks(scope.0)? {
            if other != block && self.block(other)?.writes.iter().any(|w| target.reads_buffer(&w.buffer)) {
                out.push(other);
            }
        }
        Ok(out)
    }

    /// Blocks in the same scope that read a buffer `block` writes.
    pub fn consumers(&self, block: BlockRef) -> Result<Vec<BlockRef>> {
        let scope = self.scope_of(block.0)?;
        let target = self.block(block)?;
        let mut out = Vec::new();
        for other in self.child_blocks(scope.0)? {
            if other != block && self.block(other)?.reads.iter().any(|r| target.writes_buffer(&r.buffer)) {
                out.push(other);
            }
        }
        Ok(out)
    }

    /// Leaf blocks anywhere in the program that access `buffer`.
    pub(crate) fn leaf_accessors(&self, buffer: &str, writers: bool) -> Result<Vec<BlockRef>> {
        let mut out = Vec::new();
        for b in self.leaf_blocks_under(self.root.0)? {
            let blk = self.block(b)?;
            let hit = if writers { blk.writes_buffer(buffer) } else { blk.reads_buffer(buffer) };
            if hit {
                out.push(b);
            }
        }
        Ok(out)
    }

    /// Whether every iterator of the block is bound to a distinct loop of matching extent.
    pub fn has_trivial_binding(&self, block: BlockRef) -> Result<bool> {
        let blk = self.block(block)?;
        let mut seen = Vec::new();
        for (iv, binding) in blk.iter_vars.iter().zip(&blk.bindings) {
            match binding {
                Expr::Var(l) if !seen.contains(l) && self.extent(*l)? == iv.extent => seen.push(*l),
                Expr::Const(0) if iv.extent == 1 => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Whether no block in the program reduces.
    pub fn is_pure_spatial(&self) -> bool {
        self.all_blocks().iter().all(|b| self.block(*b).is_ok_and(Block::is_spatial))
    }

    /// The block's top-level ancestor inside its scope and that ancestor's position.
    pub(crate) fn scope_anchor(&self, id: NodeId) -> Result<(NodeId, NodeId, usize)> {
        let scope = self.scope_of(id)?.0;
        let mut top = id;
        while let Some(parent) = self.parent(top)?
            && parent != scope
        {
            top = parent;
        }
        let pos = self.children(scope)?.iter().position(|c| *c == top).context(StaleHandleSnafu { id })?;
        Ok((scope, top, pos))
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let Ok(entry) = self.entry(id) else { return Ok(()) };
        let pad = "  ".repeat(depth);
        match &entry.node {
            Node::Loop(l) => {
                write!(f, "{pad}for {} in {}", LoopRef(id), l.extent)?;
                if !l.kind.is_serial() {
                    write!(f, " {}", l.kind)?;
                }
                fmt_annotations(f, &l.annotations)?;
                writeln!(f)?;
            }
            Node::Block(b) => {
                write!(f, "{pad}block {}", b.name)?;
                if !b.iter_vars.is_empty() {
                    f.write_str(" [")?;
                    for (i, (iv, binding)) in b.iter_vars.iter().zip(&b.bindings).enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}{}={binding}", iv.kind, iv.extent)?;
                    }
                    f.write_str("]")?;
                }
                fmt_annotations(f, &b.annotations)?;
                writeln!(f)?;
                for p in &b.predicates {
                    writeln!(f, "{pad}  where {} < {}", p.expr, p.bound)?;
                }
                for r in &b.reads {
                    writeln!(f, "{pad}  read {r}")?;
                }
                for w in &b.writes {
                    writeln!(f, "{pad}  write {w}")?;
                }
                if let Some(red) = &b.reduction {
                    writeln!(f, "{pad}  init {}", red.init)?;
                }
                if let Some(body) = &b.body {
                    let op = b.reduction.as_ref().map(|r| format!("{}=", r.op)).unwrap_or_else(|| "=".into());
                    writeln!(f, "{pad}  {op} {body}")?;
                }
            }
        }
        for &child in &entry.children {
            self.fmt_node(f, child, depth + 1)?;
        }
        Ok(())
    }
}

fn fmt_annotations(f: &mut fmt::Formatter<'_>, annotations: &Annotations) -> fmt::Result {
    for (key, value) in annotations {
        write!(f, " @{key}={value}")?;
    }
    Ok(())
}

fn fresh_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..).map(|i| format!("{base}_{i}")).find(|n| !taken(n)).unwrap_or_else(|| base.to_string())
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for buffer in self.buffers.values() {
            write!(f, "buffer {}{:?} {} {}", buffer.name, buffer.shape, buffer.dtype, buffer.scope)?;
            if buffer.is_output {
                f.write_str(" output")?;
            }
            writeln!(f)?;
        }
        self.fmt_node(f, self.root.0, 0)
    }
}
