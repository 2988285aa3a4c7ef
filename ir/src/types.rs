//! Fundamental type definitions shared by blocks, loops and buffers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use vesta_dtype::DType;

use crate::expr::Expr;

/// Kind of a block iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString)]
pub enum IterKind {
    /// Data-parallel iterator (`S`).
    #[strum(to_string = "S", serialize = "space")]
    Spatial,
    /// Reduction iterator (`R`).
    #[strum(to_string = "R", serialize = "reduce")]
    Reduce,
}

/// Block iterator: kind plus iteration extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterVar {
    pub kind: IterKind,
    pub extent: i64,
}

impl IterVar {
    pub const fn spatial(extent: i64) -> Self {
        Self { kind: IterKind::Spatial, extent }
    }

    pub const fn reduce(extent: i64) -> Self {
        Self { kind: IterKind::Reduce, extent }
    }
}

/// How a loop is executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ForKind {
    #[default]
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
    /// Bound to a hardware execution axis such as `threadIdx.x`.
    ThreadBinding(String),
}

impl ForKind {
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial)
    }

    pub fn thread_tag(&self) -> Option<&str> {
        match self {
            Self::ThreadBinding(tag) => Some(tag),
            _ => None,
        }
    }
}

impl fmt::Display for ForKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => f.write_str("serial"),
            Self::Parallel => f.write_str("parallel"),
            Self::Vectorized => f.write_str("vectorized"),
            Self::Unrolled => f.write_str("unrolled"),
            Self::ThreadBinding(tag) => write!(f, "bind({tag})"),
        }
    }
}

/// Annotation payload attached to blocks and loops.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnValue {
    Int(i64),
    Str(String),
    Ints(Vec<i64>),
}

impl AnnValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for AnnValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for AnnValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AnnValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<i64>> for AnnValue {
    fn from(v: Vec<i64>) -> Self {
        Self::Ints(v)
    }
}

impl fmt::Display for AnnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Ints(vs) => write!(f, "{vs:?}"),
        }
    }
}

pub type Annotations = BTreeMap<String, AnnValue>;

/// Storage declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: DType,
    /// Memory scope: `global`, `shared`, `local`, `wmma.matrix_a`, ...
    pub scope: String,
    /// Program outputs are never removed by inlining.
    pub is_output: bool,
}

/// One dimension of an accessed region: `[min, min + extent)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: Expr<usize>,
    pub extent: i64,
}

impl Range {
    pub fn point(min: Expr<usize>) -> Self {
        Self { min, extent: 1 }
    }
}

/// Region of a buffer accessed by a block, indexed by block iterator position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferRegion {
    pub buffer: String,
    pub region: Vec<Range>,
}

impl BufferRegion {
    pub fn point(buffer: impl Into<String>, indices: impl IntoIterator<Item = Expr<usize>>) -> Self {
        Self { buffer: buffer.into(), region: indices.into_iter().map(Range::point).collect() }
    }

    pub fn is_point(&self) -> bool {
        self.region.iter().all(|r| r.extent == 1)
    }

    /// Iterator position accessed directly at each dimension, if every index is a bare iterator.
    pub fn direct_iters(&self) -> Option<Vec<usize>> {
        self.region.iter().map(|r| if r.extent == 1 { r.min.as_var().copied() } else { None }).collect()
    }

    pub fn substitute(&self, f: &mut impl FnMut(&usize) -> Expr<usize>) -> Self {
        Self {
            buffer: self.buffer.clone(),
            region: self.region.iter().map(|r| Range { min: r.min.substitute(f), extent: r.extent }).collect(),
        }
    }
}

impl fmt::Display for BufferRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.buffer)?;
        for (i, r) in self.region.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match r.extent {
                1 => write!(f, "{}", r.min.substitute(&mut |v| Expr::Var(IterName(*v))))?,
                ext => write!(f, "{}:+{ext}", r.min.substitute(&mut |v| Expr::Var(IterName(*v))))?,
            }
        }
        f.write_str("]")
    }
}

/// Display helper naming block iterators `v0, v1, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct IterName(pub usize);

impl fmt::Display for IterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
