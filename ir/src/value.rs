//! Block compute bodies.
//!
//! A body is a small expression tree evaluated once per block instance. `Load(i)` reads the value
//! at the block's `i`-th read region, so bodies stay valid when indices are rewritten.

use std::fmt;
use std::ops::{Add, Mul, Sub};

use vesta_dtype::DType;

/// Scalar constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

/// Binary arithmetic/comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Lt,
}

/// Reduction combiners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReduceOp {
    Add,
    Mul,
    Max,
    Min,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Value of the `i`-th read region.
    Load(usize),
    Const(ConstValue),
    Binary(BinaryOp, Box<Value>, Box<Value>),
    /// Opaque operator call such as `tir.exp`.
    Call(String, Vec<Value>),
    /// `if cond { then } else { otherwise }`.
    Select(Box<Value>, Box<Value>, Box<Value>),
    Cast(DType, Box<Value>),
    /// Body replaced by a tensor intrinsic.
    Intrin(String, Vec<Value>),
}

/// Reduction combiner and identity of a reduction block.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub op: ReduceOp,
    pub init: Value,
}

impl Value {
    pub fn load(index: usize) -> Self {
        Self::Load(index)
    }

    pub fn int(v: i64) -> Self {
        Self::Const(ConstValue::Int(v))
    }

    pub fn float(v: f64) -> Self {
        Self::Const(ConstValue::Float(v))
    }

    pub fn call(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Call(name.into(), args)
    }

    pub fn select(cond: Value, then: Value, otherwise: Value) -> Self {
        Self::Select(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn cast(self, dtype: DType) -> Self {
        Self::Cast(dtype, Box::new(self))
    }

    pub fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Self {
        Self::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    fn children(&self) -> Vec<&Value> {
        match self {
            Self::Load(_) | Self::Const(_) => vec![],
            Self::Binary(_, a, b) => vec![&**a, &**b],
            Self::Call(_, args) | Self::Intrin(_, args) => args.iter().collect(),
            Self::Select(c, t, e) => vec![&**c, &**t, &**e],
            Self::Cast(_, v) => vec![&**v],
        }
    }

    fn any(&self, pred: &impl Fn(&Value) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    pub fn has_select(&self) -> bool {
        self.any(&|v| matches!(v, Self::Select(..)))
    }

    /// Whether the body calls any of the named operators.
    pub fn calls_any(&self, ops: &[String]) -> bool {
        self.any(&|v| matches!(v, Self::Call(name, _) if ops.contains(name)))
    }

    /// Read indices used by the body, in first-use order.
    pub fn loads(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_loads(&mut out);
        out
    }

    fn collect_loads(&self, out: &mut Vec<usize>) {
        match self {
            Self::Load(i) if !out.contains(i) => out.push(*i),
            _ => self.children().into_iter().for_each(|c| c.collect_loads(out)),
        }
    }

    /// Rebuild the tree, replacing every `Load(i)` with `f(i)`.
    pub fn map_loads(&self, f: &mut impl FnMut(usize) -> Value) -> Value {
        match self {
            Self::Load(i) => f(*i),
            Self::Const(c) => Self::Const(*c),
            Self::Binary(op, a, b) => Self::binary(*op, a.map_loads(f), b.map_loads(f)),
            Self::Call(name, args) => Self::Call(name.clone(), args.iter().map(|a| a.map_loads(f)).collect()),
            Self::Intrin(name, args) => Self::Intrin(name.clone(), args.iter().map(|a| a.map_loads(f)).collect()),
            Self::Select(c, t, e) => Self::select(c.map_loads(f), t.map_loads(f), e.map_loads(f)),
            Self::Cast(dtype, v) => v.map_loads(f).cast(*dtype),
        }
    }

    /// Strip casts and return the read index this value loads.
    pub fn as_load(&self) -> Option<usize> {
        match self {
            Self::Load(i) => Some(*i),
            Self::Cast(_, v) => v.as_load(),
            _ => None,
        }
    }

    /// `(lhs, rhs)` read indices of a `load * load` product, casts ignored.
    pub fn as_product_of_loads(&self) -> Option<(usize, usize)> {
        match self {
            Self::Binary(BinaryOp::Mul, a, b) => Some((a.as_load()?, b.as_load()?)),
            Self::Cast(_, v) => v.as_product_of_loads(),
            _ => None,
        }
    }
}

impl Add for Value {
    type Output = Value;

    fn add(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Add, self, rhs)
    }
}

impl Sub for Value {
    type Output = Value;

    fn sub(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Sub, self, rhs)
    }
}

impl Mul for Value {
    type Output = Value;

    fn mul(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Mul, self, rhs)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, args: &[Value]| -> fmt::Result {
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{a}")?;
            }
            Ok(())
        };
        match self {
            Self::Load(i) => write!(f, "%{i}"),
            Self::Const(c) => write!(f, "{c}"),
            Self::Binary(op, a, b) => write!(f, "{op}({a}, {b})"),
            Self::Call(name, args) | Self::Intrin(name, args) => {
                write!(f, "{name}(")?;
                list(f, args)?;
                f.write_str(")")
            }
            Self::Select(c, t, e) => write!(f, "select({c}, {t}, {e})"),
            Self::Cast(dtype, v) => write!(f, "{dtype}({v})"),
        }
    }
}
