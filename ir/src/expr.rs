//! Integer index expressions.
//!
//! The same tree serves two roles: block iterator bindings (`Expr<LoopRef>`, over loop variables)
//! and buffer access indices (`Expr<usize>`, over block iterator positions).

use std::collections::BTreeMap;
use std::fmt;

/// Quasi-affine index expression over variables of type `V`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr<V> {
    Var(V),
    Const(i64),
    Add(Box<Expr<V>>, Box<Expr<V>>),
    /// Multiplication by a constant.
    Mul(Box<Expr<V>>, i64),
    FloorDiv(Box<Expr<V>>, i64),
    FloorMod(Box<Expr<V>>, i64),
}

/// `Σ coeff·var + offset` form of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linear<V: Ord> {
    pub coeffs: BTreeMap<V, i64>,
    pub offset: i64,
}

impl<V> Expr<V> {
    pub fn var(v: V) -> Self {
        Self::Var(v)
    }

    pub fn constant(c: i64) -> Self {
        Self::Const(c)
    }

    pub fn as_var(&self) -> Option<&V> {
        match self {
            Self::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Self::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn add(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Const(0), e) | (e, Self::Const(0)) => e,
            (Self::Const(a), Self::Const(b)) => Self::Const(a + b),
            (a, b) => Self::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn scale(self, c: i64) -> Self {
        match (self, c) {
            (_, 0) => Self::Const(0),
            (e, 1) => e,
            (Self::Const(a), c) => Self::Const(a * c),
            (Self::Mul(e, a), c) => Self::Mul(e, a * c),
            (e, c) => Self::Mul(Box::new(e), c),
        }
    }

    pub fn floordiv(self, c: i64) -> Self {
        match (self, c) {
            (e, 1) => e,
            (Self::Const(a), c) => Self::Const(a.div_euclid(c)),
            (e, c) => Self::FloorDiv(Box::new(e), c),
        }
    }

    pub fn floormod(self, c: i64) -> Self {
        match (self, c) {
            (_, 1) => Self::Const(0),
            (Self::Const(a), c) => Self::Const(a.rem_euclid(c)),
            (e, c) => Self::FloorMod(Box::new(e), c),
        }
    }

    /// Replace every variable with an expression over another variable type.
    pub fn substitute<W>(&self, f: &mut impl FnMut(&V) -> Expr<W>) -> Expr<W> {
        match self {
            Self::Var(v) => f(v),
            Self::Const(c) => Expr::Const(*c),
            Self::Add(a, b) => a.substitute(f).add(b.substitute(f)),
            Self::Mul(e, c) => e.substitute(f).scale(*c),
            Self::FloorDiv(e, c) => e.substitute(f).floordiv(*c),
            Self::FloorMod(e, c) => e.substitute(f).floormod(*c),
        }
    }

    /// Evaluate under a variable assignment.
    pub fn eval(&self, env: &impl Fn(&V) -> i64) -> i64 {
        match self {
            Self::Var(v) => env(v),
            Self::Const(c) => *c,
            Self::Add(a, b) => a.eval(env) + b.eval(env),
            Self::Mul(e, c) => e.eval(env) * c,
            Self::FloorDiv(e, c) => e.eval(env).div_euclid(*c),
            Self::FloorMod(e, c) => e.eval(env).rem_euclid(*c),
        }
    }

    fn visit_vars<'a>(&'a self, f: &mut impl FnMut(&'a V)) {
        match self {
            Self::Var(v) => f(v),
            Self::Const(_) => {}
            Self::Add(a, b) => {
                a.visit_vars(f);
                b.visit_vars(f);
            }
            Self::Mul(e, _) | Self::FloorDiv(e, _) | Self::FloorMod(e, _) => e.visit_vars(f),
        }
    }

    pub fn mentions(&self, pred: impl Fn(&V) -> bool) -> bool {
        let mut found = false;
        self.visit_vars(&mut |v| found |= pred(v));
        found
    }
}

impl<V: Clone + PartialEq> Expr<V> {
    /// Distinct variables in first-occurrence order.
    pub fn vars(&self) -> Vec<V> {
        let mut out: Vec<V> = Vec::new();
        self.visit_vars(&mut |v| {
            if !out.contains(v) {
                out.push(v.clone());
            }
        });
        out
    }

    /// Exact division by `d`, if every term is a multiple of it.
    pub fn try_div_exact(&self, d: i64) -> Option<Self> {
        if d == 1 {
            return Some(self.clone());
        }
        match self {
            Self::Const(c) => (c % d == 0).then(|| Self::Const(c / d)),
            Self::Add(a, b) => Some(a.try_div_exact(d)?.add(b.try_div_exact(d)?)),
            Self::Mul(e, c) if c % d == 0 => Some((**e).clone().scale(c / d)),
            Self::Mul(e, c) if d % c == 0 => e.try_div_exact(d / c),
            _ => None,
        }
    }
}

impl<V: Clone + Ord> Expr<V> {
    /// Linear form, or `None` when the expression uses floordiv/floormod.
    pub fn linear(&self) -> Option<Linear<V>> {
        let mut lin = Linear { coeffs: BTreeMap::new(), offset: 0 };
        self.accumulate(1, &mut lin).then_some(lin)
    }

    fn accumulate(&self, scale: i64, lin: &mut Linear<V>) -> bool {
        match self {
            Self::Var(v) => {
                *lin.coeffs.entry(v.clone()).or_insert(0) += scale;
                true
            }
            Self::Const(c) => {
                lin.offset += c * scale;
                true
            }
            Self::Add(a, b) => a.accumulate(scale, lin) && b.accumulate(scale, lin),
            Self::Mul(e, c) => e.accumulate(scale * c, lin),
            Self::FloorDiv(..) | Self::FloorMod(..) => false,
        }
    }

    /// Separate an expression into a part free of `inner` variables and the linear coefficients of
    /// the `inner` variables.
    ///
    /// Terms that do not mention inner variables are kept verbatim, so outer parts may be
    /// non-linear. Returns `None` if an inner variable appears under floordiv/floormod.
    pub fn split_inner(&self, is_inner: &impl Fn(&V) -> bool) -> Option<(Self, BTreeMap<V, i64>)> {
        let mut outer = Self::Const(0);
        let mut inner = BTreeMap::new();
        self.split_terms(1, is_inner, &mut outer, &mut inner)?;
        inner.retain(|_, c| *c != 0);
        Some((outer, inner))
    }

    fn split_terms(
        &self,
        scale: i64,
        is_inner: &impl Fn(&V) -> bool,
        outer: &mut Self,
        inner: &mut BTreeMap<V, i64>,
    ) -> Option<()> {
        if !self.mentions(is_inner) {
            *outer = std::mem::replace(outer, Self::Const(0)).add(self.clone().scale(scale));
            return Some(());
        }
        match self {
            Self::Var(v) => {
                *inner.entry(v.clone()).or_insert(0) += scale;
                Some(())
            }
            Self::Add(a, b) => {
                a.split_terms(scale, is_inner, outer, inner)?;
                b.split_terms(scale, is_inner, outer, inner)
            }
            Self::Mul(e, c) => e.split_terms(scale * c, is_inner, outer, inner),
            Self::Const(_) | Self::FloorDiv(..) | Self::FloorMod(..) => None,
        }
    }
}

impl<V: fmt::Display> fmt::Display for Expr<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(v) => write!(f, "{v}"),
            Self::Const(c) => write!(f, "{c}"),
            Self::Add(a, b) => write!(f, "{a} + {b}"),
            Self::Mul(e, c) => match **e {
                Self::Add(..) => write!(f, "({e}) * {c}"),
                _ => write!(f, "{e} * {c}"),
            },
            Self::FloorDiv(e, c) => write!(f, "({e}) // {c}"),
            Self::FloorMod(e, c) => write!(f, "({e}) % {c}"),
        }
    }
}
