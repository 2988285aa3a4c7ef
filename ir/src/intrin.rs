//! Tensor intrinsic registry.
//!
//! Intrinsics are described by shape and element types only; their lowering is outside this
//! crate. The registry is process-wide and pre-populated with the Tensor Core (WMMA) fragments
//! and the CPU dot-product instructions used by the default rule sets.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use snafu::{OptionExt, ensure};
use vesta_dtype::{DType, ScalarDType};

use crate::error::*;
use crate::program::{Block, Program};
use crate::types::IterKind;
use crate::value::ReduceOp;

/// GEMM operand role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Operand {
    A,
    B,
}

/// `C[m, n] += A[m, k] * B[k, n]` (or `B[n, k]` when transposed) on fixed-size tiles.
///
/// `m == 1` describes vector dot-product instructions where `A` has no row dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputeDesc {
    pub m: i64,
    pub n: i64,
    pub k: i64,
    pub a: ScalarDType,
    pub b: ScalarDType,
    pub c: ScalarDType,
    pub b_transposed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntrinDesc {
    Compute(ComputeDesc),
    /// Accumulator fill.
    Init { m: i64, n: i64, dtype: ScalarDType },
    /// Operand fragment load.
    Load { operand: Operand, rows: i64, cols: i64, dtype: ScalarDType, transposed: bool, scope: String },
    /// Accumulator store.
    Store { m: i64, n: i64, dtype: ScalarDType, scope: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorIntrin {
    pub name: String,
    pub desc: IntrinDesc,
}

impl TensorIntrin {
    pub fn compute(&self) -> Option<&ComputeDesc> {
        match &self.desc {
            IntrinDesc::Compute(desc) => Some(desc),
            _ => None,
        }
    }
}

// ============================================================================
// MATCHING
// ============================================================================

/// Block iterators and reads playing the GEMM roles of a [`ComputeDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeMatch {
    pub m: Option<usize>,
    pub n: usize,
    pub k: usize,
    pub a_read: usize,
    pub b_read: usize,
}

impl ComputeMatch {
    /// `(iterator, tile extent)` pairs, outer to inner in intrinsic order.
    pub fn tiles(&self, desc: &ComputeDesc) -> Vec<(usize, i64)> {
        let mut out = Vec::with_capacity(3);
        if let Some(m) = self.m {
            out.push((m, desc.m));
        }
        out.push((self.n, desc.n));
        out.push((self.k, desc.k));
        out
    }
}

impl ComputeDesc {
    /// Match a multiply-accumulate block against this description.
    pub fn match_block(&self, program: &Program, block: &Block) -> Option<ComputeMatch> {
        if block.reduction.as_ref()?.op != ReduceOp::Add || block.writes.len() != 1 {
            return None;
        }
        let (x, y) = block.body.as_ref()?.as_product_of_loads()?;
        let out = block.writes[0].direct_iters()?;
        let n = *out.last()?;
        let m = match self.m {
            1 => None,
            _ => Some(*out.get(out.len().checked_sub(2)?)?),
        };
        let k = block.iter_vars.iter().rposition(|iv| iv.kind == IterKind::Reduce)?;

        let kind = |i: usize| block.iter_vars.get(i).map(|iv| (iv.kind, iv.extent));
        let (n_kind, n_ext) = kind(n)?;
        let (_, k_ext) = kind(k)?;
        if n_kind != IterKind::Spatial || n_ext % self.n != 0 || k_ext % self.k != 0 {
            return None;
        }
        if let Some(m) = m {
            let (m_kind, m_ext) = kind(m)?;
            if m_kind != IterKind::Spatial || m_ext % self.m != 0 || m == n {
                return None;
            }
        }

        let (a_read, b_read) = [(x, y), (y, x)]
            .into_iter()
            .find(|&(a, b)| self.is_operand_a(block, a, m, k) && self.is_operand_b(block, b, n, k))?;

        let dtype_of = |name: &str| program.buffer(name).ok().map(|b| b.dtype);
        let types_match = dtype_of(&block.reads[a_read].buffer)? == DType::Scalar(self.a)
            && dtype_of(&block.reads[b_read].buffer)? == DType::Scalar(self.b)
            && dtype_of(&block.writes[0].buffer)? == DType::Scalar(self.c);
        types_match.then_some(ComputeMatch { m, n, k, a_read, b_read })
    }

    fn is_operand_a(&self, block: &Block, read: usize, m: Option<usize>, k: usize) -> bool {
        let Some(idx) = block.reads.get(read).and_then(|r| r.direct_iters()) else { return false };
        match m {
            Some(m) => idx.len() >= 2 && idx[idx.len() - 2..] == [m, k],
            None => idx.last() == Some(&k),
        }
    }

    fn is_operand_b(&self, block: &Block, read: usize, n: usize, k: usize) -> bool {
        let Some(idx) = block.reads.get(read).and_then(|r| r.direct_iters()) else { return false };
        let expected = if self.b_transposed { [n, k] } else { [k, n] };
        idx.len() >= 2 && idx[idx.len() - 2..] == expected
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<TensorIntrin>>>> = Lazy::new(|| {
    let table = builtin_intrins().into_iter().map(|i| (i.name.clone(), Arc::new(i))).collect();
    RwLock::new(table)
});

/// Register a new intrinsic under its name.
pub fn register_intrin(intrin: TensorIntrin) -> Result<()> {
    let mut table = REGISTRY.write();
    ensure!(!table.contains_key(&intrin.name), DuplicateIntrinSnafu { name: intrin.name.clone() });
    tracing::debug!(name = %intrin.name, "registered tensor intrinsic");
    table.insert(intrin.name.clone(), Arc::new(intrin));
    Ok(())
}

pub fn get_intrin(name: &str) -> Result<Arc<TensorIntrin>> {
    REGISTRY.read().get(name).cloned().context(UnknownIntrinSnafu { name })
}

fn compute(name: &str, m: i64, n: i64, k: i64, types: [ScalarDType; 3], b_transposed: bool) -> TensorIntrin {
    let [a, b, c] = types;
    TensorIntrin { name: name.to_string(), desc: IntrinDesc::Compute(ComputeDesc { m, n, k, a, b, c, b_transposed }) }
}

fn builtin_intrins() -> Vec<TensorIntrin> {
    use ScalarDType::*;

    let mut out = Vec::new();
    let wmma = [
        ("f16f16f32", "f16", "f32", Float16, Float32),
        ("f16f16f16", "f16", "f16", Float16, Float16),
        ("s8s8s32", "s8", "s32", Int8, Int32),
    ];
    for (tag, in_tag, acc_tag, input, acc) in wmma {
        out.push(compute(&format!("wmma_sync_16x16x16_{tag}"), 16, 16, 16, [input, input, acc], false));
        out.push(compute(&format!("wmma_sync_16x16x16_{tag}_trans"), 16, 16, 16, [input, input, acc], true));

        let fill = format!("wmma_fill_16x16x16_{acc_tag}");
        if !out.iter().any(|i| i.name == fill) {
            out.push(TensorIntrin { name: fill, desc: IntrinDesc::Init { m: 16, n: 16, dtype: acc } });
        }
        let store = format!("wmma_store_16x16x16_{acc_tag}_shared_dyn");
        if !out.iter().any(|i| i.name == store) {
            let desc = IntrinDesc::Store { m: 16, n: 16, dtype: acc, scope: "wmma.accumulator".into() };
            out.push(TensorIntrin { name: store, desc });
        }
        let loads = [
            (format!("wmma_load_16x16x16_{in_tag}_a_shared_dyn"), Operand::A, false, "wmma.matrix_a"),
            (format!("wmma_load_16x16x16_{in_tag}_b_shared_dyn"), Operand::B, false, "wmma.matrix_b"),
            (format!("wmma_load_16x16x16_{in_tag}_b_trans_shared_dyn"), Operand::B, true, "wmma.matrix_b"),
        ];
        for (name, operand, transposed, scope) in loads {
            if !out.iter().any(|i| i.name == name) {
                let desc = IntrinDesc::Load { operand, rows: 16, cols: 16, dtype: input, transposed, scope: scope.into() };
                out.push(TensorIntrin { name, desc });
            }
        }
    }

    out.push(compute("dot_16x4_vnni", 1, 16, 4, [UInt8, Int8, Int32], true));
    out.push(compute("dot_16x4_avx512", 1, 16, 4, [UInt8, Int8, Int32], true));
    out.push(compute("dot_4x4_i8i8s32_neon", 1, 4, 4, [Int8, Int8, Int32], true));
    out.push(compute("dot_4x4_i8i8s32_sdot", 1, 4, 4, [Int8, Int8, Int32], true));
    out.push(compute("dot_4x4_u8u8u32_udot", 1, 4, 4, [UInt8, UInt8, UInt32], true));
    out.push(compute("dot_4x4_u8u8i32_hdot", 1, 4, 4, [UInt8, UInt8, Int32], true));
    out
}
