//! Small programs shared by the tests.

use vesta_dtype::DType;

use crate::{BlockRef, LoopRef, Program, ProgramBuilder, ReduceOp, Schedule, Value, v};

/// `C[i, j] += A[i, k] * B[k, j]`.
pub fn matmul(n: i64, m: i64, k: i64, input: DType, acc: DType) -> Program {
    let mut b = ProgramBuilder::new();
    b.buffer("A", &[n, k], input).buffer("B", &[k, m], input).output("C", &[n, m], acc);
    b.block("C")
        .spatial(n)
        .spatial(m)
        .reduce(k)
        .read("A", [v(0), v(2)])
        .read("B", [v(2), v(1)])
        .write("C", [v(0), v(1)])
        .body(Value::load(0) * Value::load(1))
        .combine(ReduceOp::Add, Value::float(0.0))
        .finish();
    b.build()
}

/// Matmul followed by `D = max(C, 0)`.
pub fn matmul_relu(n: i64) -> Program {
    let mut b = ProgramBuilder::new();
    b.buffer("A", &[n, n], DType::Float32)
        .buffer("B", &[n, n], DType::Float32)
        .buffer("C", &[n, n], DType::Float32)
        .output("D", &[n, n], DType::Float32);
    b.block("C")
        .spatial(n)
        .spatial(n)
        .reduce(n)
        .read("A", [v(0), v(2)])
        .read("B", [v(2), v(1)])
        .write("C", [v(0), v(1)])
        .body(Value::load(0) * Value::load(1))
        .combine(ReduceOp::Add, Value::float(0.0))
        .finish();
    b.block("D")
        .spatial(n)
        .spatial(n)
        .read("C", [v(0), v(1)])
        .write("D", [v(0), v(1)])
        .body(Value::binary(crate::BinaryOp::Max, Value::load(0), Value::float(0.0)))
        .finish();
    b.build()
}

/// `B = A + 1; C = B * 2` over `n` elements.
pub fn elementwise_chain(n: i64) -> Program {
    let mut b = ProgramBuilder::new();
    b.buffer("A", &[n], DType::Float32).buffer("B", &[n], DType::Float32).output("C", &[n], DType::Float32);
    b.block("B").spatial(n).read("A", [v(0)]).write("B", [v(0)]).body(Value::load(0) + Value::float(1.0)).finish();
    b.block("C").spatial(n).read("B", [v(0)]).write("C", [v(0)]).body(Value::load(0) * Value::float(2.0)).finish();
    b.build()
}

/// Row sum `B[i] += A[i, k]`.
pub fn row_sum(n: i64, k: i64) -> Program {
    let mut b = ProgramBuilder::new();
    b.buffer("A", &[n, k], DType::Float32).output("B", &[n], DType::Float32);
    b.block("B")
        .spatial(n)
        .reduce(k)
        .read("A", [v(0), v(1)])
        .write("B", [v(0)])
        .body(Value::load(0))
        .combine(ReduceOp::Add, Value::float(0.0))
        .finish();
    b.build()
}

pub fn block(sch: &Schedule, name: &str) -> BlockRef {
    sch.get_block(name).unwrap()
}

pub fn loops(sch: &Schedule, name: &str) -> Vec<LoopRef> {
    sch.get_loops(block(sch, name)).unwrap()
}

pub fn extents(sch: &Schedule, loops: &[LoopRef]) -> Vec<i64> {
    loops.iter().map(|l| sch.for_loop(*l).unwrap().extent).collect()
}
