use crate::test::helpers::*;
use crate::{BinaryOp, Error, Schedule, Value};

#[test]
fn compute_inline_substitutes_body() {
    let mut sch = Schedule::new(elementwise_chain(64));
    let b = block(&sch, "B");
    sch.compute_inline(b).unwrap();

    let c = sch.block(block(&sch, "C")).unwrap();
    assert_eq!(c.reads.len(), 1);
    assert_eq!(c.reads[0].buffer, "A");
    let expected = Value::binary(BinaryOp::Mul, Value::load(0) + Value::float(1.0), Value::float(2.0));
    assert_eq!(c.body, Some(expected));
    assert!(sch.program().buffer("B").is_err());
    assert!(matches!(sch.get_block("B"), Err(Error::BlockNotFound { .. })));
}

#[test]
fn reverse_compute_inline_folds_consumer() {
    let mut sch = Schedule::new(elementwise_chain(64));
    let c = block(&sch, "C");
    sch.reverse_compute_inline(c).unwrap();

    let b = sch.block(block(&sch, "B")).unwrap();
    assert_eq!(b.writes[0].buffer, "C");
    assert_eq!(b.body, Some((Value::load(0) + Value::float(1.0)) * Value::float(2.0)));
    assert!(sch.program().buffer("B").is_err());
    assert_eq!(sch.program().all_blocks().len(), 1);
}

#[test]
fn output_writer_is_not_inlined() {
    let mut sch = Schedule::new(elementwise_chain(64));
    let c = block(&sch, "C");
    assert!(matches!(sch.compute_inline(c), Err(Error::InlineRejected { .. })));
}

#[test]
fn reduction_is_not_inlined() {
    let mut sch = Schedule::new(matmul_relu(32));
    let c = block(&sch, "C");
    assert!(matches!(sch.compute_inline(c), Err(Error::InlineRejected { .. })));
}

#[test]
fn consumer_of_reduction_is_not_reverse_inlined() {
    let mut sch = Schedule::new(matmul_relu(32));
    let d = block(&sch, "D");
    assert!(matches!(sch.reverse_compute_inline(d), Err(Error::InlineRejected { .. })));
}
