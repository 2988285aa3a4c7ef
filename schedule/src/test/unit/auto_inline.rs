use test_case::test_case;
use vesta_dtype::DType;
use vesta_ir::{AnnValue, ProgramBuilder, Schedule, Value, v};

use crate::attr;
use crate::rule::ScheduleRule;
use crate::rules::{AutoInline, InlineConstantScalars, InlineType};
use crate::test::helpers::*;

fn consumer_only() -> AutoInline {
    init(AutoInline::builder().build(), llvm(4))
}

#[test]
fn elementwise_producer_goes_into_consumer() {
    let mut rule = consumer_only();
    let sch = Schedule::new(elementwise_chain(64));
    let b = block(&sch, "B");
    assert_eq!(rule.check_inline(&sch, b), InlineType::IntoConsumer);

    let out = rule.apply(&sch, b);
    assert_eq!(out.len(), 1);
    assert!(out[0].get_block("B").is_err());
    assert_eq!(out[0].program().outputs(), vec!["C"]);
}

#[test]
fn output_block_without_consumers_stays() {
    let mut rule = consumer_only();
    let sch = Schedule::new(elementwise_chain(64));
    let c = block(&sch, "C");
    assert_eq!(rule.check_inline(&sch, c), InlineType::No);
    assert!(rule.apply(&sch, c).is_empty());
    assert!(rule.apply(&sch, sch.root()).is_empty());
}

#[test]
fn consumer_goes_into_single_producer() {
    let mut rule = init(AutoInline::builder().into_producer(true).into_consumer(false).build(), llvm(4));
    let sch = Schedule::new(elementwise_chain(64));
    let c = block(&sch, "C");
    assert_eq!(rule.check_inline(&sch, c), InlineType::IntoProducer);
    assert_eq!(rule.apply(&sch, c).len(), 1);
}

#[test_case(true, InlineType::IntoConsumer; "enabled")]
#[test_case(false, InlineType::IntoConsumer; "falls back to the consumer check")]
fn constant_tensor_is_inlined(inline_const_tensor: bool, expected: InlineType) {
    let rule = init(AutoInline::builder().inline_const_tensor(inline_const_tensor).build(), llvm(4));
    let sch = Schedule::new(const_tensor(32));
    assert_eq!(rule.check_inline(&sch, block(&sch, "T")), expected);
}

#[test]
fn inline_can_be_disabled_per_block() {
    let mut b = ProgramBuilder::new();
    b.buffer("A", &[16], DType::Float32).buffer("B", &[16], DType::Float32).output("C", &[16], DType::Float32);
    b.block("B")
        .spatial(16)
        .read("A", [v(0)])
        .write("B", [v(0)])
        .body(Value::load(0) + Value::float(1.0))
        .annotate(attr::INLINE_RULE, AnnValue::from("disable"))
        .finish();
    b.block("C").spatial(16).read("B", [v(0)]).write("C", [v(0)]).body(Value::load(0)).finish();
    let sch = Schedule::new(b.build());

    let mut rule = consumer_only();
    assert!(rule.apply(&sch, block(&sch, "B")).is_empty());
}

#[test]
fn disallowed_operator_blocks_inlining() {
    let sch = Schedule::new(exp_matmul(32));
    let e = block(&sch, "E");

    let plain = consumer_only();
    assert_eq!(plain.check_inline(&sch, e), InlineType::IntoConsumer);

    let mut strict = init(AutoInline::builder().disallow_op(vec!["tir.exp".into()]).build(), llvm(4));
    assert_eq!(strict.check_inline(&sch, e), InlineType::No);
    assert!(strict.apply(&sch, e).is_empty());
}

#[test]
fn constant_scalar_is_folded() {
    let mut rule = init(InlineConstantScalars::new(), llvm(4));
    let sch = Schedule::new(const_scalar(32));

    let out = rule.apply(&sch, block(&sch, "S"));
    assert_eq!(out.len(), 1);
    assert!(out[0].get_block("S").is_err());
    assert!(rule.apply(&sch, block(&sch, "B")).is_empty());
}
