use test_case::test_case;
use vesta_ir::{AnnValue, Schedule};

use crate::attr;
use crate::rule::ScheduleRule;
use crate::rules::ParallelizeVectorizeUnroll;
use crate::test::helpers::*;

fn cpu_rule(unroll_explicit: bool) -> ParallelizeVectorizeUnroll {
    init(
        ParallelizeVectorizeUnroll::builder()
            .max_jobs_per_core(16)
            .max_vectorize_extent(64)
            .unroll_max_steps(vec![0, 16, 64, 512])
            .unroll_explicit(unroll_explicit)
            .build(),
        llvm(4),
    )
}

#[test_case(true, attr::UNROLL_EXPLICIT; "explicit")]
#[test_case(false, attr::UNROLL_IMPLICIT; "implicit")]
fn root_gets_one_candidate_per_unroll_step(explicit: bool, key: &str) {
    let mut rule = cpu_rule(explicit);
    let sch = Schedule::new(matmul_f32(64));
    let out = rule.apply(&sch, sch.root());
    assert_eq!(out.len(), 4);

    let mut steps = Vec::new();
    for cand in &out {
        let root = cand.block(cand.root()).unwrap();
        assert_eq!(root.annotation(attr::PARALLEL), Some(&AnnValue::from(64)));
        assert_eq!(root.annotation(attr::VECTORIZE), Some(&AnnValue::from(64)));
        steps.push(root.annotation(key).and_then(AnnValue::as_int).unwrap());
    }
    assert_eq!(steps, vec![0, 16, 64, 512]);
}

#[test]
fn spatial_program_is_not_unrolled() {
    let mut rule = cpu_rule(true);
    let sch = Schedule::new(elementwise_chain(1024));
    let out = rule.apply(&sch, sch.root());
    assert_eq!(out.len(), 1);
    let root = out[0].block(out[0].root()).unwrap();
    assert!(root.annotation(attr::UNROLL_EXPLICIT).is_none());
    assert!(root.annotation(attr::PARALLEL).is_some());
}

#[test]
fn disabled_hints_are_omitted() {
    let mut rule = init(
        ParallelizeVectorizeUnroll::builder().max_jobs_per_core(-1).max_vectorize_extent(-1).build(),
        llvm(4),
    );
    let sch = Schedule::new(matmul_f32(64));
    let out = rule.apply(&sch, sch.root());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0], sch);
}

#[test]
fn inner_blocks_are_skipped() {
    let mut rule = cpu_rule(true);
    let sch = Schedule::new(matmul_f32(64));
    assert!(rule.apply(&sch, block(&sch, "C")).is_empty());
}
