use test_case::test_case;
use vesta_ir::{AnnValue, Schedule};

use crate::attr;
use crate::config::Target;
use crate::error::RuleError;
use crate::rule::ScheduleRule;
use crate::rules::{AddRFactor, CrossThreadReduction};
use crate::test::helpers::*;

fn rfactor(max_jobs_per_core: i64) -> AddRFactor {
    init(AddRFactor::builder().max_jobs_per_core(max_jobs_per_core).max_innermost_factor(64).build().unwrap(), llvm(4))
}

#[test]
fn long_reduction_is_factored() {
    let mut rule = rfactor(16);
    let sch = Schedule::new(row_sum(4, 1024));
    let out = rule.apply(&sch, block(&sch, "B"));
    assert!((2..=3).contains(&out.len()), "got {} candidates", out.len());

    let (unchanged, factored) = out.split_last().unwrap();
    assert_eq!(*unchanged, sch);
    for cand in factored {
        assert_eq!(cand.program().all_blocks().len(), 2);
        let blk = cand.block(block(cand, "B")).unwrap();
        assert_eq!(blk.annotation(attr::RANDOM_COMPUTE_PRODUCER), Some(&AnnValue::from(1)));
    }
}

#[test]
fn parallel_enough_matmul_is_left_alone() {
    let mut rule = rfactor(16);
    let sch = Schedule::new(matmul_f32(512));
    assert!(rule.apply(&sch, block(&sch, "C")).is_empty());
}

#[test]
fn disabled_rfactor_declines() {
    let mut rule = rfactor(-1);
    let sch = Schedule::new(row_sum(4, 1024));
    assert!(rule.apply(&sch, block(&sch, "B")).is_empty());
}

#[test]
fn rfactor_rejects_bad_innermost_factor() {
    assert_eq!(
        AddRFactor::builder().max_innermost_factor(0).build().err(),
        Some(RuleError::InvalidInnermostFactor { value: 0 })
    );
}

#[test_case(vec![32, 64], 2; "both divide")]
#[test_case(vec![32, 50], 1; "one divides")]
#[test_case(vec![48], 0; "none divide")]
fn cross_thread_candidates_per_divisor(extents: Vec<i64>, expected: usize) {
    let mut rule = init(CrossThreadReduction::builder().thread_extents(extents).build().unwrap(), Target::cuda());
    let sch = Schedule::new(row_sum(4, 128));
    let out = rule.apply(&sch, block(&sch, "B"));
    assert_eq!(out.len(), expected);
    for cand in &out {
        assert_eq!(thread_tags(cand, "B"), vec!["threadIdx.x"]);
    }
}

#[test]
fn cross_thread_skips_bound_blocks() {
    let mut rule = init(CrossThreadReduction::builder().thread_extents(vec![32]).build().unwrap(), Target::cuda());
    let sch = Schedule::new(row_sum(4, 128));
    let bound = rule.apply(&sch, block(&sch, "B")).remove(0);
    assert!(rule.apply(&bound, block(&bound, "B")).is_empty());
}

#[test]
fn cross_thread_needs_gpu_target() {
    let mut rule = init(CrossThreadReduction::builder().thread_extents(vec![32]).build().unwrap(), llvm(4));
    let sch = Schedule::new(row_sum(4, 128));
    assert!(rule.apply(&sch, block(&sch, "B")).is_empty());
}

#[test_case(vec![]; "empty")]
#[test_case(vec![32, 0]; "zero")]
fn cross_thread_rejects_bad_extents(extents: Vec<i64>) {
    assert!(matches!(
        CrossThreadReduction::builder().thread_extents(extents).build(),
        Err(RuleError::InvalidThreadExtents { .. })
    ));
}
