use vesta_ir::Schedule;

use crate::attr;
use crate::rule::ScheduleRule;
use crate::rules::{AddRFactor, RandomComputeLocation};
use crate::test::helpers::*;

#[test]
fn producer_with_consumer_is_relocated() {
    let mut rule = init(RandomComputeLocation::new(), llvm(4));
    let sch = Schedule::new(elementwise_chain(64));
    let out = rule.apply(&sch, block(&sch, "B"));
    assert_eq!(out.len(), 1);
    assert!(out[0].get_block("B").is_ok());
}

#[test]
fn output_block_stays_put() {
    let mut rule = init(RandomComputeLocation::new(), llvm(4));
    let sch = Schedule::new(elementwise_chain(64));
    assert!(rule.apply(&sch, block(&sch, "C")).is_empty());
    assert!(rule.apply(&sch, sch.root()).is_empty());
}

#[test]
fn rfactor_producer_mark_is_consumed() {
    let mut rfactor = init(AddRFactor::builder().max_innermost_factor(64).build().unwrap(), llvm(4));
    let sch = Schedule::new(row_sum(4, 1024));
    let factored = rfactor.apply(&sch, block(&sch, "B")).remove(0);
    let b = block(&factored, "B");
    assert!(factored.block(b).unwrap().annotation(attr::RANDOM_COMPUTE_PRODUCER).is_some());

    let mut rule = init(RandomComputeLocation::new(), llvm(4));
    let out = rule.apply(&factored, b);
    assert_eq!(out.len(), 1);
    let cand = &out[0];
    assert!(cand.block(block(cand, "B")).unwrap().annotation(attr::RANDOM_COMPUTE_PRODUCER).is_none());
}

#[test]
fn rfactor_block_moves_before_its_producer() {
    let mut rfactor = init(AddRFactor::builder().max_innermost_factor(64).build().unwrap(), llvm(4));
    let sch = Schedule::new(row_sum_scaled(4, 1024));
    let factored = rfactor.apply(&sch, block(&sch, "B")).remove(0);
    let rf_name = factored
        .program()
        .all_blocks()
        .into_iter()
        .map(|b| factored.block(b).unwrap().name.clone())
        .find(|n| n.starts_with("B_rf"))
        .unwrap();

    let mut both_moved = false;
    for seed in 0..32 {
        let mut rule = RandomComputeLocation::new();
        rule.initialize_with_tune_context(&context(llvm(4), seed));
        let cand = rule.apply(&factored, block(&factored, "B")).remove(0);

        let consumer_loop = loops(&cand, "D")[0];
        let block_moved = loops(&cand, "B").first() == Some(&consumer_loop);
        let producer_moved = loops(&cand, &rf_name).first() == Some(&consumer_loop);
        // The producer can only reach the consumer's nest by following the block there.
        assert!(!producer_moved || block_moved, "seed {seed}");
        both_moved |= block_moved && producer_moved;
    }
    assert!(both_moved);
}
