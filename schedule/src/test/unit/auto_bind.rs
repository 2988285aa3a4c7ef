use vesta_ir::{AnnValue, Schedule};

use crate::attr;
use crate::config::Target;
use crate::error::RuleError;
use crate::rule::ScheduleRule;
use crate::rules::AutoBind;
use crate::test::helpers::*;

fn auto_bind() -> AutoBind {
    init(AutoBind::builder().build().unwrap(), Target::cuda())
}

#[test]
fn unbound_block_gets_block_and_thread_indices() {
    let mut rule = auto_bind();
    let sch = Schedule::new(elementwise_chain(8192));
    let out = rule.apply(&sch, block(&sch, "B"));
    assert_eq!(out.len(), 1);

    let cand = &out[0];
    assert_eq!(thread_tags(cand, "B"), vec!["blockIdx.x", "threadIdx.x"]);
    let ext = extents(cand, &loops(cand, "B"));
    assert_eq!(ext.iter().product::<i64>(), 8192);
    assert!(ext[0] <= 256 && ext[1] <= 1024);

    assert!(rule.apply(cand, block(cand, "B")).is_empty());
}

#[test]
fn too_many_thread_blocks_keep_a_serial_outer_loop() {
    let mut rule = init(AutoBind::builder().thread_extents(vec![1024]).build().unwrap(), Target::cuda());
    let sch = Schedule::new(elementwise_chain(1 << 20));
    let cand = rule.apply(&sch, block(&sch, "B")).remove(0);

    assert_eq!(extents(&cand, &loops(&cand, "B")), vec![4, 256, 1024]);
    assert_eq!(thread_tags(&cand, "B"), vec!["blockIdx.x", "threadIdx.x"]);
}

#[test]
fn prime_extent_binds_configured_threads_under_a_guard() {
    let mut rule = auto_bind();
    for round in 0..8 {
        let sch = Schedule::new(elementwise_chain(1031));
        let cand = rule.apply(&sch, block(&sch, "B")).remove(0);
        assert_eq!(thread_tags(&cand, "B"), vec!["blockIdx.x", "threadIdx.x"], "round {round}");

        let [blocks, threads] = extents(&cand, &loops(&cand, "B"))[..] else { panic!("expected two loops") };
        assert!([32, 64, 128, 256, 512, 1024].contains(&threads));
        assert_eq!(blocks, (1031 + threads - 1) / threads);
        let blk = cand.block(block(&cand, "B")).unwrap();
        assert_eq!(blk.predicates.len(), 1);
        assert_eq!(blk.predicates[0].bound, 1031);
    }
}

#[test]
fn launch_limit_caps_thread_blocks_for_odd_multiples() {
    let mut rule = init(AutoBind::builder().thread_extents(vec![32]).build().unwrap(), Target::cuda());
    let sch = Schedule::new(elementwise_chain(32 * 257));
    let cand = rule.apply(&sch, block(&sch, "B")).remove(0);

    assert_eq!(extents(&cand, &loops(&cand, "B")), vec![2, 256, 32]);
    assert_eq!(thread_tags(&cand, "B"), vec!["blockIdx.x", "threadIdx.x"]);
    assert!(cand.block(block(&cand, "B")).unwrap().is_guarded());
}

#[test]
fn short_loop_takes_the_smallest_thread_extent() {
    let mut rule = auto_bind();
    let sch = Schedule::new(elementwise_chain(20));
    let cand = rule.apply(&sch, block(&sch, "B")).remove(0);
    assert_eq!(extents(&cand, &loops(&cand, "B")), vec![1, 32]);
    assert!(cand.block(block(&cand, "B")).unwrap().is_guarded());
}

#[test]
fn bound_threads_only_need_block_index() {
    let mut sch = Schedule::new(elementwise_chain(4096));
    let l = loops(&sch, "B")[0];
    let pieces = sch.split(l, &[128, 32]).unwrap();
    sch.bind(pieces[1], "threadIdx.x").unwrap();

    let mut rule = auto_bind();
    let cand = rule.apply(&sch, block(&sch, "B")).remove(0);
    assert_eq!(thread_tags(&cand, "B"), vec!["blockIdx.x", "threadIdx.x"]);
    assert_eq!(extents(&cand, &loops(&cand, "B")), vec![128, 32]);
}

#[test]
fn root_and_tiled_blocks_are_skipped() {
    let mut rule = auto_bind();
    let sch = Schedule::new(elementwise_chain(1024));
    assert!(rule.apply(&sch, sch.root()).is_empty());

    let mut tiled = sch.clone();
    let b = block(&tiled, "B");
    tiled.annotate_block(b, attr::TILING_STRUCTURE, AnnValue::from("S")).unwrap();
    assert!(rule.apply(&tiled, b).is_empty());
}

#[test]
fn invalid_limits_are_rejected() {
    assert!(matches!(
        AutoBind::builder().thread_extents(vec![32, -1]).build(),
        Err(RuleError::InvalidThreadExtents { .. })
    ));
    assert!(matches!(AutoBind::builder().max_threadblocks(0).build(), Err(RuleError::InvalidThreadExtents { .. })));
}
