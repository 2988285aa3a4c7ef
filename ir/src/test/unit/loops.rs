use test_case::test_case;
use vesta_dtype::DType;

use crate::test::helpers::*;
use crate::{Error, ForKind, Schedule};

fn matmul_schedule() -> Schedule {
    Schedule::new(matmul(128, 128, 128, DType::Float32, DType::Float32))
}

#[test]
fn split_rebinds_iterator() {
    let mut sch = matmul_schedule();
    let [i, _, _] = loops(&sch, "C")[..] else { panic!("expected three loops") };
    let parts = sch.split(i, &[4, 32]).unwrap();

    assert_eq!(extents(&sch, &parts), vec![4, 32]);
    assert_eq!(loops(&sch, "C").len(), 4);
    let blk = sch.block(block(&sch, "C")).unwrap();
    let value = blk.bindings[0].eval(&|l| if *l == parts[0] { 1 } else if *l == parts[1] { 3 } else { 0 });
    assert_eq!(value, 35);
}

#[test_case(&[3, 40]; "product mismatch")]
#[test_case(&[0, 128]; "zero factor")]
#[test_case(&[]; "empty")]
fn split_rejects_bad_factors(factors: &[i64]) {
    let mut sch = matmul_schedule();
    let i = loops(&sch, "C")[0];
    assert!(matches!(sch.split(i, factors), Err(Error::SplitFactorMismatch { .. })));
    assert!(sch.trace().is_empty());
}

#[test]
fn split_invalidates_old_handle() {
    let mut sch = matmul_schedule();
    let i = loops(&sch, "C")[0];
    sch.split(i, &[2, 64]).unwrap();
    assert!(!sch.contains(i.id()));
    assert!(matches!(sch.split(i, &[2, 64]), Err(Error::StaleHandle { .. })));
}

#[test]
fn fuse_rebinds_iterators() {
    let mut sch = matmul_schedule();
    let ls = loops(&sch, "C");
    let fused = sch.fuse(&ls[..2]).unwrap();

    assert_eq!(sch.for_loop(fused).unwrap().extent, 128 * 128);
    let blk = sch.block(block(&sch, "C")).unwrap();
    let env = |l: &crate::LoopRef| if *l == fused { 130 } else { 0 };
    assert_eq!(blk.bindings[0].eval(&env), 1);
    assert_eq!(blk.bindings[1].eval(&env), 2);
}

#[test]
fn fuse_requires_chain() {
    let mut sch = matmul_schedule();
    let ls = loops(&sch, "C");
    assert!(matches!(sch.fuse(&[ls[0], ls[2]]), Err(Error::NotAChain { .. })));
}

#[test]
fn reorder_permutes_listed_loops() {
    let mut sch = matmul_schedule();
    let ls = loops(&sch, "C");
    sch.reorder(&[ls[2], ls[0]]).unwrap();
    assert_eq!(loops(&sch, "C"), vec![ls[2], ls[1], ls[0]]);
}

#[test]
fn loop_kind_set_once() {
    let mut sch = matmul_schedule();
    let i = loops(&sch, "C")[0];
    sch.parallel(i).unwrap();
    assert_eq!(sch.for_loop(i).unwrap().kind, ForKind::Parallel);
    assert!(matches!(sch.vectorize(i), Err(Error::LoopKindConflict { .. })));
}

#[test]
fn annotations_on_blocks_and_loops() {
    let mut sch = matmul_schedule();
    let c = block(&sch, "C");
    let i = loops(&sch, "C")[0];
    sch.annotate_block(c, "meta_schedule.tiling_structure", "SSRSRS").unwrap();
    sch.annotate_loop(i, "pragma_auto_unroll_max_step", 16_i64).unwrap();

    let blk = sch.block(c).unwrap();
    assert_eq!(blk.annotation("meta_schedule.tiling_structure").and_then(|a| a.as_str()), Some("SSRSRS"));
    assert_eq!(sch.for_loop(i).unwrap().annotations["pragma_auto_unroll_max_step"].as_int(), Some(16));

    sch.unannotate_block(c, "meta_schedule.tiling_structure").unwrap();
    assert!(sch.block(c).unwrap().annotations.is_empty());
}

#[test]
fn guarded_split_rounds_up_and_predicates() {
    let mut sch = Schedule::new(elementwise_chain(1031));
    let i = loops(&sch, "C")[0];
    let parts = sch.split_guarded(i, &[32]).unwrap();
    assert_eq!(extents(&sch, &parts), vec![33, 32]);

    let blk = sch.block(block(&sch, "C")).unwrap();
    let [pred] = blk.predicates.as_slice() else { panic!("expected one predicate") };
    assert_eq!(pred.bound, 1031);
    let p0 = parts[0];
    let at = move |o: i64, t: i64| move |l: &crate::LoopRef| if *l == p0 { o } else { t };
    assert!(pred.holds(&at(32, 6)));
    assert!(!pred.holds(&at(32, 7)));
    assert_eq!(blk.bindings[0].eval(&at(2, 5)), 69);
    assert!(sch.program().to_string().contains("where"));
    assert!(!sch.block(block(&sch, "B")).unwrap().is_guarded());
}

#[test]
fn guarded_split_of_divisible_extent_adds_no_predicate() {
    let mut sch = matmul_schedule();
    let i = loops(&sch, "C")[0];
    let parts = sch.split_guarded(i, &[4, 8]).unwrap();
    assert_eq!(extents(&sch, &parts), vec![4, 4, 8]);
    assert!(!sch.block(block(&sch, "C")).unwrap().is_guarded());
}

#[test]
fn guarded_split_follows_later_splits() {
    let mut sch = Schedule::new(elementwise_chain(100));
    let i = loops(&sch, "C")[0];
    let [outer, inner] = sch.split_guarded(i, &[8]).unwrap()[..] else { panic!("expected two loops") };
    let [a, b] = sch.split(outer, &[13, 1]).unwrap()[..] else { panic!("expected two loops") };

    let blk = sch.block(block(&sch, "C")).unwrap();
    let env = |l: &crate::LoopRef| if *l == a { 12 } else if *l == inner { 4 } else { 0 };
    assert_eq!(sch.for_loop(b).unwrap().extent, 1);
    assert!(!blk.predicates[0].holds(&env));
    assert_eq!(blk.predicates[0].expr.eval(&env), blk.bindings[0].eval(&env));
}

#[test]
fn guarded_blocks_cannot_move_or_anchor() {
    let mut sch = Schedule::new(elementwise_chain(1031));
    let b = block(&sch, "B");
    let i = loops(&sch, "C")[0];
    let [_, t] = sch.split_guarded(i, &[32]).unwrap()[..] else { panic!("expected two loops") };
    assert!(matches!(sch.compute_at(b, t), Err(Error::GuardedBlock { .. })));

    let c = block(&sch, "C");
    let j = loops(&sch, "B")[0];
    assert!(matches!(sch.reverse_compute_at(c, j), Err(Error::GuardedBlock { .. })));
}

#[test]
fn guarded_split_replays() {
    let mut sch = Schedule::new(elementwise_chain(1031));
    let i = loops(&sch, "C")[0];
    sch.split_guarded(i, &[4, 32]).unwrap();
    assert!(sch.trace().to_string().contains("factors=[None, 4, 32]"));
    assert_eq!(sch.replay().unwrap(), sch);
}
