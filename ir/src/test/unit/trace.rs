use rand::SeedableRng;
use rand::rngs::StdRng;
use vesta_dtype::DType;

use crate::test::helpers::*;
use crate::{Instruction, Schedule};

fn scheduled_matmul() -> Schedule {
    let mut sch = Schedule::new(matmul(64, 64, 64, DType::Float32, DType::Float32));
    let mut rng = StdRng::seed_from_u64(42);
    let c = block(&sch, "C");
    let [i, j, _] = loops(&sch, "C")[..] else { panic!("expected three loops") };
    let tiles = sch.sample_perfect_tile(i, 2, 16, &mut rng).unwrap();
    let [io, _] = sch.split(i, &tiles).unwrap()[..] else { panic!("expected two loops") };
    sch.parallel(io).unwrap();
    let copy = sch.cache_read(c, 0, "shared").unwrap();
    sch.compute_at(copy, j).unwrap();
    sch.annotate_block(c, "meta_schedule.auto_tensorize", "none").unwrap();
    sch
}

#[test]
fn replay_reproduces_schedule() {
    let sch = scheduled_matmul();
    let replayed = sch.replay().unwrap();
    assert_eq!(replayed, sch);
    assert_eq!(replayed.program().to_string(), sch.program().to_string());
}

#[test]
fn trace_records_every_primitive() {
    let sch = scheduled_matmul();
    let insts = sch.trace().instructions();
    assert_eq!(insts.len(), 6);
    assert!(matches!(insts[0], Instruction::SamplePerfectTile { n: 2, max_innermost_factor: 16, .. }));
    assert!(matches!(insts[1], Instruction::Split { .. }));
    assert!(matches!(insts[4], Instruction::ComputeAt { .. }));
}

#[test]
fn trace_displays_as_script() {
    let text = scheduled_matmul().trace().to_string();
    assert!(text.contains("= split("));
    assert!(text.contains("cache_read("));
    assert!(text.contains("\"shared\""));
    assert_eq!(text.lines().count(), 6);
}

#[test]
fn clones_branch_independently() {
    let base = Schedule::new(elementwise_chain(32));
    let mut branch = base.clone();
    branch.compute_inline(block(&branch, "B")).unwrap();
    assert!(base.get_block("B").is_ok());
    assert!(branch.get_block("B").is_err());
    assert!(base.trace().is_empty());
}
