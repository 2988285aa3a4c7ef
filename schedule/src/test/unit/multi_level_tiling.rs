use std::sync::Arc;

use vesta_ir::{AnnValue, Schedule};

use crate::attr;
use crate::config::Target;
use crate::error::RuleError;
use crate::rule::ScheduleRule;
use crate::rules::{BlockFilter, MultiLevelTiling, MultiLevelTilingWideVector};
use crate::structure::ReuseConfig;
use crate::test::helpers::*;

fn plain(structure: &str) -> MultiLevelTiling {
    init(MultiLevelTiling::builder().structure(structure).max_innermost_factor(64).build().unwrap(), llvm(4))
}

#[test]
fn ssrsrs_builds_ten_loop_nest() {
    let mut rule = plain("space,space,reduce,space,reduce,space");
    let sch = Schedule::new(matmul(64, 128, 256, vesta_dtype::DType::Float32, vesta_dtype::DType::Float32));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 1);

    let cand = &out[0];
    let ls = loops(cand, "C");
    let ext = extents(cand, &ls);
    assert_eq!(ext.len(), 10);
    // Level order: S(i0 j0) S(i1 j1) R(k0) S(i2 j2) R(k1) S(i3 j3).
    assert_eq!(ext[0] * ext[2] * ext[5] * ext[8], 64);
    assert_eq!(ext[1] * ext[3] * ext[6] * ext[9], 128);
    assert_eq!(ext[4] * ext[7], 256);
    assert!(ext[8] <= 64 && ext[9] <= 64 && ext[7] <= 64);

    let blk = cand.block(block(cand, "C")).unwrap();
    assert_eq!(blk.annotation(attr::TILING_STRUCTURE), Some(&AnnValue::from("SSRSRS")));
}

#[test]
fn tiled_block_is_not_tiled_again() {
    let mut rule = plain("SSRSRS");
    let sch = Schedule::new(matmul_f32(64));
    let tiled = rule.apply(&sch, block(&sch, "C")).remove(0);
    assert!(rule.apply(&tiled, block(&tiled, "C")).is_empty());
}

#[test]
fn element_wise_block_is_skipped() {
    let mut rule = plain("SSRSRS");
    let sch = Schedule::new(matmul_relu(64));
    assert!(rule.apply(&sch, block(&sch, "D")).is_empty());
    assert_eq!(rule.apply(&sch, block(&sch, "C")).len(), 1);
}

#[test]
fn optional_write_reuse_keeps_uncached_candidate() {
    let mut rule = init(
        MultiLevelTiling::builder()
            .structure("SSRSRS")
            .max_innermost_factor(64)
            .reuse_write(ReuseConfig::may(&[1, 2], "global"))
            .build()
            .unwrap(),
        llvm(4),
    );
    let sch = Schedule::new(matmul_f32(64));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].program().all_blocks().len(), 1);
    for cand in &out[1..] {
        assert_eq!(cand.program().all_blocks().len(), 2);
        assert_eq!(cand.program().outputs(), vec!["C"]);
    }
}

#[test]
fn gpu_tiling_binds_levels_and_marks_thread_extents() {
    let mut rule = init(
        MultiLevelTiling::builder()
            .structure("SSSRRSRS")
            .tile_binds(vec!["blockIdx.x".into(), "vthread.x".into(), "threadIdx.x".into()])
            .max_innermost_factor(64)
            .build()
            .unwrap(),
        Target::cuda(),
    );
    let sch = Schedule::new(matmul_f32(128));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 1);

    let cand = &out[0];
    assert_eq!(thread_tags(cand, "C"), vec!["blockIdx.x", "vthread.x", "threadIdx.x"]);
    let blk = cand.block(block(cand, "C")).unwrap();
    assert_eq!(blk.annotation(attr::THREAD_EXTENT_LOW_INCLUSIVE), Some(&AnnValue::from(32)));
    assert_eq!(blk.annotation(attr::THREAD_EXTENT_HIGH_INCLUSIVE), Some(&AnnValue::from(1024)));
}

#[test]
fn filter_overrides_applicability() {
    let filter: BlockFilter = Arc::new(|sch: &Schedule, b: vesta_ir::BlockRef| sch.block(b).is_ok_and(|blk| blk.name == "C"));
    let mut rule = init(
        MultiLevelTiling::builder().structure("SSRSRS").filter_fn(filter).build().unwrap(),
        llvm(4),
    );
    let sch = Schedule::new(matmul_relu(64));
    assert_eq!(rule.apply(&sch, block(&sch, "C")).len(), 1);
    assert!(rule.apply(&sch, block(&sch, "D")).is_empty());
    assert!(rule.to_string().contains("filter_fn"));
}

#[test]
fn invalid_configurations_are_rejected() {
    let build = |structure: &str, read: ReuseConfig, write: ReuseConfig, innermost: i64| {
        MultiLevelTiling::builder()
            .structure(structure)
            .max_innermost_factor(innermost)
            .reuse_read(read)
            .reuse_write(write)
            .build()
    };
    assert!(matches!(
        build("SSQ", ReuseConfig::none(), ReuseConfig::none(), -1),
        Err(RuleError::UnknownToken { .. })
    ));
    assert!(matches!(
        build("SSRSRS", ReuseConfig::must(&[7], "shared"), ReuseConfig::none(), -1),
        Err(RuleError::ReuseLevelOutOfRange { level: 7, .. })
    ));
    assert_eq!(
        build("SSRSRS", ReuseConfig::may(&[1], "shared"), ReuseConfig::none(), -1).err(),
        Some(RuleError::OptionalReadReuse)
    );
    assert_eq!(
        build("SSRSRS", ReuseConfig::none(), ReuseConfig::none(), 0).err(),
        Some(RuleError::InvalidInnermostFactor { value: 0 })
    );
    assert!(matches!(
        MultiLevelTiling::builder()
            .structure("SR")
            .tile_binds(vec!["blockIdx.x".into(), "vthread.x".into(), "threadIdx.x".into()])
            .build(),
        Err(RuleError::InvalidStructure { .. })
    ));
}

#[test]
fn wide_vector_fills_one_register() {
    let mut rule = init(
        MultiLevelTilingWideVector::builder()
            .structure("SRSRS")
            .vector_length_in_bits(1024)
            .max_innermost_factor(128)
            .build()
            .unwrap(),
        Target::hexagon(),
    );
    let sch = Schedule::new(matmul_f32(128));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 1);

    let cand = &out[0];
    let ls = loops(cand, "C");
    let innermost = *ls.last().unwrap();
    let lp = cand.for_loop(innermost).unwrap();
    assert_eq!(lp.extent, 1024 / 32);
    assert_eq!(lp.kind, vesta_ir::ForKind::Vectorized);
}

#[test]
fn wide_vector_requires_positive_length() {
    let built = MultiLevelTilingWideVector::builder().structure("SRSRS").vector_length_in_bits(0).build();
    assert!(matches!(built, Err(RuleError::InvalidStructure { .. })));
}

#[test]
fn read_reuse_stages_every_input_in_the_cache_scope() {
    let mut rule = init(
        MultiLevelTiling::builder()
            .structure("SSRSRS")
            .max_innermost_factor(64)
            .reuse_read(ReuseConfig::must(&[3], "shared"))
            .build()
            .unwrap(),
        llvm(4),
    );
    let sch = Schedule::new(matmul_f32(64));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 1);

    let cand = &out[0];
    let program = cand.program();
    assert_eq!(program.all_blocks().len(), 3);
    let c = cand.block(block(cand, "C")).unwrap();
    for read in &c.reads {
        assert_eq!(program.buffer(&read.buffer).unwrap().scope, "shared");
    }
    let fetches = program.all_blocks().into_iter().filter(|b| cand.block(*b).unwrap().annotation(attr::COOPERATIVE_FETCH).is_some());
    assert_eq!(fetches.count(), 0);
    assert_eq!(program.outputs(), vec!["C"]);
}

#[test]
fn vector_load_lengths_fan_out_cooperative_fetches() {
    let mut rule = init(
        MultiLevelTiling::builder()
            .structure("SSSRRSRS")
            .tile_binds(vec!["blockIdx.x".into(), "vthread.x".into(), "threadIdx.x".into()])
            .max_innermost_factor(64)
            .vector_load_lens(vec![1, 2, 4])
            .reuse_read(ReuseConfig::must(&[4], "shared"))
            .build()
            .unwrap(),
        Target::cuda(),
    );
    let sch = Schedule::new(matmul_f32(128));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 3);

    let mut lens = Vec::new();
    for cand in &out {
        let fetch: Vec<i64> = cand
            .program()
            .all_blocks()
            .into_iter()
            .filter_map(|b| cand.block(b).unwrap().annotation(attr::COOPERATIVE_FETCH)?.as_int())
            .collect();
        let [a, b] = fetch[..] else { panic!("expected one fetch per input, got {fetch:?}") };
        assert_eq!(a, b);
        lens.push(a);
    }
    assert_eq!(lens, vec![1, 2, 4]);
}
