use vesta_dtype::DType;
use vesta_ir::{AnnValue, Schedule, Value};

use crate::attr;
use crate::config::Target;
use crate::default_rules::wmma_intrin_groups;
use crate::error::RuleError;
use crate::rule::ScheduleRule;
use crate::rules::with_intrin::tile_with_tensor_intrin;
use crate::rules::{MultiLevelTilingTensorCore, MultiLevelTilingWithIntrin};
use crate::structure::{IntrinGroup, ReuseConfig};
use crate::test::helpers::*;

fn vnni_rule() -> MultiLevelTilingWithIntrin {
    init(
        MultiLevelTilingWithIntrin::builder()
            .intrin_name("dot_16x4_vnni")
            .structure("SSRSRS")
            .max_innermost_factor(64)
            .build()
            .unwrap(),
        llvm(4),
    )
}

#[test]
fn tensor_intrin_tile_is_blockized() {
    let mut sch = Schedule::new(dense_u8i8(32, 64, 64));
    let c = block(&sch, "C");
    let outer = tile_with_tensor_intrin(&mut sch, c, "dot_16x4_vnni").unwrap().unwrap();

    let blk = sch.block(outer).unwrap();
    assert_eq!(blk.name, "C_o");
    let iter_extents: Vec<i64> = blk.iter_vars.iter().map(|iv| iv.extent).collect();
    assert_eq!(iter_extents, vec![32, 4, 16]);
    assert_eq!(extents(&sch, &loops(&sch, "C_o")), vec![32, 4, 16]);
}

#[test]
fn unmatched_block_is_left_alone() {
    let mut sch = Schedule::new(matmul_f32(64));
    let c = block(&sch, "C");
    assert_eq!(tile_with_tensor_intrin(&mut sch, c, "dot_16x4_vnni").unwrap(), None);
}

#[test]
fn vnni_rule_tensorizes_and_tiles() {
    let mut rule = vnni_rule();
    let sch = Schedule::new(dense_u8i8(32, 64, 64));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 1);

    let cand = &out[0];
    let tensorized: Vec<_> = cand
        .program()
        .all_blocks()
        .into_iter()
        .filter(|b| cand.block(*b).unwrap().annotation(attr::AUTO_TENSORIZE) == Some(&AnnValue::from("dot_16x4_vnni")))
        .collect();
    let [outer] = tensorized.as_slice() else { panic!("expected one tensorized block") };
    let blk = cand.block(*outer).unwrap();
    assert!(matches!(&blk.body, Some(Value::Intrin(name, _)) if name == "dot_16x4_vnni"));
    assert!(blk.annotation(attr::TILING_STRUCTURE).is_some());
}

#[test]
fn vnni_rule_declines_float_matmul() {
    let mut rule = vnni_rule();
    let sch = Schedule::new(matmul_f32(64));
    assert!(rule.apply(&sch, block(&sch, "C")).is_empty());
}

#[test]
fn intrin_rule_requires_compute_intrinsic() {
    let build = |name: &str| MultiLevelTilingWithIntrin::builder().intrin_name(name).structure("SSRSRS").build();
    assert!(matches!(build("no_such_intrin"), Err(RuleError::UnknownIntrin { .. })));
    assert!(matches!(build("wmma_fill_16x16x16_f32"), Err(RuleError::IntrinRoleMismatch { .. })));
}

fn tensor_core_rule(groups: Vec<IntrinGroup>) -> MultiLevelTilingTensorCore {
    tensor_core_rule_with(groups, false)
}

fn tensor_core_rule_with(groups: Vec<IntrinGroup>, use_software_pipeline: bool) -> MultiLevelTilingTensorCore {
    init(
        MultiLevelTilingTensorCore::builder()
            .intrin_groups(groups)
            .use_software_pipeline(use_software_pipeline)
            .structure("SSSRRSRS")
            .tile_binds(vec!["blockIdx.y".into(), "blockIdx.x".into(), "threadIdx.y".into()])
            .max_innermost_factor(4)
            .vector_load_lens(vec![1, 2, 3, 4, 8, 16])
            .reuse_read(ReuseConfig::must(&[4], "shared.dyn"))
            .reuse_write(ReuseConfig::must(&[2], "shared.dyn"))
            .build()
            .unwrap(),
        Target::cuda(),
    )
}

#[test]
fn tensor_core_candidates_stage_fragments() {
    let mut rule = tensor_core_rule(wmma_intrin_groups().unwrap());
    let sch = Schedule::new(matmul(128, 128, 128, DType::Float16, DType::Float32));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 6);

    for cand in &out {
        let program = cand.program();
        let tensorized: Vec<String> = program
            .all_blocks()
            .into_iter()
            .filter_map(|b| cand.block(b).unwrap().annotation(attr::AUTO_TENSORIZE)?.as_str().map(str::to_string))
            .collect();
        assert!(tensorized.contains(&"wmma_sync_16x16x16_f16f16f32".to_string()));
        assert!(tensorized.contains(&"wmma_store_16x16x16_f32_shared_dyn".to_string()));
        assert!(tensorized.contains(&"wmma_load_16x16x16_f16_a_shared_dyn".to_string()));
        assert!(tensorized.iter().any(|name| name.starts_with("wmma_load_16x16x16_f16_b")));
        assert_eq!(program.outputs(), vec!["C"]);
    }
}

#[test]
fn software_pipeline_annotates_both_reduction_levels() {
    let mut rule = tensor_core_rule_with(wmma_intrin_groups().unwrap(), true);
    let sch = Schedule::new(matmul(128, 128, 128, DType::Float16, DType::Float32));
    let out = rule.apply(&sch, block(&sch, "C"));
    assert_eq!(out.len(), 6);

    for cand in &out {
        let sync = cand
            .program()
            .all_blocks()
            .into_iter()
            .find(|b| {
                cand.block(*b).unwrap().annotation(attr::AUTO_TENSORIZE)
                    == Some(&AnnValue::from("wmma_sync_16x16x16_f16f16f32"))
            })
            .unwrap();
        let piped: Vec<(&AnnValue, &AnnValue)> = cand
            .get_loops(sync)
            .unwrap()
            .into_iter()
            .filter_map(|l| {
                let anns = &cand.for_loop(l).unwrap().annotations;
                Some((anns.get(attr::SOFTWARE_PIPELINE_STAGE)?, anns.get(attr::SOFTWARE_PIPELINE_ORDER)?))
            })
            .collect();
        assert_eq!(
            piped,
            vec![
                (&AnnValue::from(vec![0, 0, 0, 0, 0, 1, 1]), &AnnValue::from(vec![0, 3, 1, 4, 5, 2, 6])),
                (&AnnValue::from(vec![0, 0, 1]), &AnnValue::from(vec![0, 1, 2])),
            ]
        );
    }
}

#[test]
fn tensor_core_declines_float32() {
    let mut rule = tensor_core_rule(wmma_intrin_groups().unwrap());
    let sch = Schedule::new(matmul_f32(128));
    assert!(rule.apply(&sch, block(&sch, "C")).is_empty());
}

#[test]
fn tensor_core_requires_groups() {
    let built = MultiLevelTilingTensorCore::builder().intrin_groups(Vec::new()).structure("SSSRRSRS").build();
    assert!(matches!(built, Err(RuleError::NoIntrinGroups)));
}

#[test]
fn wmma_groups_cover_three_types() {
    let groups = wmma_intrin_groups().unwrap();
    assert_eq!(groups.len(), 6);
    assert!(groups.iter().all(|g| g.validate().is_ok()));
}
