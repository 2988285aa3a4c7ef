//! Default rule sets, one per hardware target.
//!
//! Each factory returns fresh, uninitialized rules in priority order. The list is meant to be
//! initialized once with a [`TuneContext`](crate::TuneContext) and then shared read-only by the
//! search, cloning rules per branch.

use crate::config::{Target, TargetKind};
use crate::custom::ApplyCustomRule;
use crate::error::*;
use crate::rule::ScheduleRule;
use crate::rules::*;
use crate::structure::{IntrinGroup, ReuseConfig};

pub type RuleSet = Vec<Box<dyn ScheduleRule>>;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// AutoInline configuration shared by the CPU rule sets.
fn cpu_auto_inline() -> AutoInline {
    AutoInline::builder()
        .into_producer(false)
        .into_consumer(true)
        .inline_const_tensor(true)
        .disallow_if_then_else(true)
        .require_injective(true)
        .require_ordered(true)
        .disallow_op(strings(&["tir.exp"]))
        .build()
}

fn cpu_tiling(max_innermost_factor: i64) -> Result<MultiLevelTiling> {
    MultiLevelTiling::builder()
        .structure("SSRSRS")
        .max_innermost_factor(max_innermost_factor)
        .reuse_read(ReuseConfig::none())
        .reuse_write(ReuseConfig::may(&[1, 2], "global"))
        .build()
}

fn cpu_tiling_with_intrin(intrin: &str, max_innermost_factor: i64) -> Result<MultiLevelTilingWithIntrin> {
    MultiLevelTilingWithIntrin::builder()
        .intrin_name(intrin)
        .structure("SSRSRS")
        .max_innermost_factor(max_innermost_factor)
        .reuse_read(ReuseConfig::none())
        .reuse_write(ReuseConfig::may(&[1, 2], "global"))
        .build()
}

pub fn default_llvm() -> Result<RuleSet> {
    let rules: RuleSet = vec![
        Box::new(ApplyCustomRule::new()),
        Box::new(InlineConstantScalars::new()),
        Box::new(cpu_auto_inline()),
        Box::new(AddRFactor::builder().max_jobs_per_core(16).max_innermost_factor(64).build()?),
        Box::new(cpu_tiling(64)?),
        Box::new(
            ParallelizeVectorizeUnroll::builder()
                .max_jobs_per_core(16)
                .max_vectorize_extent(64)
                .unroll_max_steps(vec![0, 16, 64, 512])
                .unroll_explicit(true)
                .build(),
        ),
        Box::new(RandomComputeLocation::new()),
    ];
    Ok(rules)
}

/// The LLVM rule set with an intrinsic tiling rule ahead of plain tiling.
///
/// `kind` is `"vnni"` or `"avx512"`.
pub fn default_x86(kind: &str) -> Result<RuleSet> {
    let intrin = match kind {
        "vnni" => "dot_16x4_vnni",
        "avx512" => "dot_16x4_avx512",
        _ => return UnknownVariantSnafu { target: "x86", kind }.fail(),
    };
    let mut rules = default_llvm()?;
    let at = rules.len() - 3;
    rules.insert(at, Box::new(cpu_tiling_with_intrin(intrin, 64)?));
    Ok(rules)
}

/// GPU rules after the custom-rule sentinel, shared with the Tensor Core set.
fn cuda_tail() -> Result<RuleSet> {
    let rules: RuleSet = vec![
        Box::new(InlineConstantScalars::new()),
        Box::new(
            AutoInline::builder()
                .into_producer(true)
                .into_consumer(true)
                .inline_const_tensor(true)
                .disallow_if_then_else(false)
                .require_injective(false)
                .require_ordered(false)
                .build(),
        ),
        Box::new(CrossThreadReduction::builder().thread_extents(vec![4, 8, 16, 32, 64, 128, 256, 512]).build()?),
        Box::new(
            ParallelizeVectorizeUnroll::builder()
                .max_jobs_per_core(-1)
                .max_vectorize_extent(-1)
                .unroll_max_steps(vec![0, 16, 64, 512, 1024])
                .unroll_explicit(true)
                .build(),
        ),
        Box::new(
            AutoBind::builder().max_threadblocks(256).thread_extents(vec![32, 64, 128, 256, 512, 1024]).build()?,
        ),
    ];
    Ok(rules)
}

pub fn default_cuda() -> Result<RuleSet> {
    let mut rules: RuleSet = vec![
        Box::new(ApplyCustomRule::new()),
        Box::new(
            MultiLevelTiling::builder()
                .structure("SSSRRSRS")
                .tile_binds(strings(&["blockIdx.x", "vthread.x", "threadIdx.x"]))
                .max_innermost_factor(64)
                .vector_load_lens(vec![1, 2, 3, 4, 8, 16])
                .reuse_read(ReuseConfig::must(&[4], "shared"))
                .reuse_write(ReuseConfig::must(&[3], "local"))
                .build()?,
        ),
    ];
    rules.extend(cuda_tail()?);
    Ok(rules)
}

/// WMMA groups for the three supported input/accumulator combinations, each with the `B`
/// operand either row-major or transposed.
pub fn wmma_intrin_groups() -> Result<Vec<IntrinGroup>> {
    let combos = [("f16f16f32", "f16", "f32"), ("f16f16f16", "f16", "f16"), ("s8s8s32", "s8", "s32")];
    let mut groups = Vec::with_capacity(combos.len() * 2);
    for (tag, input, acc) in combos {
        for trans in ["", "_trans"] {
            let group = IntrinGroup {
                init: format!("wmma_fill_16x16x16_{acc}"),
                load_a: format!("wmma_load_16x16x16_{input}_a_shared_dyn"),
                load_b: format!("wmma_load_16x16x16_{input}_b{trans}_shared_dyn"),
                compute: format!("wmma_sync_16x16x16_{tag}{trans}"),
                store: format!("wmma_store_16x16x16_{acc}_shared_dyn"),
            };
            group.validate()?;
            groups.push(group);
        }
    }
    Ok(groups)
}

pub fn default_cuda_tensor_core() -> Result<RuleSet> {
    let mut rules: RuleSet = vec![
        Box::new(ApplyCustomRule::new()),
        Box::new(
            MultiLevelTilingTensorCore::builder()
                .intrin_groups(wmma_intrin_groups()?)
                .structure("SSSRRSRS")
                .tile_binds(strings(&["blockIdx.y", "blockIdx.x", "threadIdx.y"]))
                .max_innermost_factor(4)
                .vector_load_lens(vec![1, 2, 3, 4, 8, 16])
                .reuse_read(ReuseConfig::must(&[4], "shared.dyn"))
                .reuse_write(ReuseConfig::must(&[2], "shared.dyn"))
                .use_software_pipeline(false)
                .build()?,
        ),
    ];
    rules.extend(default_cuda()?.into_iter().skip(1));
    Ok(rules)
}

pub fn default_hexagon() -> Result<RuleSet> {
    let rules: RuleSet = vec![
        Box::new(ApplyCustomRule::new()),
        Box::new(InlineConstantScalars::new()),
        Box::new(cpu_auto_inline()),
        Box::new(
            MultiLevelTilingWideVector::builder()
                .structure("SRSRS")
                .vector_length_in_bits(1024)
                .max_innermost_factor(128)
                .reuse_read(ReuseConfig::none())
                .reuse_write(ReuseConfig::may(&[1, 2], "global"))
                .build()?,
        ),
        Box::new(
            ParallelizeVectorizeUnroll::builder()
                .max_jobs_per_core(16)
                .max_vectorize_extent(128)
                .unroll_max_steps(vec![0, 16, 64, 512])
                .unroll_explicit(true)
                .build(),
        ),
    ];
    Ok(rules)
}

pub fn default_micro() -> Result<RuleSet> {
    let rules: RuleSet = vec![
        Box::new(ApplyCustomRule::new()),
        Box::new(InlineConstantScalars::new()),
        Box::new(cpu_auto_inline()),
        Box::new(cpu_tiling(64)?),
    ];
    Ok(rules)
}

/// ARM rule set; `kind` is `"neon"` or `"dotprod"`.
///
/// The dot-product variant tries the signed, unsigned and mixed-sign `dot` intrinsics in turn.
pub fn default_arm(kind: &str) -> Result<RuleSet> {
    let intrins: &[&str] = match kind {
        "neon" => &["dot_4x4_i8i8s32_neon"],
        "dotprod" => &["dot_4x4_i8i8s32_sdot", "dot_4x4_u8u8u32_udot", "dot_4x4_u8u8i32_hdot"],
        _ => return UnknownVariantSnafu { target: "arm", kind }.fail(),
    };
    let mut rules: RuleSet = vec![
        Box::new(ApplyCustomRule::new()),
        Box::new(InlineConstantScalars::new()),
        Box::new(cpu_auto_inline()),
        Box::new(AddRFactor::builder().max_jobs_per_core(8).max_innermost_factor(32).build()?),
    ];
    for intrin in intrins {
        rules.push(Box::new(cpu_tiling_with_intrin(intrin, 32)?));
    }
    rules.push(Box::new(cpu_tiling(32)?));
    rules.push(Box::new(
        ParallelizeVectorizeUnroll::builder()
            .max_jobs_per_core(8)
            .max_vectorize_extent(32)
            .unroll_max_steps(vec![0, 8, 32, 256])
            .unroll_explicit(true)
            .build(),
    ));
    rules.push(Box::new(RandomComputeLocation::new()));
    Ok(rules)
}

/// Rule set for a target, choosing the default variant where a kind has several.
pub fn default_for_target(target: &Target) -> Result<RuleSet> {
    tracing::debug!(%target, "building default rule set");
    match target.kind {
        TargetKind::Llvm => default_llvm(),
        TargetKind::Cuda => default_cuda(),
        TargetKind::Hexagon => default_hexagon(),
        TargetKind::Micro => default_micro(),
        TargetKind::Arm => default_arm("neon"),
    }
}
