//! Schedule rules for Vesta's tensor program search.
//!
//! A rule takes a [`Schedule`](vesta_ir::Schedule) and a block inside it and proposes rewritten
//! candidates (tiled, inlined, cached, tensorized, bound to threads, ...), or none when it does not
//! apply. Rules are configured with builders, initialized once with a [`TuneContext`] and then
//! applied many times; their randomness comes from a private generator seeded by the context, so a
//! fixed seed reproduces the same candidates.
//!
//! # Module Organization
//!
//! - [`rule`] - The [`ScheduleRule`] trait and shared rule state
//! - [`rules`] - Built-in rules: tiling family, inlining, reductions, binding, placement
//! - [`custom`] - Custom-rule registry, dispatch sentinel and closure bridge
//! - [`default_rules`] - Per-target rule sets
//! - [`structure`] - Tiling structures, reuse configurations and intrinsic groups
//! - [`analysis`] - Block and loop-nest queries shared by the rules
//! - [`config`] - Targets and tuning context
//! - [`attr`] - Annotation keys
//! - [`error`] - Configuration errors

pub mod analysis;
pub mod attr;
pub mod config;
pub mod custom;
pub mod default_rules;
pub mod error;
pub mod rule;
pub mod rules;
pub mod structure;

#[cfg(test)]
pub mod test;

pub use config::{Target, TargetKind, TuneContext};
pub use custom::{ApplyCustomRule, CustomRule, get_custom_rule, register_custom_rule};
pub use default_rules::{
    RuleSet, default_arm, default_cuda, default_cuda_tensor_core, default_for_target, default_hexagon, default_llvm,
    default_micro, default_x86,
};
pub use error::{Result, RuleError};
pub use rule::{RuleState, ScheduleRule};
pub use rules::{
    AddRFactor, AutoBind, AutoInline, BlockFilter, CrossThreadReduction, InlineConstantScalars, InlineType,
    MultiLevelTiling, MultiLevelTilingTensorCore, MultiLevelTilingWideVector, MultiLevelTilingWithIntrin,
    ParallelizeVectorizeUnroll, RandomComputeLocation,
};
pub use structure::{IntrinGroup, ReuseConfig, ReuseType, TilingStructure};
