//! Annotation keys written and read by the rules.
//!
//! Most of them are hints for lowering passes downstream of the search; the rules only use
//! [`TILING_STRUCTURE`], [`INLINE_RULE`], [`SCHEDULE_RULE`] and [`RANDOM_COMPUTE_PRODUCER`] themselves.

/// Structure string of a block already processed by multi-level tiling.
pub const TILING_STRUCTURE: &str = "meta_schedule.tiling_structure";

/// Vector length for the threads cooperatively loading a shared-memory cache.
pub const COOPERATIVE_FETCH: &str = "meta_schedule.cooperative_fetch";

pub const THREAD_EXTENT_LOW_INCLUSIVE: &str = "meta_schedule.thread_extent_low_inclusive";
pub const THREAD_EXTENT_HIGH_INCLUSIVE: &str = "meta_schedule.thread_extent_high_inclusive";

/// Intrinsic a block is tensorized with (or should be, for cache stages).
pub const AUTO_TENSORIZE: &str = "meta_schedule.auto_tensorize";

/// Intrinsic initializing the accumulator of a tensorized block.
pub const AUTO_TENSORIZE_INIT: &str = "meta_schedule.auto_tensorize_init";

/// Set on a write-back block whose producer should be relocated by `RandomComputeLocation`.
pub const RANDOM_COMPUTE_PRODUCER: &str = "meta_schedule.random_compute_producer";

pub const PARALLEL: &str = "meta_schedule.parallel";
pub const VECTORIZE: &str = "meta_schedule.vectorize";
pub const UNROLL_EXPLICIT: &str = "meta_schedule.unroll_explicit";
pub const UNROLL_IMPLICIT: &str = "meta_schedule.unroll_implicit";

/// `"disable"` opts a block out of auto-inlining.
pub const INLINE_RULE: &str = "meta_schedule.inline_rule";

/// Name of the custom rule a block asks for.
pub const SCHEDULE_RULE: &str = "schedule_rule";

pub const SOFTWARE_PIPELINE_STAGE: &str = "software_pipeline_stage";
pub const SOFTWARE_PIPELINE_ORDER: &str = "software_pipeline_order";
