//! Built-in schedule rules.

pub mod auto_bind;
pub mod auto_inline;
pub mod compute_location;
pub mod cross_thread;
pub mod multi_level_tiling;
pub mod pvu;
pub mod rfactor;
pub mod tensor_core;
pub mod wide_vector;
pub mod with_intrin;

pub use auto_bind::AutoBind;
pub use auto_inline::{AutoInline, InlineConstantScalars, InlineType};
pub use compute_location::RandomComputeLocation;
pub use cross_thread::CrossThreadReduction;
pub use multi_level_tiling::{BlockFilter, MultiLevelTiling};
pub use pvu::ParallelizeVectorizeUnroll;
pub use rfactor::AddRFactor;
pub use tensor_core::MultiLevelTilingTensorCore;
pub use wide_vector::MultiLevelTilingWideVector;
pub use with_intrin::MultiLevelTilingWithIntrin;
