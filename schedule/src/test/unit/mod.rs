pub mod auto_bind;
pub mod auto_inline;
pub mod compute_location;
pub mod lifecycle;
pub mod multi_level_tiling;
pub mod pvu;
pub mod reduction;
pub mod tensor_intrin;
