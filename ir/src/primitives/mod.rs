//! Schedule primitives as in-place program rewrites.
//!
//! These functions do not record anything; [`crate::Schedule`] wraps them and appends the matching
//! instruction to its trace. A primitive that fails may leave the program partially rewritten, so
//! callers work on a copy and drop it on error.

mod cache;
mod compute;
mod loops;
mod reduction;
mod sampling;
mod tensorize;

pub use sampling::{factorize, sample_categorical, sample_perfect_tile};

use crate::types::BufferRegion;

/// Index of `region` in `regions`, appending it if absent.
pub(crate) fn push_unique(regions: &mut Vec<BufferRegion>, region: BufferRegion) -> usize {
    match regions.iter().position(|r| *r == region) {
        Some(i) => i,
        None => {
            regions.push(region);
            regions.len() - 1
        }
    }
}

/// Whether `dims` mentions each of `0..n` exactly once.
pub(crate) fn is_permutation(dims: &[usize], n: usize) -> bool {
    let mut seen = vec![false; n];
    dims.len() == n && dims.iter().all(|&d| d < n && !std::mem::replace(&mut seen[d], true))
}
