//! Random decisions used by schedule rules.

use rand::Rng;
use snafu::ensure;

use crate::error::*;
use crate::program::{BlockRef, LoopRef, Program};

/// Prime factors of `n`, ascending, with multiplicity. Empty for `n <= 1`.
pub fn factorize(mut n: i64) -> Vec<i64> {
    let mut out = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            out.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        out.push(n);
    }
    out
}

/// Draw `n` factors whose product is `extent`.
///
/// Every prime factor goes to a uniformly chosen slot; the innermost slot refuses factors that
/// would push it past `max_innermost_factor` (non-positive means unbounded) unless it is the only
/// slot.
pub fn sample_perfect_tile(extent: i64, n: usize, max_innermost_factor: i64, rng: &mut impl Rng) -> Result<Vec<i64>> {
    ensure!(n > 0, InvalidSamplingSnafu { reason: "tile count must be positive" });
    ensure!(extent > 0, InvalidSamplingSnafu { reason: "extent must be positive" });
    let mut factors = vec![1; n];
    for p in factorize(extent) {
        let mut slot = rng.gen_range(0..n);
        if slot == n - 1 && n > 1 && max_innermost_factor > 0 && factors[slot] * p > max_innermost_factor {
            slot = rng.gen_range(0..n - 1);
        }
        factors[slot] *= p;
    }
    Ok(factors)
}

/// Draw an index into `probs`, weighted by its entries.
pub fn sample_categorical(probs: &[f64], rng: &mut impl Rng) -> Result<usize> {
    ensure!(!probs.is_empty(), InvalidSamplingSnafu { reason: "no candidates" });
    ensure!(
        probs.iter().all(|p| p.is_finite() && *p >= 0.0),
        InvalidSamplingSnafu { reason: "probabilities must be finite and non-negative" }
    );
    let total: f64 = probs.iter().sum();
    ensure!(total > 0.0, InvalidSamplingSnafu { reason: "probabilities sum to zero" });

    let mut target = rng.r#gen::<f64>() * total;
    for (i, p) in probs.iter().enumerate() {
        if target < *p {
            return Ok(i);
        }
        target -= p;
    }
    Ok(probs.iter().rposition(|p| *p > 0.0).unwrap_or(probs.len() - 1))
}

impl Program {
    /// Loops a block may be computed at: loops enclosing every consumer in its scope that neither
    /// enclose the block itself nor any of its producers.
    pub fn compute_location_candidates(&self, block: BlockRef) -> Result<Vec<LoopRef>> {
        let consumers = self.consumers(block)?;
        let Some((first, rest)) = consumers.split_first() else { return Ok(Vec::new()) };
        let producers = self.producers(block)?;

        let mut common = self.loops_above(first.0)?;
        for c in rest {
            let loops = self.loops_above(c.0)?;
            common.retain(|l| loops.contains(l));
        }
        common.retain(|l| !self.is_ancestor(l.0, block.0) && producers.iter().all(|p| !self.is_ancestor(l.0, p.0)));
        Ok(common)
    }
}
