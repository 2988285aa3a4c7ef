//! Target description and tuning context.
//!
//! Provides typed configuration with bon builders and environment variable fallbacks, so a
//! session can be set up either explicitly or from the process environment.

use std::fmt;

use bon::bon;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

// ============================================================================
// TARGET
// ============================================================================

/// Hardware family a rule set is tuned for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Generic CPU through LLVM.
    #[default]
    Llvm,
    Cuda,
    Hexagon,
    /// Micro-controllers.
    Micro,
    Arm,
}

/// Hardware description consumed by the rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    /// Lookup keys for custom rules, most specific first.
    pub keys: Vec<String>,
    /// Number of cores available to parallel loops.
    pub num_cores: i64,
    /// Thread limit of one thread block; `None` on targets without thread blocks.
    pub max_threads_per_block: Option<i64>,
    pub warp_size: Option<i64>,
    pub vector_width_bits: i64,
}

fn default_num_cores() -> i64 {
    std::thread::available_parallelism().map(|p| p.get() as i64).unwrap_or(8)
}

impl Default for Target {
    fn default() -> Self {
        Self::llvm()
    }
}

impl Target {
    pub fn llvm() -> Self {
        Self {
            kind: TargetKind::Llvm,
            keys: vec!["cpu".into()],
            num_cores: default_num_cores(),
            max_threads_per_block: None,
            warp_size: None,
            vector_width_bits: 256,
        }
    }

    pub fn cuda() -> Self {
        Self {
            kind: TargetKind::Cuda,
            keys: vec!["cuda".into(), "gpu".into()],
            num_cores: 1,
            max_threads_per_block: Some(1024),
            warp_size: Some(32),
            vector_width_bits: 128,
        }
    }

    pub fn hexagon() -> Self {
        Self {
            kind: TargetKind::Hexagon,
            keys: vec!["hexagon".into(), "cpu".into()],
            num_cores: 4,
            max_threads_per_block: None,
            warp_size: None,
            vector_width_bits: 1024,
        }
    }

    pub fn micro() -> Self {
        Self {
            kind: TargetKind::Micro,
            keys: vec!["micro".into(), "cpu".into()],
            num_cores: 1,
            max_threads_per_block: None,
            warp_size: None,
            vector_width_bits: 32,
        }
    }

    pub fn arm() -> Self {
        Self {
            kind: TargetKind::Arm,
            keys: vec!["arm_cpu".into(), "cpu".into()],
            num_cores: default_num_cores(),
            max_threads_per_block: None,
            warp_size: None,
            vector_width_bits: 128,
        }
    }

    /// Preset for a target kind.
    pub fn preset(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Llvm => Self::llvm(),
            TargetKind::Cuda => Self::cuda(),
            TargetKind::Hexagon => Self::hexagon(),
            TargetKind::Micro => Self::micro(),
            TargetKind::Arm => Self::arm(),
        }
    }

    /// Whether the target executes thread blocks (GPU-like).
    pub fn has_thread_blocks(&self) -> bool {
        self.max_threads_per_block.is_some()
    }
}

#[bon]
impl Target {
    /// Create a target with builder pattern; fields left unset come from the kind's preset.
    #[builder]
    pub fn builder(
        #[builder(default)] kind: TargetKind,
        keys: Option<Vec<String>>,
        num_cores: Option<i64>,
        max_threads_per_block: Option<i64>,
        warp_size: Option<i64>,
        vector_width_bits: Option<i64>,
    ) -> Self {
        let preset = Self::preset(kind);
        Self {
            kind,
            keys: keys.unwrap_or(preset.keys),
            num_cores: num_cores.unwrap_or(preset.num_cores),
            max_threads_per_block: max_threads_per_block.or(preset.max_threads_per_block),
            warp_size: warp_size.or(preset.warp_size),
            vector_width_bits: vector_width_bits.unwrap_or(preset.vector_width_bits),
        }
    }

    /// Create a target from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `VESTA_TARGET` - Target kind: `llvm`, `cuda`, `hexagon`, `micro` or `arm` (default: llvm)
    /// * `VESTA_NUM_CORES` - Core count (default: the preset's)
    pub fn from_env() -> Self {
        let kind = std::env::var("VESTA_TARGET").ok().and_then(|s| s.parse().ok()).unwrap_or_default();
        let num_cores = std::env::var("VESTA_NUM_CORES").ok().and_then(|s| s.parse().ok()).filter(|&n: &i64| n > 0);
        Self::builder().kind(kind).maybe_num_cores(num_cores).build()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -keys={} -num-cores={}", self.kind, self.keys.join(","), self.num_cores)?;
        if let Some(threads) = self.max_threads_per_block {
            write!(f, " -max-threads-per-block={threads}")?;
        }
        if let Some(warp) = self.warp_size {
            write!(f, " -thread-warp-size={warp}")?;
        }
        Ok(())
    }
}

// ============================================================================
// TUNING CONTEXT
// ============================================================================

/// Session-wide state handed to every rule once, before any rule is applied.
///
/// The generator is only used to fork seeds for the rules' private streams; it is locked for the
/// duration of one draw.
#[derive(Debug)]
pub struct TuneContext {
    target: Target,
    seed: u64,
    rng: Mutex<StdRng>,
}

#[bon]
impl TuneContext {
    /// Create a tuning context with builder pattern.
    #[builder]
    pub fn builder(#[builder(default)] target: Target, #[builder(default = 42)] seed: u64) -> Self {
        Self { target, seed, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    /// Create a tuning context from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `VESTA_SEED` - Session seed (default: 42)
    /// * plus the variables read by [`Target::from_env`]
    pub fn from_env() -> Self {
        let seed = std::env::var("VESTA_SEED").ok().and_then(|s| s.parse().ok()).unwrap_or(42);
        Self::builder().target(Target::from_env()).seed(seed).build()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw a seed for a branch-local generator.
    pub fn fork_seed(&self) -> u64 {
        self.rng.lock().r#gen()
    }
}
