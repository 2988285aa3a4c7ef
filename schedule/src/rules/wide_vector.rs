//! Multi-level tiling whose innermost output tile fills one vector register.

use std::fmt;

use bon::bon;
use snafu::ensure;
use vesta_ir::{BlockRef, Schedule};

use super::multi_level_tiling::{MultiLevelTiling, TilingConfig, TilingState};
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::ScheduleRule;
use crate::structure::ReuseConfig;

/// The loop over the output's innermost dimension gets an innermost tile of
/// `vector_length_in_bits / dtype_bits` elements, vectorized; other loops tile as usual.
#[derive(Clone)]
pub struct MultiLevelTilingWideVector {
    tiling: MultiLevelTiling,
}

#[bon]
impl MultiLevelTilingWideVector {
    /// Create a wide-vector tiling rule with builder pattern.
    #[builder]
    pub fn new(
        #[builder(into)] structure: String,
        vector_length_in_bits: i64,
        #[builder(default = -1)] max_innermost_factor: i64,
        #[builder(default)] reuse_read: ReuseConfig,
        #[builder(default)] reuse_write: ReuseConfig,
    ) -> Result<Self> {
        ensure!(
            vector_length_in_bits > 0,
            InvalidStructureSnafu { structure: structure.clone(), reason: "vector length must be positive" }
        );
        let mut config =
            TilingConfig::new(&structure, None, max_innermost_factor, None, reuse_read, reuse_write, None)?;
        config.vector_length_in_bits = Some(vector_length_in_bits);
        Ok(Self { tiling: MultiLevelTiling::from_config(config) })
    }
}

impl ScheduleRule for MultiLevelTilingWideVector {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        self.tiling.initialize("MultiLevelTilingWideVector", context);
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.tiling.state.check();
        if !self.tiling.is_applicable(sch, block) {
            return Vec::new();
        }
        let out: Vec<Schedule> =
            self.tiling.run(vec![TilingState::new(sch.clone(), block)]).into_iter().map(|s| s.sch).collect();
        tracing::debug!(rule = "MultiLevelTilingWideVector", candidates = out.len(), "tiled");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for MultiLevelTilingWideVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiLevelTilingWideVector({})", self.tiling.config)
    }
}
