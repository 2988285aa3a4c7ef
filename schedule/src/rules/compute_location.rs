//! Random compute-at placement.

use std::fmt;

use vesta_ir::{BlockRef, Schedule};

use crate::analysis::is_tiled;
use crate::attr;
use crate::config::TuneContext;
use crate::rule::{RuleState, ScheduleRule, derive};

/// Moves a block under a uniformly sampled loop of its consumers, its current location included.
///
/// A block marked with [`attr::RANDOM_COMPUTE_PRODUCER`] (the write-back of an rfactor) moves
/// first; its producer then samples a location relative to where the block landed.
#[derive(Debug, Clone, Default)]
pub struct RandomComputeLocation {
    state: RuleState,
}

impl RandomComputeLocation {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether the block sits directly under the root in its own loop nest and feeds another block.
fn can_relocate(sch: &Schedule, block: BlockRef) -> bool {
    let program = sch.program();
    let root = program.root();
    if block == root || program.scope_of(block.id()).ok() != Some(root) {
        return false;
    }
    let Ok(blk) = program.block(block) else { return false };
    if is_tiled(blk) {
        return false;
    }
    let Some(outermost) = sch.get_loops(block).ok().and_then(|l| l.first().copied()) else { return false };
    program.blocks_under(outermost.id()).is_ok_and(|b| b == [block])
        && sch.get_consumers(block).is_ok_and(|c| !c.is_empty())
}

impl ScheduleRule for RandomComputeLocation {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        self.state.initialize("RandomComputeLocation", context);
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        let mut current = sch.clone();
        let mut changed = false;

        if can_relocate(&current, block) {
            let rng = self.state.rng();
            let moved = derive(&current, |sch| {
                if let Some(at) = sch.sample_compute_location(block, rng)? {
                    sch.compute_at(block, at)?;
                }
                Ok(())
            });
            if let Some((sch, ())) = moved {
                current = sch;
                changed = true;
            }
        }

        // The producer samples among loops of the block's new location.
        let marked = current.block(block).is_ok_and(|b| b.annotation(attr::RANDOM_COMPUTE_PRODUCER).is_some());
        if marked {
            let producer = current.get_producers(block).ok().and_then(|p| match p.as_slice() {
                [p] => Some(*p),
                _ => None,
            });
            let rng = self.state.rng();
            let moved = derive(&current, |sch| {
                if let Some(producer) = producer
                    && let Some(at) = sch.sample_compute_location(producer, rng)?
                {
                    sch.compute_at(producer, at)?;
                }
                sch.unannotate_block(block, attr::RANDOM_COMPUTE_PRODUCER)
            });
            if let Some((sch, ())) = moved {
                current = sch;
                changed = true;
            }
        }

        tracing::debug!(rule = "RandomComputeLocation", changed, "sampled location");
        if changed { vec![current] } else { Vec::new() }
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for RandomComputeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RandomComputeLocation")
    }
}
