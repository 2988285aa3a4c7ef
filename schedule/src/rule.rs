//! The schedule rule abstraction.
//!
//! A rule is configured once, initialized once with a [`TuneContext`], then applied to many
//! `(schedule, block)` pairs. Each application derives new schedules from clones of the input; the
//! input itself is never touched, so sibling candidates stay independent.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use vesta_ir::{BlockRef, Schedule};

use crate::config::{Target, TuneContext};

pub trait ScheduleRule: fmt::Display + Send {
    /// One-time setup: fork the private generator and resolve target-dependent defaults.
    fn initialize_with_tune_context(&mut self, context: &TuneContext);

    /// Candidates derived from `sch` at `block`. Empty means the rule does not apply.
    ///
    /// # Panics
    ///
    /// Panics when called before [`ScheduleRule::initialize_with_tune_context`].
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule>;

    /// Deep copy, private generator included.
    fn clone_rule(&self) -> Box<dyn ScheduleRule>;

    /// Whether this is the annotation-driven dispatch sentinel.
    fn is_apply_custom_rule(&self) -> bool {
        false
    }
}

impl Clone for Box<dyn ScheduleRule> {
    fn clone(&self) -> Self {
        self.clone_rule()
    }
}

impl fmt::Debug for dyn ScheduleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

// ============================================================================
// RULE STATE
// ============================================================================

/// Mutable part of a built-in rule: its generator and the target it was initialized with.
///
/// Cloning copies the generator state, so a clone replays exactly what the original would draw.
#[derive(Debug, Clone, Default)]
pub struct RuleState {
    rng: Option<StdRng>,
    target: Option<Target>,
}

impl RuleState {
    /// Returns `false` (and changes nothing) if the state was already initialized.
    pub fn initialize(&mut self, rule: &str, context: &TuneContext) -> bool {
        if self.rng.is_some() {
            tracing::warn!(rule, "schedule rule initialized twice; keeping the first context");
            return false;
        }
        self.rng = Some(StdRng::seed_from_u64(context.fork_seed()));
        self.target = Some(context.target().clone());
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.rng.is_some()
    }

    /// Target the rule was initialized with.
    #[track_caller]
    pub fn target(&self) -> &Target {
        match &self.target {
            Some(target) => target,
            None => uninitialized(),
        }
    }

    /// The rule's private generator.
    #[track_caller]
    pub fn rng(&mut self) -> &mut StdRng {
        match &mut self.rng {
            Some(rng) => rng,
            None => uninitialized(),
        }
    }

    /// Panic unless initialized.
    #[track_caller]
    pub fn check(&self) {
        if !self.is_initialized() {
            uninitialized();
        }
    }
}

#[track_caller]
fn uninitialized() -> ! {
    panic!("schedule rule applied before initialize_with_tune_context")
}

/// Clone `sch`, run `f` on the copy and keep it only if every primitive succeeded.
pub(crate) fn derive<T>(
    sch: &Schedule,
    f: impl FnOnce(&mut Schedule) -> vesta_ir::Result<T>,
) -> Option<(Schedule, T)> {
    let mut candidate = sch.clone();
    match f(&mut candidate) {
        Ok(out) => Some((candidate, out)),
        Err(error) => {
            tracing::trace!(%error, "candidate dropped");
            None
        }
    }
}
