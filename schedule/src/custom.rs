//! User-supplied rules: the annotation-driven registry and the closure bridge.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bon::bon;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use snafu::{OptionExt, ensure};
use vesta_ir::{BlockRef, Schedule};

use crate::attr;
use crate::config::TuneContext;
use crate::error::*;
use crate::rule::{RuleState, ScheduleRule};

/// A registered rule body: candidates for a block, empty to decline.
pub type CustomRuleFn = Arc<dyn Fn(&Schedule, BlockRef) -> Vec<Schedule> + Send + Sync>;

// ============================================================================
// REGISTRY
// ============================================================================

static CUSTOM_RULES: Lazy<RwLock<HashMap<String, CustomRuleFn>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn registry_key(target_key: &str, name: &str) -> String {
    format!("meta_schedule.{target_key}.{name}")
}

/// Register `rule` for blocks annotated `schedule_rule = name` on targets carrying `target_key`.
pub fn register_custom_rule(
    target_key: &str,
    name: &str,
    rule: impl Fn(&Schedule, BlockRef) -> Vec<Schedule> + Send + Sync + 'static,
) -> Result<()> {
    let key = registry_key(target_key, name);
    let mut table = CUSTOM_RULES.write();
    ensure!(!table.contains_key(&key), DuplicateCustomRuleSnafu { name: key.clone() });
    tracing::debug!(%key, "registered custom rule");
    table.insert(key, Arc::new(rule));
    Ok(())
}

pub fn get_custom_rule(target_key: &str, name: &str) -> Option<CustomRuleFn> {
    CUSTOM_RULES.read().get(&registry_key(target_key, name)).cloned()
}

// ============================================================================
// DISPATCH SENTINEL
// ============================================================================

/// Annotation value that opts a block out of custom dispatch.
pub const NO_CUSTOM_RULE: &str = "None";

/// Dispatches a block to the custom rule named by its `schedule_rule` annotation.
///
/// Target keys are tried in order; the first registration found wins.
#[derive(Debug, Clone, Default)]
pub struct ApplyCustomRule {
    keys: Vec<String>,
    state: RuleState,
}

impl ApplyCustomRule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleRule for ApplyCustomRule {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        if self.state.initialize("ApplyCustomRule", context) {
            self.keys = context.target().keys.clone();
        }
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        let Some(name) = sch
            .block(block)
            .ok()
            .and_then(|b| b.annotation(attr::SCHEDULE_RULE))
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            return Vec::new();
        };
        if name == NO_CUSTOM_RULE {
            return Vec::new();
        }
        for key in &self.keys {
            if let Some(rule) = get_custom_rule(key, &name) {
                let out = rule(sch, block);
                tracing::debug!(rule = "ApplyCustomRule", custom = %name, %key, candidates = out.len(), "dispatched");
                return out;
            }
        }
        tracing::warn!(custom = %name, keys = ?self.keys, "no custom rule registered for block annotation");
        Vec::new()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn is_apply_custom_rule(&self) -> bool {
        true
    }
}

impl fmt::Display for ApplyCustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApplyCustomRule")
    }
}

// ============================================================================
// CLOSURE BRIDGE
// ============================================================================

pub type InitializeFn = Box<dyn FnMut(&TuneContext) + Send>;
pub type ApplyFn = Box<dyn FnMut(&Schedule, BlockRef) -> Vec<Schedule> + Send>;
pub type CloneFn = Arc<dyn Fn() -> CustomRule + Send + Sync>;
pub type ToStringFn = Arc<dyn Fn() -> String + Send + Sync>;

/// A rule whose behavior is entirely supplied by closures.
///
/// Initialization happens once; a second call is ignored. Cloning builds a fresh rule with the
/// supplied `clone` function, which copies any state the closures hold, and carries over the
/// target and generator of the original.
pub struct CustomRule {
    initialize_fn: InitializeFn,
    apply_fn: ApplyFn,
    clone_fn: CloneFn,
    to_string_fn: ToStringFn,
    state: RuleState,
}

#[bon]
impl CustomRule {
    /// Create a closure-backed rule with builder pattern. All four functions are required.
    #[builder]
    pub fn new(
        initialize_fn: Option<InitializeFn>,
        apply_fn: Option<ApplyFn>,
        clone_fn: Option<CloneFn>,
        to_string_fn: Option<ToStringFn>,
    ) -> Result<Self> {
        Ok(Self {
            initialize_fn: initialize_fn.context(IncompleteCustomRuleSnafu { function: "initialize" })?,
            apply_fn: apply_fn.context(IncompleteCustomRuleSnafu { function: "apply" })?,
            clone_fn: clone_fn.context(IncompleteCustomRuleSnafu { function: "clone" })?,
            to_string_fn: to_string_fn.context(IncompleteCustomRuleSnafu { function: "to_string" })?,
            state: RuleState::default(),
        })
    }
}

impl ScheduleRule for CustomRule {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        if self.state.initialize("CustomRule", context) {
            (self.initialize_fn)(context);
        }
    }

    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        (self.apply_fn)(sch, block)
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        let mut clone = (self.clone_fn)();
        clone.state = self.state.clone();
        Box::new(clone)
    }
}

impl fmt::Display for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&(self.to_string_fn)())
    }
}
