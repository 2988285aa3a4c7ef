//! Inlining of element-wise blocks into their producers or consumers.

use std::fmt;

use bon::bon;
use vesta_ir::{BlockRef, Schedule};

use crate::analysis::{reads_are_injective, reads_are_ordered};
use crate::attr;
use crate::config::TuneContext;
use crate::rule::{RuleState, ScheduleRule, derive};

/// Direction chosen by [`AutoInline`] for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineType {
    No,
    IntoConsumer,
    IntoProducer,
}

#[derive(Debug, Clone)]
pub struct AutoInline {
    into_producer: bool,
    into_consumer: bool,
    inline_const_tensor: bool,
    disallow_if_then_else: bool,
    require_injective: bool,
    require_ordered: bool,
    disallow_op: Vec<String>,
    state: RuleState,
}

#[bon]
impl AutoInline {
    /// Create an auto-inline rule with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = false)] into_producer: bool,
        #[builder(default = true)] into_consumer: bool,
        #[builder(default = true)] inline_const_tensor: bool,
        #[builder(default = true)] disallow_if_then_else: bool,
        #[builder(default = true)] require_injective: bool,
        #[builder(default = true)] require_ordered: bool,
        #[builder(default)] disallow_op: Vec<String>,
    ) -> Self {
        Self {
            into_producer,
            into_consumer,
            inline_const_tensor,
            disallow_if_then_else,
            require_injective,
            require_ordered,
            disallow_op,
            state: RuleState::default(),
        }
    }
}

impl AutoInline {
    /// Which way the block can be inlined, checking the gates in priority order.
    pub fn check_inline(&self, sch: &Schedule, block: BlockRef) -> InlineType {
        let program = sch.program();
        if block == program.root() {
            return InlineType::No;
        }
        let Ok(blk) = program.block(block) else { return InlineType::No };
        if blk.writes.len() != 1 {
            return InlineType::No;
        }
        let is_output = program.buffer(&blk.writes[0].buffer).is_ok_and(|b| b.is_output);
        if self.inline_const_tensor && blk.reads.is_empty() && !is_output {
            return InlineType::IntoConsumer;
        }

        if !program.is_pure_spatial() {
            if let Some(body) = &blk.body {
                if !self.disallow_op.is_empty() && body.calls_any(&self.disallow_op) {
                    return InlineType::No;
                }
                if self.disallow_if_then_else && body.has_select() {
                    return InlineType::No;
                }
            }
            if self.require_injective && !reads_are_injective(blk) {
                return InlineType::No;
            }
            if self.require_ordered && !reads_are_ordered(blk) {
                return InlineType::No;
            }
        }

        if blk.annotation(attr::INLINE_RULE).and_then(|v| v.as_str()) == Some("disable") {
            return InlineType::No;
        }

        if self.into_producer && self.can_inline_into_producer(sch, block) {
            return InlineType::IntoProducer;
        }
        if self.into_consumer
            && sch.get_consumers(block).is_ok_and(|c| !c.is_empty())
            && derive(sch, |sch| sch.compute_inline(block)).is_some()
        {
            return InlineType::IntoConsumer;
        }
        InlineType::No
    }

    fn can_inline_into_producer(&self, sch: &Schedule, block: BlockRef) -> bool {
        let program = sch.program();
        let Ok(producers) = sch.get_producers(block) else { return false };
        let [producer] = producers.as_slice() else { return false };
        let Ok(prod) = program.block(*producer) else { return false };
        prod.is_spatial()
            && program.is_leaf(*producer).unwrap_or(false)
            && prod.annotation(attr::AUTO_TENSORIZE).is_none()
            && derive(sch, |sch| sch.reverse_compute_inline(block)).is_some()
    }
}

impl ScheduleRule for AutoInline {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        self.state.initialize("AutoInline", context);
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        let inline = self.check_inline(sch, block);
        let applied = match inline {
            InlineType::No => None,
            InlineType::IntoConsumer => derive(sch, |sch| sch.compute_inline(block)),
            InlineType::IntoProducer => derive(sch, |sch| sch.reverse_compute_inline(block)),
        };
        tracing::debug!(rule = "AutoInline", ?inline, applied = applied.is_some(), "inline decision");
        applied.map(|(sch, ())| sch).into_iter().collect()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for AutoInline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AutoInline(into_producer={}, into_consumer={}, inline_const_tensor={}, disallow_if_then_else={}, \
             require_injective={}, require_ordered={}, disallow_op={:?})",
            self.into_producer,
            self.into_consumer,
            self.inline_const_tensor,
            self.disallow_if_then_else,
            self.require_injective,
            self.require_ordered,
            self.disallow_op
        )
    }
}

// ============================================================================
// CONSTANT SCALARS
// ============================================================================

/// Inline blocks computing a single constant scalar.
///
/// Run before [`AutoInline`] so such blocks do not pass for ordinary producers.
#[derive(Debug, Clone, Default)]
pub struct InlineConstantScalars {
    state: RuleState,
}

impl InlineConstantScalars {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleRule for InlineConstantScalars {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) {
        self.state.initialize("InlineConstantScalars", context);
    }

    #[tracing::instrument(skip_all, fields(block = %block))]
    fn apply(&mut self, sch: &Schedule, block: BlockRef) -> Vec<Schedule> {
        self.state.check();
        let program = sch.program();
        let Ok(blk) = program.block(block) else { return Vec::new() };
        let is_scalar = match blk.writes.as_slice() {
            [write] => program.buffer(&write.buffer).is_ok_and(|b| b.shape.is_empty() && !b.is_output),
            _ => false,
        };
        if block == program.root() || !blk.reads.is_empty() || !is_scalar {
            return Vec::new();
        }
        let out: Vec<Schedule> = derive(sch, |sch| sch.compute_inline(block)).map(|(sch, ())| sch).into_iter().collect();
        tracing::debug!(rule = "InlineConstantScalars", candidates = out.len(), "inlined constant");
        out
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }
}

impl fmt::Display for InlineConstantScalars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InlineConstantScalars")
    }
}
