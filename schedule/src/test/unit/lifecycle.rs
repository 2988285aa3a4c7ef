use vesta_ir::{BlockRef, Schedule};

use crate::config::Target;
use crate::custom::{ApplyCustomRule, CustomRule};
use crate::default_rules::{default_cuda_tensor_core, default_llvm};
use crate::rule::{RuleState, ScheduleRule};
use crate::rules::{AutoBind, MultiLevelTiling, RandomComputeLocation};
use crate::structure::ReuseConfig;
use crate::test::helpers::*;

#[test]
#[should_panic(expected = "before initialize_with_tune_context")]
fn apply_before_initialize_panics() {
    let mut rule = RandomComputeLocation::new();
    let sch = Schedule::new(elementwise_chain(16));
    let b = block(&sch, "B");
    rule.apply(&sch, b);
}

#[test]
#[should_panic(expected = "before initialize_with_tune_context")]
fn uninitialized_state_has_no_generator() {
    RuleState::default().rng();
}

#[test]
fn second_initialization_is_ignored() {
    let mut state = RuleState::default();
    assert!(state.initialize("test", &context(llvm(4), 1)));
    assert!(!state.initialize("test", &context(Target::cuda(), 2)));
    assert_eq!(state.target().num_cores, 4);
    assert!(state.target().max_threads_per_block.is_none());
}

#[test]
fn rule_keeps_first_target() {
    let mut rule = AutoBind::builder().build().unwrap();
    rule.initialize_with_tune_context(&context(llvm(4), 1));
    rule.initialize_with_tune_context(&context(Target::cuda(), 1));

    // CPU targets have no thread limit, so the rule keeps declining.
    let sch = Schedule::new(elementwise_chain(1024));
    let b = block(&sch, "B");
    assert!(rule.apply(&sch, b).is_empty());
}

#[test]
fn apply_leaves_input_untouched() {
    let mut rule = init(
        MultiLevelTiling::builder().structure("SSRSRS").reuse_write(ReuseConfig::may(&[1, 2], "global")).build().unwrap(),
        llvm(4),
    );
    let sch = Schedule::new(matmul_f32(64));
    let before = sch.clone();
    let c = block(&sch, "C");
    let out = rule.apply(&sch, c);
    assert!(!out.is_empty());
    assert_eq!(sch, before);
    assert!(out.iter().all(|cand| *cand != sch));
}

fn plugin() -> CustomRule {
    CustomRule::builder()
        .initialize_fn(Box::new(|_: &crate::TuneContext| {}))
        .apply_fn(Box::new(|_: &Schedule, _: BlockRef| Vec::<Schedule>::new()))
        .clone_fn(std::sync::Arc::new(plugin))
        .to_string_fn(std::sync::Arc::new(|| "Plugin".to_string()))
        .build()
        .unwrap()
}

#[test]
fn only_the_sentinel_dispatches_custom_rules() {
    let plugin = plugin();
    assert!(!plugin.is_apply_custom_rule());
    assert!(ApplyCustomRule::new().is_apply_custom_rule());

    for rules in [default_llvm().unwrap(), default_cuda_tensor_core().unwrap()] {
        let sentinels: Vec<usize> =
            rules.iter().enumerate().filter(|(_, r)| r.is_apply_custom_rule()).map(|(i, _)| i).collect();
        assert_eq!(sentinels, vec![0]);
    }
}

#[test]
fn boxed_rules_clone_through_trait() {
    let rules = default_llvm().unwrap();
    let copies = rules.clone();
    let names: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
    let copied: Vec<String> = copies.iter().map(|r| r.to_string()).collect();
    assert_eq!(names, copied);
    assert_eq!(format!("{:?}", rules[0]), "ApplyCustomRule");
}
