use proptest::prelude::*;
use vesta_ir::Schedule;

use crate::default_rules::default_llvm;
use crate::rule::ScheduleRule;
use crate::rules::MultiLevelTiling;
use crate::structure::ReuseConfig;
use crate::test::helpers::*;

fn tiling() -> MultiLevelTiling {
    MultiLevelTiling::builder()
        .structure("SSRSRS")
        .max_innermost_factor(16)
        .reuse_write(ReuseConfig::may(&[1, 2], "global"))
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn same_seed_same_candidates(seed: u64, log_n in 4u32..=8) {
        let n = 1i64 << log_n;
        let sch = Schedule::new(matmul_f32(n));
        let c = block(&sch, "C");

        let mut first = tiling();
        first.initialize_with_tune_context(&context(llvm(4), seed));
        let mut second = tiling();
        second.initialize_with_tune_context(&context(llvm(4), seed));
        prop_assert_eq!(first.apply(&sch, c), second.apply(&sch, c));
    }

    #[test]
    fn clones_replay_the_original(seed: u64) {
        let sch = Schedule::new(matmul_f32(64));
        let c = block(&sch, "C");
        let mut original = tiling();
        original.initialize_with_tune_context(&context(llvm(4), seed));
        let mut copy = original.clone_rule();

        let from_original = original.apply(&sch, c);
        prop_assert_eq!(copy.apply(&sch, c), from_original.clone());
        // Advancing the original does not move the clone.
        original.apply(&sch, c);
        let mut fresh_copy = copy.clone_rule();
        prop_assert_eq!(copy.apply(&sch, c), fresh_copy.apply(&sch, c));
    }

    #[test]
    fn rule_set_is_deterministic(seed: u64) {
        let sch = Schedule::new(row_sum(4, 1024));
        let b = block(&sch, "B");
        let run = || {
            let ctx = context(llvm(4), seed);
            default_llvm()
                .unwrap()
                .into_iter()
                .map(|mut rule| {
                    rule.initialize_with_tune_context(&ctx);
                    rule.apply(&sch, b)
                })
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(run(), run());
    }
}
