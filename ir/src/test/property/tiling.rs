use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::test::helpers::*;
use crate::{Schedule, sample_perfect_tile};

proptest! {
    #[test]
    fn perfect_tile_multiplies_to_extent(extent in 1i64..=4096, n in 1usize..=5, max_inner in 1i64..=64, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let tiles = sample_perfect_tile(extent, n, max_inner, &mut rng).unwrap();
        prop_assert_eq!(tiles.len(), n);
        prop_assert_eq!(tiles.iter().product::<i64>(), extent);
        if n > 1 {
            prop_assert!(tiles[n - 1] <= max_inner);
        }
    }

    #[test]
    fn split_then_fuse_preserves_iteration(a in 1i64..=8, b in 1i64..=8, point in 0i64..64) {
        let extent = a * b;
        let mut sch = Schedule::new(elementwise_chain(extent));
        let l = loops(&sch, "B")[0];
        let parts = sch.split(l, &[a, b]).unwrap();
        let fused = sch.fuse(&parts).unwrap();
        let binding = &sch.block(block(&sch, "B")).unwrap().bindings[0];
        let x = point % extent;
        prop_assert_eq!(binding.eval(&|v| if *v == fused { x } else { 0 }), x);
    }
}
