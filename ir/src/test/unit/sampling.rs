use rand::SeedableRng;
use rand::rngs::StdRng;
use test_case::test_case;

use crate::test::helpers::*;
use crate::{Error, Schedule, factorize, sample_categorical};

#[test_case(1, &[]; "one")]
#[test_case(97, &[97]; "prime")]
#[test_case(360, &[2, 2, 2, 3, 3, 5]; "composite")]
fn factorize_ascending(n: i64, expected: &[i64]) {
    assert_eq!(factorize(n), expected);
}

#[test]
fn categorical_respects_zero_weights() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..64 {
        assert_eq!(sample_categorical(&[0.0, 1.0, 0.0], &mut rng).unwrap(), 1);
    }
}

#[test_case(&[]; "empty")]
#[test_case(&[0.0, 0.0]; "all zero")]
#[test_case(&[-1.0, 2.0]; "negative")]
fn categorical_rejects_bad_weights(probs: &[f64]) {
    let mut rng = StdRng::seed_from_u64(0);
    assert!(matches!(sample_categorical(probs, &mut rng), Err(Error::InvalidSampling { .. })));
}

#[test]
fn schedule_records_categorical_decision() {
    let mut sch = Schedule::new(elementwise_chain(16));
    let mut rng = StdRng::seed_from_u64(3);
    let picked = sch.sample_categorical(&[0, 16, 64], &[0.0, 0.0, 1.0], &mut rng).unwrap();
    assert_eq!(picked, 64);
    assert_eq!(sch.trace().decisions().count(), 1);
}

#[test]
fn compute_location_candidates_enclose_consumers() {
    let sch = Schedule::new(elementwise_chain(128));
    let b = block(&sch, "B");
    let c_loop = loops(&sch, "C")[0];
    assert_eq!(sch.program().compute_location_candidates(b).unwrap(), vec![c_loop]);

    // The output block has no consumer and stays where it is.
    let c = block(&sch, "C");
    assert!(sch.program().compute_location_candidates(c).unwrap().is_empty());
}

#[test]
fn sampled_compute_location_is_a_candidate() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..16 {
        let mut sch = Schedule::new(elementwise_chain(128));
        let b = block(&sch, "B");
        let c_loop = loops(&sch, "C")[0];
        let picked = sch.sample_compute_location(b, &mut rng).unwrap();
        assert!(picked.is_none() || picked == Some(c_loop));
    }
}
