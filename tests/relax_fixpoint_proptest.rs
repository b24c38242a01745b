//! Property test for the relaxation engine: regardless of how a
//! displacement bounces around between passes, once `run_fixpoint`
//! returns, re-running `relax_step` against the final state for the same
//! displacement must report no further growth.

use proptest::prelude::*;
use xcofflink::relax::{relax_step, run_fixpoint, RelaxBase, RelaxCandidate};

fn all_bases() -> Vec<RelaxBase> {
    vec![
        RelaxBase::ShCondJump,
        RelaxBase::ShUncondJump,
        RelaxBase::W65Branch,
        RelaxBase::AlphaLdgp,
        RelaxBase::HppaCall,
    ]
}

proptest! {
    #[test]
    fn fixpoint_always_converges_to_a_stable_state(
        base_idx in 0..5usize,
        displacement in any::<i32>(),
    ) {
        let base = all_bases()[base_idx];
        let displacement = displacement as i64;
        let candidates = vec![RelaxCandidate { base, state: 0, displacement: 0 }];
        let result = run_fixpoint(candidates, 64, |_, _| displacement);
        let states = result.expect("relaxation must converge within the pass cap");

        let settled = RelaxCandidate { base, state: states[0], displacement };
        prop_assert_eq!(relax_step(settled), None);
    }
}
