//! SH conditional/unconditional branch relaxation boundaries.
//!
//! Conditional (`bt`/`bf`) branches stay 2 bytes out to ±128 bytes and
//! grow to the 8-byte inverted-branch form beyond that. Unconditional
//! (`bra`/`bsr`) branches stay 2 bytes out to their 12-bit window and
//! grow to the full 14-byte trampoline beyond it.

use xcofflink::relax::{relax_step, table_for, RelaxBase, RelaxCandidate};

#[test]
fn conditional_branch_at_126_bytes_stays_short() {
    let c = RelaxCandidate {
        base: RelaxBase::ShCondJump,
        state: 0,
        displacement: 126,
    };
    assert_eq!(relax_step(c), None);
}

#[test]
fn conditional_branch_one_byte_beyond_reach_grows() {
    let c = RelaxCandidate {
        base: RelaxBase::ShCondJump,
        state: 0,
        displacement: 127,
    };
    assert_eq!(relax_step(c), Some(1));
    let grown = table_for(RelaxBase::ShCondJump)[1];
    assert_eq!(grown.length, 8);
}

#[test]
fn unconditional_branch_ten_thousand_bytes_away_upgrades_to_the_14_byte_trampoline() {
    let c = RelaxCandidate {
        base: RelaxBase::ShUncondJump,
        state: 0,
        displacement: 10_000,
    };
    let grown_state = relax_step(c).expect("10000 bytes exceeds the 12-bit bra window");
    let subtype = table_for(RelaxBase::ShUncondJump)[grown_state as usize];
    assert_eq!(subtype.length, 14);
    assert_eq!(subtype.grow_to, None);
}

#[test]
fn unconditional_branch_within_its_window_stays_short() {
    let c = RelaxCandidate {
        base: RelaxBase::ShUncondJump,
        state: 0,
        displacement: 2046,
    };
    assert_eq!(relax_step(c), None);
}
