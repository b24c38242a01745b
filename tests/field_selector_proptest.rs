//! Property tests for the HP-PA field-selector arithmetic: the paired
//! `L`/`R` (and `LD`/`RD`) selectors must always reconstruct the original
//! value through the real `<<11` split `evaluate_absolute` uses, not
//! through the tautological `L + R == v` identity that holds no matter
//! how `L`/`R` are defined.

use proptest::prelude::*;
use xcofflink::encode::hppa::sign_extend;
use xcofflink::fixup::FieldSelector;

/// Sign-extend from bit 13, matching the 14-bit field width the low half
/// of a field-selector pair is eventually stored into. A no-op for values
/// already in range, which both `R` (`[0, 0x7ff]`) and `RD` (`[-0x800,
/// -1]`) always are.
fn sign_extend_14(v: i64) -> i64 {
    sign_extend((v as u32) & 0x3fff, 14) as i64
}

proptest! {
    #[test]
    fn l_and_r_reconstruct_any_32_bit_value(v in any::<i32>()) {
        let v = v as i64;
        let reconstructed = (FieldSelector::L.apply(v) << 11) + sign_extend_14(FieldSelector::R.apply(v));
        prop_assert_eq!(reconstructed, v);
    }

    #[test]
    fn ld_and_rd_reconstruct_any_32_bit_value(v in any::<i32>()) {
        let v = v as i64;
        // `ld`/`rd` bias the split by +0x800 before rounding, so the pair
        // only reconstructs `v` away from the extreme end of the 32-bit
        // range where that bias itself overflows; stay inside the range
        // real addends live in.
        prop_assume!(v < i32::MAX as i64 - 0x800);
        let reconstructed = (FieldSelector::LD.apply(v) << 11) + sign_extend_14(FieldSelector::RD.apply(v));
        prop_assert_eq!(reconstructed, v);
    }

    #[test]
    fn r_stays_within_unsigned_11_bit_range(v in any::<i32>()) {
        let v = v as i64;
        let r = FieldSelector::R.apply(v);
        prop_assert!((0..0x800).contains(&r));
    }

    #[test]
    fn rs_stays_within_unsigned_11_bit_range(v in any::<i32>()) {
        let v = v as i64;
        let rs = FieldSelector::RS.apply(v);
        prop_assert!((-0x800..0x800).contains(&rs));
    }

    #[test]
    fn none_and_f_are_both_the_identity(v in any::<i32>()) {
        let v = v as i64;
        prop_assert_eq!(FieldSelector::None.apply(v), v);
        prop_assert_eq!(FieldSelector::F.apply(v), v);
    }
}
