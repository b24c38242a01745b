//! TOC anchor boundary behavior: a TOC exactly 0x10000 bytes long rejects,
//! a TOC just under the limit accepts and shifts the anchor toward the
//! section's tail.

use xcofflink::link::toc::{toc_anchor, TOC_ANCHOR_BIAS, TOC_MAX_SPAN};

#[test]
fn toc_exactly_at_the_limit_is_rejected() {
    let toc_start = 0x2000u64;
    let toc_end = toc_start + TOC_MAX_SPAN;
    let err = toc_anchor(toc_start, toc_end).unwrap_err();
    assert_eq!(err.kind, xcofflink::ErrorKind::FileTooBig);
}

#[test]
fn toc_just_under_the_limit_centers_the_anchor_near_the_tail() {
    let toc_start = 0x2000u64;
    let toc_end = toc_start + (TOC_MAX_SPAN - 4);
    let anchor = toc_anchor(toc_start, toc_end).unwrap();
    assert_eq!(anchor, toc_end - TOC_ANCHOR_BIAS);
    // Every entry between toc_start and toc_end must sit within a signed
    // 16-bit displacement of the anchor.
    assert!(toc_end - anchor <= TOC_ANCHOR_BIAS);
    assert!(anchor - toc_start < 0x8000);
}

#[test]
fn a_small_toc_leaves_the_anchor_at_the_start() {
    let anchor = toc_anchor(0x4000, 0x4010).unwrap();
    assert_eq!(anchor, 0x4000);
}
