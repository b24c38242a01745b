//! TOC-anchor centering, grounded on `xcoff_link_input_bfd`'s handling of
//! the lone `XMC_TC0` symbol: a TOC is addressed through a single base
//! register plus a signed 16-bit displacement, so the linker must place
//! the anchor symbol (conventionally named `TOC`) far enough into the
//! TOC's byte range that every entry is reachable, and reject a TOC too
//! large for any single anchor to reach at all.
//!
//! The anchor starts at the TOC section's own start (the common case: one
//! TOC section, one anchor, nothing ahead of it) and is pushed forward
//! only as far as needed to bring the section's tail within reach, never
//! past `tocend - 0x8000`.

use hashbrown::HashMap;

use crate::error::{err, Result};
use crate::section::SectionId;

/// Folds duplicate `XMC_TC`/`C_HIDEXT` TOC-slot csects that target the
/// same external symbol into one output TOC section: two input objects
/// each defining their own one-word TOC entry for `foo` must collapse
/// into a single slot, or every reference through it would see a
/// different address. Keyed by a CRC32 of the target name,
/// the same hash-then-compare shape `strtab.rs` uses for its own
/// string-arena de-dup, just keyed on the TOC target instead of the
/// string bytes themselves.
#[derive(Default)]
pub struct TocMerger {
    by_hash: HashMap<u32, Vec<(String, SectionId)>>,
}

impl TocMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The output section already holding a TOC slot for `target`, if a
    /// prior object has already defined one.
    pub fn find(&self, target: &str) -> Option<SectionId> {
        let hash = crc32fast::hash(target.as_bytes());
        self.by_hash
            .get(&hash)?
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, id)| *id)
    }

    /// Record that `target`'s TOC slot lives in `section`, for later
    /// lookups by [`TocMerger::find`].
    pub fn insert(&mut self, target: String, section: SectionId) {
        let hash = crc32fast::hash(target.as_bytes());
        self.by_hash.entry(hash).or_default().push((target, section));
    }
}

/// Forward reach of a signed 16-bit displacement from the anchor.
pub const TOC_ANCHOR_BIAS: u64 = 0x8000;

/// The largest span a single anchor can ever cover, even after shifting
/// all the way to `tocend - 0x8000`: a TOC this size or larger is
/// rejected outright.
pub const TOC_MAX_SPAN: u64 = 0x1_0000;

/// Compute the `TOC` anchor's value from the TOC section's start/end
/// addresses, rejecting a span no single anchor could reach.
pub fn toc_anchor(toc_start: u64, toc_end: u64) -> Result<u64> {
    let span = toc_end.saturating_sub(toc_start);
    if span >= TOC_MAX_SPAN {
        return Err(err!(
            FileTooBig,
            "TOC spans {span:#x} bytes, exceeding the {TOC_MAX_SPAN:#x}-byte reach of a single anchor; try a minimal-TOC build"
        ));
    }
    if span > TOC_ANCHOR_BIAS {
        Ok(toc_end - TOC_ANCHOR_BIAS)
    } else {
        Ok(toc_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_stays_at_toc_start_when_the_whole_toc_is_in_reach() {
        assert_eq!(toc_anchor(0x1000, 0x1100).unwrap(), 0x1000);
    }

    #[test]
    fn anchor_shifts_toward_the_end_once_the_toc_outgrows_one_bias() {
        let toc_start = 0x1000;
        let toc_end = toc_start + TOC_ANCHOR_BIAS + 4;
        assert_eq!(toc_anchor(toc_start, toc_end).unwrap(), toc_end - TOC_ANCHOR_BIAS);
    }

    #[test]
    fn anchor_accepts_a_span_one_below_the_limit() {
        let toc_start = 0x1000;
        let toc_end = toc_start + TOC_MAX_SPAN - 4;
        assert_eq!(toc_anchor(toc_start, toc_end).unwrap(), toc_end - TOC_ANCHOR_BIAS);
    }

    #[test]
    fn anchor_rejects_a_span_at_exactly_the_limit() {
        let toc_start = 0x1000;
        assert!(toc_anchor(toc_start, toc_start + TOC_MAX_SPAN).is_err());
    }

    #[test]
    fn second_slot_for_the_same_target_reuses_the_first() {
        let mut merger = TocMerger::new();
        merger.insert("foo".to_string(), SectionId(3));
        assert_eq!(merger.find("foo"), Some(SectionId(3)));
        assert_eq!(merger.find("bar"), None);
    }

    #[test]
    fn distinct_targets_never_collapse_even_on_a_hash_collision() {
        let mut merger = TocMerger::new();
        merger.insert("foo".to_string(), SectionId(1));
        merger.insert("bar".to_string(), SectionId(2));
        assert_eq!(merger.find("foo"), Some(SectionId(1)));
        assert_eq!(merger.find("bar"), Some(SectionId(2)));
    }
}
