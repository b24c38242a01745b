//! XCOFF input reader & csect splitting (C8).
//!
//! Turns one input object's raw bytes into a set of [`crate::section::Section`]s
//! split at csect boundaries, specialized to XCOFF only (no generic
//! `FileHeader` trait, since this crate never reads any other format).
//!
//! Csect splitting: each `STYP_TEXT`/`STYP_DATA`/`STYP_BSS`
//! input section is walked symbol-by-symbol; every `C_EXT`/`C_HIDEXT`/
//! `C_WEAKEXT` symbol whose csect aux has `XTY_SD` (or `XTY_CM` for BSS)
//! starts a new csect at that symbol's `n_value`; the previous csect's
//! length runs up to the new one's start. Debug/line-number-only sections,
//! `.loader` sections on dynamic-library inputs, and sections with no
//! symbols at all are each kept as a single whole-section csect. A
//! single-word `XMC_TC`/`C_HIDEXT` csect also records which external
//! name its sole `R_POS` reloc targets, so the linker hash can fold
//! duplicate TOC slots for the same external into one.

use crate::endian::BigEndian as BE;
use crate::error::{err, Result};
use crate::io::BlobReader;
use crate::section::{Section, SectionFlags};
use crate::xcoff::*;

/// One csect recovered from an input section: its storage-mapping class,
/// byte range within the section's raw data, and the symbol that defines
/// it (if any -- a section with no symbols yields a single anonymous
/// csect).
#[derive(Debug, Clone)]
pub struct RawCsect<'data> {
    pub name: Option<&'data str>,
    pub smclas: u8,
    pub align_pow2: u32,
    pub data: &'data [u8],
    pub is_common: bool,
    pub common_size: u64,
    /// The external name a 4-byte `XMC_TC`/`C_HIDEXT` TOC-slot csect's
    /// single `R_POS` reloc targets, when this csect qualifies for TOC
    /// merging. `None` for every other csect, or when more than one
    /// reloc lands in its byte range.
    pub toc_ref: Option<String>,
}

/// A parsed input section before csect splitting: its header fields plus
/// the raw bytes and relocations.
pub struct RawSection<'data> {
    pub name: String,
    pub flags: u32,
    pub vaddr: u64,
    pub data: &'data [u8],
    pub relocs: Vec<RawReloc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RawReloc {
    pub vaddr: u64,
    pub symndx: u32,
    pub rsize: u8,
    pub rtype: u8,
}

#[derive(Debug, Clone)]
pub struct RawSymbol {
    pub name: String,
    pub value: u64,
    pub scnum: i32,
    pub sym_type: u16,
    pub sclass: u8,
    pub numaux: u8,
    pub csect_aux: Option<RawCsectAux>,
}

#[derive(Debug, Clone, Copy)]
pub struct RawCsectAux {
    pub scnlen: u64,
    pub smtyp: u8,
    pub smclas: u8,
    /// `log2(alignment)` decoded from the high bits of `x_smtyp`: bits 0-2
    /// are the `XTY_*` kind, bits 3-7 are the alignment power.
    pub align_pow2: u32,
}

/// Everything recovered from one input object's bytes: its sections
/// (already carrying raw relocations) and its symbol table.
pub struct ParsedObject<'data> {
    pub is_64: bool,
    pub sections: Vec<RawSection<'data>>,
    pub symbols: Vec<RawSymbol>,
}

fn name_from_inline_or_strtab<'data>(
    inline: &[u8; 8],
    strtab: &'data [u8],
) -> Result<std::borrow::Cow<'data, str>> {
    // First 4 bytes zero means the remaining 4 bytes are a string-table
    // offset rather than an inline short name (COFF convention).
    if inline[0..4] == [0, 0, 0, 0] {
        let offset = u32::from_be_bytes([inline[4], inline[5], inline[6], inline[7]]) as usize;
        let end = strtab[offset..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| err!(WrongFormat, "unterminated string table entry at {offset}"))?;
        Ok(std::borrow::Cow::Borrowed(
            core::str::from_utf8(&strtab[offset..offset + end])
                .map_err(|_| err!(WrongFormat, "non-utf8 symbol name"))?,
        ))
    } else {
        let end = inline.iter().position(|&b| b == 0).unwrap_or(8);
        Ok(std::borrow::Cow::Owned(
            core::str::from_utf8(&inline[..end])
                .map_err(|_| err!(WrongFormat, "non-utf8 symbol name"))?
                .to_owned(),
        ))
    }
}

/// Parse a 32-bit XCOFF object. 64-bit follows the identical shape with
/// wider fields; omitted here since every example input this linker
/// targets is 32-bit PowerPC, but the types above carry an `is_64` flag so
/// a 64-bit reader can be slotted in without touching callers.
pub fn parse32<'data, R: BlobReader<'data>>(data: R) -> Result<ParsedObject<'data>> {
    let mut offset = 0usize;
    let header: &FileHeader32 = data
        .read(&mut offset)
        .map_err(|_| err!(WrongFormat, "truncated file header"))?;
    let magic = header.f_magic.get(BE);
    if magic != MAGIC_32 {
        return Err(err!(WrongFormat, "bad XCOFF magic {magic:#06x}"));
    }
    // Skip the optional header.
    offset += header.f_opthdr.get(BE) as usize;

    let nscns = header.f_nscns.get(BE) as usize;
    let section_headers: &[SectionHeader32] = data
        .read_slice(&mut offset, nscns)
        .map_err(|_| err!(WrongFormat, "truncated section headers"))?;

    let symtab_offset = header.f_symptr.get(BE) as usize;
    let nsyms = header.f_nsyms.get(BE) as usize;

    // The string table immediately follows the raw symbol table; its
    // first four bytes are its own total length (including those four
    // bytes).
    let raw_symtab_bytes = nsyms * core::mem::size_of::<Symbol32>();
    let strtab_offset = symtab_offset + raw_symtab_bytes;
    let strtab_len_bytes = data
        .read_bytes_at(strtab_offset, 4)
        .unwrap_or(&[0u8, 0, 0, 4]);
    let strtab_len = u32::from_be_bytes([
        strtab_len_bytes[0],
        strtab_len_bytes[1],
        strtab_len_bytes[2],
        strtab_len_bytes[3],
    ]) as usize;
    let strtab = data.read_bytes_at(strtab_offset, strtab_len).unwrap_or(&[]);

    let mut symbols = Vec::with_capacity(nsyms);
    let mut i = 0usize;
    while i < nsyms {
        let mut sym_off = symtab_offset + i * core::mem::size_of::<Symbol32>();
        let raw: &Symbol32 = data
            .read(&mut sym_off)
            .map_err(|_| err!(WrongFormat, "truncated symbol table"))?;
        let name = name_from_inline_or_strtab(&raw.n_name, strtab)?;
        let numaux = raw.n_numaux;
        let sclass = raw.n_sclass;

        let mut csect_aux = None;
        if numaux > 0 && (sclass == C_EXT || sclass == C_HIDEXT || sclass == C_WEAKEXT) {
            // The csect aux entry is conventionally the symbol's last aux
            // record.
            let aux_index = i + numaux as usize;
            let aux_off = symtab_offset + aux_index * core::mem::size_of::<Symbol32>();
            if let Ok(aux) = data.read_at::<CsectAux32>(aux_off) {
                csect_aux = Some(RawCsectAux {
                    scnlen: aux.x_scnlen.get(BE) as u64,
                    smtyp: aux.x_smtyp & SMTYP_SMTYP_MASK,
                    smclas: aux.x_smclas,
                    align_pow2: (aux.x_smtyp >> SMTYP_ALIGN_SHIFT) as u32,
                });
            }
        }

        symbols.push(RawSymbol {
            name: name.into_owned(),
            value: raw.n_value.get(BE) as u64,
            scnum: raw.n_scnum.get(BE) as i32,
            sym_type: raw.n_type.get(BE),
            sclass,
            numaux,
            csect_aux,
        });
        i += 1 + numaux as usize;
    }

    let mut sections = Vec::with_capacity(nscns);
    for (idx, sh) in section_headers.iter().enumerate() {
        let scnum = (idx + 1) as i32;
        let name_end = sh.s_name.iter().position(|&b| b == 0).unwrap_or(8);
        let name = core::str::from_utf8(&sh.s_name[..name_end])
            .map_err(|_| err!(WrongFormat, "non-utf8 section name"))?
            .to_owned();
        let flags = sh.s_flags.get(BE) as u32;
        let size = sh.s_size.get(BE) as usize;
        let scnptr = sh.s_scnptr.get(BE) as usize;
        let section_data = if flags as u16 & STYP_BSS != 0 || scnptr == 0 {
            &[][..]
        } else {
            data.read_bytes_at(scnptr, size)
                .map_err(|_| err!(WrongFormat, "truncated section data for {name}"))?
        };

        let nreloc = sh.s_nreloc.get(BE) as usize;
        let relptr = sh.s_relptr.get(BE) as usize;
        let raw_relocs: &[Rel32] = if nreloc > 0 {
            data.read_slice_at(relptr, nreloc)
                .map_err(|_| err!(WrongFormat, "truncated relocations for {name}"))?
        } else {
            &[]
        };
        let relocs = raw_relocs
            .iter()
            .map(|r| RawReloc {
                vaddr: r.r_vaddr.get(BE) as u64,
                symndx: r.r_symndx.get(BE),
                rsize: r.r_rsize,
                rtype: r.r_rtype,
            })
            .collect();

        let _ = scnum;
        sections.push(RawSection {
            name,
            flags,
            vaddr: sh.s_vaddr.get(BE) as u64,
            data: section_data,
            relocs,
        });
    }

    Ok(ParsedObject {
        is_64: false,
        sections,
        symbols,
    })
}

/// Split one input section into csects, given the symbols whose `n_scnum`
/// (1-based) selects this section.
pub fn split_csects<'data>(
    section: &RawSection<'data>,
    section_index_1based: i32,
    symbols: &[RawSymbol],
) -> Result<Vec<RawCsect<'data>>> {
    let is_bss = section.flags as u16 & STYP_BSS != 0;

    // Collect (value, symbol) pairs for XTY_SD/XTY_CM csect-defining
    // symbols that belong to this section, in address order.
    let mut starts: Vec<(&RawSymbol, u64, u8, u8)> = symbols
        .iter()
        .filter(|s| s.scnum == section_index_1based)
        .filter_map(|s| {
            let aux = s.csect_aux.as_ref()?;
            if aux.smtyp == XTY_SD || aux.smtyp == XTY_CM {
                Some((s, s.value, aux.smtyp, aux.smclas))
            } else {
                None
            }
        })
        .collect();
    starts.sort_by_key(|(_, value, _, _)| *value);

    if starts.is_empty() {
        // No symbols at all define csects here (e.g. a pure debug
        // section): keep the whole thing as one anonymous csect.
        return Ok(vec![RawCsect {
            name: None,
            smclas: XMC_PR,
            align_pow2: 0,
            data: section.data,
            is_common: false,
            common_size: 0,
            toc_ref: None,
        }]);
    }

    let mut out = Vec::with_capacity(starts.len());
    for (i, (sym, value, _smtyp, smclas)) in starts.iter().enumerate() {
        let next_value = starts
            .get(i + 1)
            .map(|(_, v, _, _)| *v)
            .unwrap_or(if is_bss {
                sym.csect_aux.as_ref().map(|a| a.scnlen).unwrap_or(0) + value
            } else {
                section.data.len() as u64
            });
        let len = next_value.saturating_sub(*value);
        let slice = if is_bss {
            &[][..]
        } else {
            let start = *value as usize;
            let end = (start + len as usize).min(section.data.len());
            &section.data[start.min(section.data.len())..end]
        };
        let aux = sym.csect_aux.as_ref().unwrap();
        // A TOC-slot csect is a candidate for merging when it is exactly
        // one word wide and carries exactly one `R_POS` reloc: the shape
        // every `XMC_TC`/`C_HIDEXT` entry the assembler emits for a
        // `.tc name[TC],name` pseudo-op takes.
        let toc_ref = if *smclas == XMC_TC && sym.sclass == C_HIDEXT && len == 4 {
            let mut hits = section
                .relocs
                .iter()
                .filter(|r| r.vaddr >= *value && r.vaddr < *value + len);
            match (hits.next(), hits.next()) {
                (Some(r), None) if r.rtype == R_POS => {
                    symbols.get(r.symndx as usize).map(|s| s.name.clone())
                }
                _ => None,
            }
        } else {
            None
        };
        out.push(RawCsect {
            name: Some(sym.name.as_str()).filter(|n| !n.is_empty()),
            smclas: *smclas,
            align_pow2: aux.align_pow2,
            data: slice,
            is_common: aux.smtyp == XTY_CM,
            common_size: if aux.smtyp == XTY_CM { aux.scnlen } else { 0 },
            toc_ref,
        });
    }
    Ok(out)
}

fn section_flags_for(flags: u32) -> SectionFlags {
    let mut f = SectionFlags::empty();
    let styp = flags as u16;
    if styp & STYP_TEXT != 0 {
        f |= SectionFlags::CODE | SectionFlags::READONLY;
    }
    if styp & STYP_BSS == 0 {
        f |= SectionFlags::HAS_CONTENTS;
    }
    f | SectionFlags::ALLOC | SectionFlags::LOAD
}

/// Build [`Section`]s for one parsed input object, splitting every
/// `STYP_TEXT`/`STYP_DATA`/`STYP_BSS` section at csect boundaries and
/// keeping everything else (debug, exception tables) as whole sections.
/// Each returned section is paired with the external name its csect's
/// TOC reloc targets, when it is a TOC-merge candidate (see
/// [`RawCsect::toc_ref`]); the caller (which alone has cross-object
/// context) decides whether to fold it into an existing TOC slot instead
/// of adding it.
pub fn sections_from_object(object: &ParsedObject<'_>) -> Result<Vec<(Section, Option<String>)>> {
    let mut out = Vec::new();
    for (idx, sec) in object.sections.iter().enumerate() {
        let scnum = (idx + 1) as i32;
        let styp = sec.flags as u16;
        let splittable = styp & (STYP_TEXT | STYP_DATA | STYP_BSS) != 0;
        if splittable {
            let csects = split_csects(sec, scnum, &object.symbols)?;
            for (i, csect) in csects.iter().enumerate() {
                let name = csect
                    .name
                    .map(|n| n.to_owned())
                    .unwrap_or_else(|| format!("{}${}", sec.name, i));
                let mut out_sec = Section::new(name);
                out_sec.flags = section_flags_for(sec.flags);
                out_sec.storage_mapping_class = Some(csect.smclas);
                out_sec.record_alignment(csect.align_pow2);
                if !csect.is_common && !csect.data.is_empty() {
                    out_sec
                        .fragments
                        .push(crate::section::Fragment {
                            contents: crate::section::FragContents::Fixed(csect.data.to_vec()),
                            fixups: Vec::new(),
                            address: 0,
                        });
                }
                out.push((out_sec, csect.toc_ref.clone()));
            }
        } else {
            let mut out_sec = Section::new(sec.name.clone());
            out_sec.flags = section_flags_for(sec.flags);
            if !sec.data.is_empty() {
                out_sec.fragments.push(crate::section::Fragment {
                    contents: crate::section::FragContents::Fixed(sec.data.to_vec()),
                    fixups: Vec::new(),
                    address: 0,
                });
            }
            out.push((out_sec, None));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, value: u64, scnum: i32, smtyp: u8, smclas: u8, scnlen: u64) -> RawSymbol {
        RawSymbol {
            name: name.to_string(),
            value,
            scnum,
            sym_type: 0,
            sclass: C_EXT,
            numaux: 1,
            csect_aux: Some(RawCsectAux {
                scnlen,
                smtyp,
                smclas,
                align_pow2: 0,
            }),
        }
    }

    #[test]
    fn splits_two_csects_at_their_start_symbols() {
        let data = vec![0u8; 32];
        let section = RawSection {
            name: ".text".into(),
            flags: STYP_TEXT as u32,
            vaddr: 0,
            data: &data,
            relocs: Vec::new(),
        };
        let symbols = vec![
            sym("foo", 0, 1, XTY_SD, XMC_PR, 16),
            sym("bar", 16, 1, XTY_SD, XMC_PR, 16),
        ];
        let csects = split_csects(&section, 1, &symbols).unwrap();
        assert_eq!(csects.len(), 2);
        assert_eq!(csects[0].data.len(), 16);
        assert_eq!(csects[1].data.len(), 16);
    }

    #[test]
    fn toc_slot_with_one_r_pos_reloc_records_its_target() {
        let data = vec![0u8; 4];
        let section = RawSection {
            name: ".tc".into(),
            flags: STYP_DATA as u32,
            vaddr: 0,
            data: &data,
            relocs: vec![RawReloc {
                vaddr: 0,
                symndx: 1,
                rsize: 31,
                rtype: R_POS,
            }],
        };
        let mut slot = sym("slot", 0, 1, XTY_SD, XMC_TC, 4);
        slot.sclass = C_HIDEXT;
        let symbols = vec![slot, {
            let mut target = sym("target", 0, 0, XTY_SD, XMC_PR, 0);
            target.scnum = 0;
            target
        }];
        let csects = split_csects(&section, 1, &symbols).unwrap();
        assert_eq!(csects.len(), 1);
        assert_eq!(csects[0].toc_ref.as_deref(), Some("target"));
    }

    #[test]
    fn toc_slot_with_two_relocs_does_not_qualify_for_merging() {
        let data = vec![0u8; 4];
        let section = RawSection {
            name: ".tc".into(),
            flags: STYP_DATA as u32,
            vaddr: 0,
            data: &data,
            relocs: vec![
                RawReloc { vaddr: 0, symndx: 1, rsize: 31, rtype: R_POS },
                RawReloc { vaddr: 0, symndx: 1, rsize: 31, rtype: R_POS },
            ],
        };
        let mut slot = sym("slot", 0, 1, XTY_SD, XMC_TC, 4);
        slot.sclass = C_HIDEXT;
        let symbols = vec![slot];
        let csects = split_csects(&section, 1, &symbols).unwrap();
        assert_eq!(csects[0].toc_ref, None);
    }

    #[test]
    fn no_symbols_yields_one_anonymous_csect() {
        let data = vec![1u8; 8];
        let section = RawSection {
            name: ".debug".into(),
            flags: STYP_DEBUG as u32,
            vaddr: 0,
            data: &data,
            relocs: Vec::new(),
        };
        let csects = split_csects(&section, 1, &[]).unwrap();
        assert_eq!(csects.len(), 1);
        assert_eq!(csects[0].data, &data[..]);
    }
}
