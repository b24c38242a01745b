//! Final XCOFF emission (part of C13).
//!
//! Writes the object/executable image: file header, section headers,
//! raw section data, relocations, symbol table (with csect aux entries),
//! string table, and (if present) the `.loader` section. Two-pass shape:
//! first compute every offset ("sizing precedes writing"), then emit.

use crate::endian::BigEndian as BE;
use crate::error::{err, Result};
use crate::io::BlobWriter;
use crate::pod::{bytes_of, bytes_of_slice};
use crate::section::{Section, SectionTable};
use crate::strtab::StringTable;
use crate::xcoff::*;

const FILE_HEADER_SIZE: usize = core::mem::size_of::<FileHeader32>();
const SECTION_HEADER_SIZE: usize = core::mem::size_of::<SectionHeader32>();
const REL_SIZE: usize = core::mem::size_of::<Rel32>();
const SYMBOL_SIZE: usize = core::mem::size_of::<Symbol32>();
const LOADER_HEADER_SIZE: usize = core::mem::size_of::<LdHeader>();
const LD_SYM_SIZE: usize = core::mem::size_of::<LdSym>();
const LD_REL_SIZE: usize = core::mem::size_of::<LdRel>();

/// The fully-built `.loader` section contents, as handed over by
/// [`crate::link::loader::LoaderBuilder::build`]: symbol table, relocation
/// table, import-file table, and the string table backing any over-8-byte
/// loader symbol name. `write_xcoff32` owns turning these into the
/// section's header and byte layout.
pub struct OutLoader {
    pub ld_syms: Vec<LdSym>,
    pub ld_rels: Vec<LdRel>,
    pub import_bytes: Vec<u8>,
    pub strtab_bytes: Vec<u8>,
    pub n_impid: u32,
}

/// A symbol ready for emission: name, value, owning output section index
/// (1-based, 0 = absolute/undefined), storage class, and optional csect
/// aux fields.
pub struct OutSymbol {
    pub name: String,
    pub value: u32,
    pub section_index: i16,
    pub sclass: u8,
    pub csect: Option<OutCsectAux>,
}

pub struct OutCsectAux {
    pub scnlen: u32,
    pub smtyp: u8,
    pub smclas: u8,
}

/// Plan for one emitted relocation.
pub struct OutReloc {
    pub section_index: usize,
    pub vaddr: u32,
    pub symndx: u32,
    pub rsize: u8,
    pub rtype: u8,
}

/// Everything the writer needs, already finalized by the link pass: final
/// section list (with addresses assigned), the output symbol table, and
/// relocations grouped by the section they apply to.
pub struct XcoffImage<'a> {
    pub sections: &'a SectionTable,
    pub symbols: Vec<OutSymbol>,
    pub relocs: Vec<OutReloc>,
    pub entry_vaddr: Option<u32>,
    pub flags: u16,
    pub loader: Option<OutLoader>,
}

enum PackedName {
    Inline([u8; 8]),
    Long(crate::strtab::StringId),
}

fn pack_name(name: &str, strtab: &mut StringTable) -> PackedName {
    let bytes = name.as_bytes();
    if bytes.len() <= 8 {
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        PackedName::Inline(buf)
    } else {
        PackedName::Long(strtab.add(bytes))
    }
}

/// Serialize `image` into `out`, returning the total byte length written.
pub fn write_xcoff32<W: BlobWriter>(image: &XcoffImage<'_>, out: &mut W) -> Result<usize> {
    let base_nscns = image.sections.len();
    let nscns = base_nscns + image.loader.is_some() as usize;
    let mut strtab = StringTable::new();

    // --- Sizing pass ---
    let mut offset = FILE_HEADER_SIZE + nscns * SECTION_HEADER_SIZE;
    let mut section_data_offsets = Vec::with_capacity(base_nscns);
    let mut section_reloc_offsets = vec![0usize; base_nscns];
    let mut relocs_by_section: Vec<Vec<&OutReloc>> = vec![Vec::new(); base_nscns];
    for r in &image.relocs {
        relocs_by_section[r.section_index].push(r);
    }

    for (id, section) in image.sections.iter() {
        let has_bytes = section.size() > 0 && !is_bss_like(section);
        if has_bytes {
            section_data_offsets.push(offset);
            offset += section.size() as usize;
        } else {
            section_data_offsets.push(0);
        }
        let _ = id;
    }
    for (idx, relocs) in relocs_by_section.iter().enumerate() {
        if !relocs.is_empty() {
            section_reloc_offsets[idx] = offset;
            offset += relocs.len() * REL_SIZE;
        }
    }

    let symtab_offset = offset;
    let mut packed_names = Vec::with_capacity(image.symbols.len());
    let mut nsyms = 0u32;
    for sym in &image.symbols {
        packed_names.push(pack_name(&sym.name, &mut strtab));
        nsyms += 1 + sym.csect.is_some() as u32;
    }
    offset += nsyms as usize * SYMBOL_SIZE;

    let strtab_base = 4;
    let strtab_len = strtab.len(strtab_base);
    offset += strtab_len;

    // The `.loader` section's own byte layout (header, symbols, relocs,
    // import-file table, string table) is fixed entirely by the builder's
    // output; only its position in the file is decided here.
    let loader_section_offset = offset;
    let loader_len = image.loader.as_ref().map_or(0, |loader| {
        LOADER_HEADER_SIZE
            + loader.ld_syms.len() * LD_SYM_SIZE
            + loader.ld_rels.len() * LD_REL_SIZE
            + loader.import_bytes.len()
            + loader.strtab_bytes.len()
    });
    offset += loader_len;

    out.reserve(offset)
        .map_err(|_| err!(NoMemory, "failed to reserve output buffer"))?;

    // Assign final string-table offsets before the symbols that reference
    // them are serialized.
    let mut strtab_bytes = Vec::new();
    strtab.write(strtab_base, &mut strtab_bytes);

    // --- Emission pass ---
    let header = FileHeader32 {
        f_magic: U16u(MAGIC_32),
        f_nscns: U16u(nscns as u16),
        f_timdat: U32u(0),
        f_symptr: U32u(symtab_offset as u32),
        f_nsyms: U32u(nsyms),
        f_opthdr: U16u(0),
        f_flags: U16u(image.flags),
    };
    out.write_at(0, bytes_of(&header))
        .map_err(|_| err!(NoMemory, "write failed"))?;

    let mut sh_offset = FILE_HEADER_SIZE;
    for (i, (_, section)) in image.sections.iter().enumerate() {
        let styp = styp_for(section);
        let sh = SectionHeader32 {
            s_name: section_name_bytes(&section.name),
            s_paddr: U32u(section.vma as u32),
            s_vaddr: U32u(section.vma as u32),
            s_size: U32u(section.size() as u32),
            s_scnptr: U32u(section_data_offsets[i] as u32),
            s_relptr: U32u(section_reloc_offsets[i] as u32),
            s_lnnoptr: U32u(0),
            s_nreloc: U16u(relocs_by_section[i].len() as u16),
            s_nlnno: U16u(0),
            s_flags: U16u(styp),
        };
        out.write_at(sh_offset, bytes_of(&sh))
            .map_err(|_| err!(NoMemory, "write failed"))?;
        sh_offset += SECTION_HEADER_SIZE;

        if section_data_offsets[i] != 0 {
            let mut buf = Vec::with_capacity(section.size() as usize);
            for frag in &section.fragments {
                buf.extend_from_slice(frag.bytes());
            }
            out.write_at(section_data_offsets[i], &buf)
                .map_err(|_| err!(NoMemory, "write failed"))?;
        }
        let mut reloc_offset = section_reloc_offsets[i];
        for r in &relocs_by_section[i] {
            let rel = Rel32 {
                r_vaddr: U32u(r.vaddr),
                r_symndx: U32u(r.symndx),
                r_rsize: r.rsize,
                r_rtype: r.rtype,
            };
            out.write_at(reloc_offset, bytes_of(&rel))
                .map_err(|_| err!(NoMemory, "write failed"))?;
            reloc_offset += REL_SIZE;
        }
    }

    if let Some(loader) = &image.loader {
        let sh = SectionHeader32 {
            s_name: section_name_bytes(".loader"),
            s_paddr: U32u(0),
            s_vaddr: U32u(0),
            s_size: U32u(loader_len as u32),
            s_scnptr: U32u(loader_section_offset as u32),
            s_relptr: U32u(0),
            s_lnnoptr: U32u(0),
            s_nreloc: U16u(0),
            s_nlnno: U16u(0),
            s_flags: U16u(STYP_LOADER),
        };
        out.write_at(sh_offset, bytes_of(&sh))
            .map_err(|_| err!(NoMemory, "write failed"))?;

        let syms_len = loader.ld_syms.len() * LD_SYM_SIZE;
        let rels_len = loader.ld_rels.len() * LD_REL_SIZE;
        let impoff = LOADER_HEADER_SIZE + syms_len + rels_len;
        let stoff = impoff + loader.import_bytes.len();
        let ld_header = LdHeader {
            l_version: U32u(LDHDR_VERSION),
            l_nsyms: U32u(loader.ld_syms.len() as u32),
            l_nreloc: U32u(loader.ld_rels.len() as u32),
            l_istlen: U32u(loader.import_bytes.len() as u32),
            l_nimpid: U32u(loader.n_impid),
            l_impoff: U32u(impoff as u32),
            l_stlen: U32u(loader.strtab_bytes.len() as u32),
            l_stoff: U32u(stoff as u32),
        };
        out.write_at(loader_section_offset, bytes_of(&ld_header))
            .map_err(|_| err!(NoMemory, "write failed"))?;
        out.write_at(
            loader_section_offset + LOADER_HEADER_SIZE,
            bytes_of_slice(&loader.ld_syms),
        )
        .map_err(|_| err!(NoMemory, "write failed"))?;
        out.write_at(
            loader_section_offset + LOADER_HEADER_SIZE + syms_len,
            bytes_of_slice(&loader.ld_rels),
        )
        .map_err(|_| err!(NoMemory, "write failed"))?;
        out.write_at(loader_section_offset + impoff, &loader.import_bytes)
            .map_err(|_| err!(NoMemory, "write failed"))?;
        out.write_at(loader_section_offset + stoff, &loader.strtab_bytes)
            .map_err(|_| err!(NoMemory, "write failed"))?;
    }

    let mut sym_offset = symtab_offset;
    for (sym, packed) in image.symbols.iter().zip(packed_names.iter()) {
        let n_name = match packed {
            PackedName::Inline(buf) => *buf,
            PackedName::Long(id) => {
                let mut buf = [0u8; 8];
                buf[4..8].copy_from_slice(&(strtab.get_offset(*id) as u32).to_be_bytes());
                buf
            }
        };
        let raw = Symbol32 {
            n_name,
            n_value: U32u(sym.value),
            n_scnum: U16u(sym.section_index as u16),
            n_type: U16u(0),
            n_sclass: sym.sclass,
            n_numaux: sym.csect.is_some() as u8,
        };
        out.write_at(sym_offset, bytes_of(&raw))
            .map_err(|_| err!(NoMemory, "write failed"))?;
        sym_offset += SYMBOL_SIZE;
        if let Some(csect) = &sym.csect {
            let aux = CsectAux32 {
                x_scnlen: U32u(csect.scnlen),
                x_parmhash: U32u(0),
                x_snhash: U16u(0),
                x_smtyp: csect.smtyp,
                x_smclas: csect.smclas,
                x_stab: U32u(0),
                x_snstab: U16u(0),
            };
            out.write_at(sym_offset, bytes_of(&aux))
                .map_err(|_| err!(NoMemory, "write failed"))?;
            sym_offset += SYMBOL_SIZE;
        }
    }

    let mut strtab_image = Vec::with_capacity(strtab_len);
    strtab_image.extend_from_slice(&(strtab_len as u32).to_be_bytes());
    strtab_image.extend_from_slice(&strtab_bytes);
    out.write_at(symtab_offset + nsyms as usize * SYMBOL_SIZE, &strtab_image)
        .map_err(|_| err!(NoMemory, "write failed"))?;

    Ok(offset)
}

fn is_bss_like(section: &Section) -> bool {
    section.storage_mapping_class == Some(XMC_BS)
        || (!section.flags.contains(crate::section::SectionFlags::HAS_CONTENTS))
}

fn styp_for(section: &Section) -> u16 {
    if section.flags.contains(crate::section::SectionFlags::CODE) {
        STYP_TEXT
    } else if is_bss_like(section) {
        STYP_BSS
    } else {
        STYP_DATA
    }
}

fn section_name_bytes(name: &str) -> [u8; 8] {
    let mut buf = [0u8; 8];
    let bytes = name.as_bytes();
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Shorthand constructors for the big-endian wrapper types, since every
/// field in this module uses the same fixed endianness.
#[allow(non_snake_case)]
fn U16u(v: u16) -> crate::endian::U16<BE> {
    crate::endian::U16::new(BE, v)
}
#[allow(non_snake_case)]
fn U32u(v: u32) -> crate::endian::U32<BE> {
    crate::endian::U32::new(BE, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::VecWriter;
    use crate::section::{Section, SectionFlags};

    #[test]
    fn writes_a_single_text_section_with_one_symbol() {
        let mut sections = SectionTable::new();
        let mut text = Section::new(".text");
        text.flags = SectionFlags::CODE | SectionFlags::ALLOC | SectionFlags::LOAD | SectionFlags::HAS_CONTENTS;
        text.fragments.push(crate::section::Fragment {
            contents: crate::section::FragContents::Fixed(vec![0x60, 0x00, 0x00, 0x00]),
            fixups: Vec::new(),
            address: 0,
        });
        sections.add(text);

        let image = XcoffImage {
            sections: &sections,
            symbols: vec![OutSymbol {
                name: ".foo".into(),
                value: 0,
                section_index: 1,
                sclass: C_EXT,
                csect: Some(OutCsectAux {
                    scnlen: 4,
                    smtyp: XTY_SD,
                    smclas: XMC_PR,
                }),
            }],
            relocs: Vec::new(),
            entry_vaddr: None,
            flags: F_EXEC,
            loader: None,
        };

        let mut writer = VecWriter::default();
        let len = write_xcoff32(&image, &mut writer).unwrap();
        assert_eq!(writer.data.len(), len);
        assert_eq!(&writer.data[0..2], &MAGIC_32.to_be_bytes());
    }

    #[test]
    fn emits_a_loader_section_when_present() {
        let sections = SectionTable::new();
        let image = XcoffImage {
            sections: &sections,
            symbols: Vec::new(),
            relocs: Vec::new(),
            entry_vaddr: None,
            flags: F_EXEC,
            loader: Some(OutLoader {
                ld_syms: vec![LdSym {
                    l_name: *b"foo\0\0\0\0\0",
                    l_value: crate::endian::U32::new(BE, 0x1000),
                    l_scnum: crate::endian::U16::new(BE, 1),
                    l_smtype: XTY_SD,
                    l_smclas: XMC_PR,
                    l_ifile: crate::endian::U32::new(BE, 0),
                    l_parm: crate::endian::U32::new(BE, 0),
                }],
                ld_rels: Vec::new(),
                import_bytes: Vec::new(),
                strtab_bytes: Vec::new(),
                n_impid: 0,
            }),
        };

        let mut writer = VecWriter::default();
        let len = write_xcoff32(&image, &mut writer).unwrap();
        assert_eq!(writer.data.len(), len);
        let f_nscns = u16::from_be_bytes([writer.data[2], writer.data[3]]);
        assert_eq!(f_nscns, 1);
    }
}
