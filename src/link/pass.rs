//! Final link pass (C13): assign addresses, resolve fixups into output
//! relocations, build the loader section, and emit the image.
//!
//! Follows a "sizing precedes writing" discipline: step 1 assigns every
//! section's final VMA and every fragment's final
//! offset in one forward pass; step 2 walks fixups with those addresses
//! now fixed, folding what can be folded and emitting an output
//! relocation for everything else; step 3 serializes.

use hashbrown::{HashMap, HashSet};

use crate::callbacks::LinkCallbacks;
use crate::config::LinkerConfig;
use crate::error::{err, Result};
use crate::fixup::{Fixup, FixupKind, RelocHowto, Resolution};
use crate::link::gc;
use crate::link::hash::LinkState;
use crate::link::loader::{LoaderBuilder, LoaderReloc, LoaderSymbol, LoaderSymbolId};
use crate::link::stubs::{render_glink_stub, GLINK_STUB_SIZE};
use crate::link::toc::toc_anchor;
use crate::section::{Fragment, FragContents, Section, SectionFlags, SectionId};
use crate::strtab::StringTable;
use crate::symbol::{SymbolFlags, SymbolId, SymbolState};
use crate::xcoff::write::{write_xcoff32, OutCsectAux, OutLoader, OutReloc, OutSymbol, XcoffImage};
use crate::xcoff::{C_EXT, C_HIDEXT, XMC_GL, XMC_PR, XMC_TC0, XTY_SD};

pub struct LinkInput {
    pub state: LinkState,
}

pub struct LinkOutput {
    pub bytes: Vec<u8>,
    pub undefined: Vec<String>,
}

/// Assign VMAs to every surviving section and offsets to every fragment
/// within it, starting at `base`. Sections are laid out in their current
/// table order; callers that want text/data/bss grouping should have
/// already reordered the section table, since this function only
/// linearizes and leaves output section ordering to the caller.
fn assign_addresses(state: &mut LinkState, base: u64) -> u64 {
    let mut vma = base;
    let ids: Vec<_> = state.sections.iter().map(|(id, _)| id).collect();
    for id in ids {
        let section = state.sections.get_mut(id);
        if !section.flags.contains(SectionFlags::MARK) {
            continue;
        }
        let align = 1u64 << section.align_pow2;
        vma = (vma + align - 1) & !(align - 1);
        section.vma = vma;
        let mut offset = 0u64;
        for frag in &mut section.fragments {
            frag.address = offset;
            offset += frag.len() as u64;
        }
        vma += offset;
    }
    vma
}

/// Shift the `TOC` anchor symbol (the lone `XMC_TC0` symbol) forward
/// within its TOC section, once addresses are final, so every entry in
/// the section stays within a signed 16-bit displacement of it.
fn place_toc_anchor(state: &mut LinkState) -> Result<()> {
    let anchor_id = state
        .symbols
        .iter()
        .find(|(_, s)| s.xcoff.storage_mapping_class == XMC_TC0)
        .map(|(id, _)| id);
    let Some(anchor_id) = anchor_id else {
        return Ok(());
    };
    let section = match state.symbols.get(anchor_id).value() {
        Some((section, _)) => section,
        None => return Ok(()),
    };
    let sec = state.sections.get(section);
    let toc_start = sec.vma;
    let toc_end = sec.vma + sec.size();
    let anchor = toc_anchor(toc_start, toc_end)?;
    let symbol = state.symbols.get_mut(anchor_id);
    symbol.state = match symbol.state {
        SymbolState::Defined { .. } => SymbolState::Defined {
            section,
            offset: anchor - toc_start,
        },
        SymbolState::DefinedWeak { .. } => SymbolState::DefinedWeak {
            section,
            offset: anchor - toc_start,
        },
        ref other => other.clone(),
    };
    Ok(())
}

/// Resolve every fixup in every surviving section into either folded
/// bytes (written back into the fragment) or an emitted [`OutReloc`].
fn resolve_fixups(
    state: &mut LinkState,
    callbacks: &mut dyn LinkCallbacks,
) -> Result<Vec<OutReloc>> {
    let mut out_relocs = Vec::new();
    let section_ids: Vec<_> = state.sections.iter().map(|(id, _)| id).collect();

    for sec_id in section_ids {
        if !state.sections.get(sec_id).flags.contains(SectionFlags::MARK) {
            continue;
        }
        let frag_count = state.sections.get(sec_id).fragments.len();
        for frag_idx in 0..frag_count {
            if state.sections.get(sec_id).fragments[frag_idx].fixups.is_empty() {
                continue;
            }
            let fixups = state.sections.get(sec_id).fragments[frag_idx].fixups.clone();
            for fixup in &fixups {
                let symbol = state.symbols.get(fixup.symbol);
                if symbol.state.is_undefined() {
                    if !symbol.weak {
                        let symbol_name = symbol.name.to_string();
                        // The fixup doesn't carry which input file referenced
                        // it, only the owning section.
                        let section_name = state.sections.get(sec_id).name.to_string();
                        callbacks.undefined_symbol(&symbol_name, &section_name);
                        return Err(err!(UndefinedSymbol, "undefined symbol `{symbol_name}`")
                            .with_symbol(symbol_name));
                    }
                    continue;
                }

                let abs_value = symbol
                    .value()
                    .map(|(s, off)| state.sections.get(s).vma + off)
                    .unwrap_or(0);
                if let FixupKind::Data { bits } = fixup.kind {
                    let value = abs_value as i64 + fixup.addend;
                    if bits < 64 && crate::fixup::Fixup::overflows(bits, value, false) {
                        let symbol_name = symbol.name.to_string();
                        let section_name = state.sections.get(sec_id).name.to_string();
                        callbacks.reloc_overflow(&symbol_name, "data", &section_name, &section_name);
                    }
                }
                let resolution = resolve_one(fixup, abs_value as i64);
                match resolution {
                    Resolution::Folded { bytes } => {
                        let section = state.sections.get_mut(sec_id);
                        let frag = &mut section.fragments[frag_idx];
                        let start = fixup.offset as usize;
                        let end = start + bytes.len();
                        frag.bytes_mut()[start..end].copy_from_slice(&bytes);
                    }
                    Resolution::Emit { howto, addend } => {
                        if matches!(howto, RelocHowto::Raw(0))
                            && !matches!(fixup.kind, FixupKind::LinkerResolved { .. })
                        {
                            let symbol_name = symbol.name.to_string();
                            let section_name = state.sections.get(sec_id).name.to_string();
                            callbacks.unattached_reloc(&symbol_name, &section_name, &section_name);
                        }
                        let section = state.sections.get(sec_id);
                        let vaddr = section.vma + section.fragments[frag_idx].address
                            + fixup.offset as u64;
                        out_relocs.push(OutReloc {
                            section_index: sec_id.0 as usize,
                            vaddr: vaddr as u32,
                            symndx: fixup.symbol.0,
                            rsize: rsize_for(&howto),
                            rtype: rtype_for(&howto),
                        });
                        // COFF relocations carry an implicit addend: store
                        // it directly into the field the relocation points
                        // at, the way the reference linker's `r_vaddr`
                        // relocations expect.
                        let width = (rsize_for(&howto) as usize + 1) / 8;
                        if width > 0 && width <= 8 {
                            let bytes = addend.to_be_bytes();
                            let section = state.sections.get_mut(sec_id);
                            let frag = &mut section.fragments[frag_idx];
                            let start = fixup.offset as usize;
                            let end = start + width;
                            if end <= frag.bytes().len() {
                                frag.bytes_mut()[start..end]
                                    .copy_from_slice(&bytes[8 - width..]);
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(out_relocs)
}

fn resolve_one(fixup: &Fixup, symbol_value: i64) -> Resolution {
    match &fixup.kind {
        FixupKind::LinkerResolved { howto } => Resolution::Emit {
            howto: *howto,
            addend: fixup.addend,
        },
        FixupKind::Data { bits } => {
            let value = symbol_value + fixup.addend;
            let bytes = (*bits / 8) as usize;
            Resolution::Folded {
                bytes: value.to_be_bytes()[8 - bytes..].to_vec(),
            }
        }
        // PcRelBranch/Hppa/Alpha fixups are folded during instruction
        // encoding, before a fragment is handed to the linker; seeing one
        // here means the target needed a linker-side relocation it has no
        // output format for. Caller reports this through
        // `LinkCallbacks::unattached_reloc` instead of emitting silently.
        _ => Resolution::Emit {
            howto: RelocHowto::Raw(0),
            addend: symbol_value + fixup.addend,
        },
    }
}

fn rsize_for(howto: &RelocHowto) -> u8 {
    match howto {
        RelocHowto::Pos32 | RelocHowto::Neg32 | RelocHowto::Rel32 => 31,
        RelocHowto::Pos16 | RelocHowto::Rel16 | RelocHowto::Toc16 | RelocHowto::TocU16 => 15,
        RelocHowto::Br26 => 25,
        RelocHowto::Br16 => 15,
        RelocHowto::TlsLoad => 31,
        RelocHowto::Raw(_) => 31,
    }
}

fn rtype_for(howto: &RelocHowto) -> u8 {
    use crate::xcoff::*;
    match howto {
        RelocHowto::Pos32 | RelocHowto::Pos16 => R_POS,
        RelocHowto::Neg32 => R_NEG,
        RelocHowto::Rel32 | RelocHowto::Rel16 => R_REL,
        RelocHowto::Br26 => R_BR,
        RelocHowto::Br16 => R_RBR,
        RelocHowto::Toc16 | RelocHowto::TocU16 => R_TOC,
        RelocHowto::TlsLoad => R_TOC,
        RelocHowto::Raw(b) => *b,
    }
}

/// Synthesize one `.glink` stub per symbol the GC walk flagged
/// [`SymbolFlags::CALLED`] that is still undefined or defined only by a
/// dynamic object once GC has run: the branch that reaches it needs
/// somewhere local to land that the runtime loader can then patch with
/// the real address. Returns each target symbol paired with the stub
/// symbol created for it, in stub (and therefore branch-table) order.
fn synthesize_stubs(state: &mut LinkState) -> Vec<(SymbolId, SymbolId)> {
    let targets: Vec<SymbolId> = state
        .symbols
        .iter()
        .filter(|(_, s)| {
            s.xcoff.flags.contains(SymbolFlags::CALLED)
                && (s.state.is_undefined() || s.xcoff.flags.contains(SymbolFlags::DEF_DYNAMIC))
        })
        .map(|(id, _)| id)
        .collect();
    if targets.is_empty() {
        return Vec::new();
    }

    let mut glink = Section::new(".glink");
    glink.flags = SectionFlags::CODE | SectionFlags::ALLOC | SectionFlags::LOAD | SectionFlags::HAS_CONTENTS
        | SectionFlags::MARK;
    glink.storage_mapping_class = Some(XMC_GL);
    let glink_id = state.sections.add(glink);

    let mut stubs = Vec::with_capacity(targets.len());
    for (index, target) in targets.into_iter().enumerate() {
        let target_name = state.symbols.get(target).name.to_string();
        let stub_id = state.symbols.intern(&format!("{target_name}.glink"));
        state.symbols.get_mut(stub_id).state = SymbolState::Defined {
            section: glink_id,
            offset: (index * GLINK_STUB_SIZE) as u64,
        };
        state.symbols.get_mut(stub_id).xcoff.storage_mapping_class = XMC_GL;

        state.sections.get_mut(glink_id).fragments.push(Fragment {
            contents: FragContents::Fixed(render_glink_stub(index as u32).to_vec()),
            fixups: Vec::new(),
            address: 0,
        });

        stubs.push((target, stub_id));
    }
    stubs
}

/// Redirect every call fixup still aimed at a stubbed symbol to the stub
/// instead, so the emitted branch actually lands somewhere defined.
fn retarget_calls(state: &mut LinkState, stubs: &[(SymbolId, SymbolId)]) {
    if stubs.is_empty() {
        return;
    }
    let retarget: HashMap<SymbolId, SymbolId> = stubs.iter().copied().collect();
    let ids: Vec<SectionId> = state.sections.iter().map(|(id, _)| id).collect();
    for id in ids {
        for fragment in &mut state.sections.get_mut(id).fragments {
            for fixup in &mut fragment.fixups {
                if gc::is_call_fixup(fixup.kind) {
                    if let Some(&stub) = retarget.get(&fixup.symbol) {
                        fixup.symbol = stub;
                    }
                }
            }
        }
    }
}

/// Drive the whole link: GC, stub synthesis, address assignment, fixup
/// resolution, loader section build, and final emission. `roots` are the
/// symbols the GC mark pass starts from (typically the entry symbol plus
/// every exported symbol per `config.export_symbols`).
pub fn link(
    mut input: LinkInput,
    roots: Vec<SymbolId>,
    config: &LinkerConfig,
    callbacks: &mut dyn LinkCallbacks,
) -> Result<LinkOutput> {
    let marked = gc::mark(roots.iter().copied(), &input.state.symbols, &input.state.sections);

    // An undefined entry point means the real entry (resolved at load
    // time) could reach anything; GC can't safely drop a single section,
    // but the walk below still has to run so `ldrel_count` reflects the
    // kept set rather than the would-have-been-marked one.
    let entry_undefined = config
        .entry_symbol
        .as_deref()
        .and_then(|name| input.state.symbols.find(name))
        .map(|id| input.state.symbols.get(id).state.is_undefined())
        .unwrap_or(false);
    let classify_ids: HashSet<SectionId> = if entry_undefined {
        input.state.sections.iter().map(|(id, _)| id).collect()
    } else {
        marked
    };
    gc::classify_loader_relocs(&mut input.state.symbols, &input.state.sections, &classify_ids);
    gc::apply_marks(&mut input.state.sections, &classify_ids);

    let stubs = synthesize_stubs(&mut input.state);
    retarget_calls(&mut input.state, &stubs);

    assign_addresses(&mut input.state, config.file_align.max(1) as u64);
    place_toc_anchor(&mut input.state)?;

    let out_relocs = resolve_fixups(&mut input.state, callbacks)?;

    let mut loader = LoaderBuilder::new();
    let mut loader_ids: HashMap<SymbolId, LoaderSymbolId> = HashMap::new();
    for id in &roots {
        let sym = input.state.symbols.get(*id);
        if let Some((section, offset)) = sym.value() {
            let flags = LoaderBuilder::entry_flag_for(true, true);
            let lid = loader.add_symbol(LoaderSymbol {
                name: sym.name.to_string(),
                value: (input.state.sections.get(section).vma + offset) as u32,
                section: Some(section.0 as u16),
                smtype: XTY_SD,
                smclas: XMC_PR,
                flags,
                ifile: 0,
            });
            loader_ids.insert(*id, lid);
        }
    }
    // The symbol a glink stub exists for is never locally defined (that's
    // why it needed a stub): it always becomes an import entry.
    for (target, _stub) in &stubs {
        if loader_ids.contains_key(target) {
            continue;
        }
        let sym = input.state.symbols.get(*target);
        let lid = loader.add_symbol(LoaderSymbol {
            name: sym.name.to_string(),
            value: 0,
            section: None,
            smtype: XTY_SD,
            smclas: XMC_PR,
            flags: 0,
            ifile: 0,
        });
        loader_ids.insert(*target, lid);
    }
    // Every other symbol the GC walk flagged LDREL still needs a loader
    // symbol table entry for its relocation, below, to index into.
    let ldrel_targets: Vec<SymbolId> = input
        .state
        .symbols
        .iter()
        .filter(|(id, s)| s.xcoff.flags.contains(SymbolFlags::LDREL) && !loader_ids.contains_key(id))
        .map(|(id, _)| id)
        .collect();
    for id in ldrel_targets {
        let sym = input.state.symbols.get(id);
        let (value, section) = match sym.value() {
            Some((section, offset)) => (
                (input.state.sections.get(section).vma + offset) as u32,
                Some(section.0 as u16),
            ),
            None => (0, None),
        };
        let lid = loader.add_symbol(LoaderSymbol {
            name: sym.name.to_string(),
            value,
            section,
            smtype: XTY_SD,
            smclas: sym.xcoff.storage_mapping_class,
            flags: 0,
            ifile: 0,
        });
        loader_ids.insert(id, lid);
    }

    for r in &out_relocs {
        let target_id = SymbolId(r.symndx);
        if !input
            .state
            .symbols
            .get(target_id)
            .xcoff
            .flags
            .contains(SymbolFlags::LDREL)
        {
            continue;
        }
        let Some(lid) = loader_ids.get(&target_id) else {
            continue;
        };
        loader.add_reloc(LoaderReloc {
            vaddr: r.vaddr,
            symndx: lid.0,
            rtype: r.rtype as u16,
            rsecnm: (r.section_index + 1) as u16,
        });
    }

    let mut loader_strtab = StringTable::with_dedup();
    let (ld_syms, ld_rels, import_bytes, loader_strtab_bytes) = loader.build(&mut loader_strtab, 4);
    let loader_section = if ld_syms.is_empty() && ld_rels.is_empty() {
        None
    } else {
        Some(OutLoader {
            ld_syms,
            ld_rels,
            import_bytes,
            strtab_bytes: loader_strtab_bytes,
            n_impid: 0,
        })
    };

    let out_symbols: Vec<OutSymbol> = input
        .state
        .symbols
        .iter()
        .filter_map(|(_, sym)| {
            let (section, offset) = sym.value()?;
            if !input
                .state
                .sections
                .get(section)
                .flags
                .contains(SectionFlags::MARK)
            {
                return None;
            }
            Some(OutSymbol {
                name: sym.name.to_string(),
                value: (input.state.sections.get(section).vma + offset) as u32,
                section_index: (section.0 + 1) as i16,
                sclass: if sym.weak { C_HIDEXT } else { C_EXT },
                csect: Some(OutCsectAux {
                    scnlen: input.state.sections.get(section).size() as u32,
                    smtyp: XTY_SD,
                    smclas: sym.xcoff.storage_mapping_class,
                }),
            })
        })
        .collect();

    let image = XcoffImage {
        sections: &input.state.sections,
        symbols: out_symbols,
        relocs: out_relocs,
        entry_vaddr: None,
        flags: crate::xcoff::F_EXEC,
        loader: loader_section,
    };
    let mut writer = crate::io::VecWriter::default();
    write_xcoff32(&image, &mut writer)?;

    let undefined = input
        .state
        .symbols
        .iter()
        .filter(|(_, s)| s.state.is_undefined() && !s.weak)
        .map(|(_, s)| s.name.to_string())
        .collect();

    Ok(LinkOutput {
        bytes: writer.data,
        undefined,
    })
}
