//! Garbage collection: mark/sweep over csects (C10).
//!
//! Starting from the entry symbol and every symbol the caller has marked
//! exported, walk each reachable csect's fixups to the sections they
//! target and mark those too, to a fixpoint. Sections never marked are
//! dropped before the final link pass sizes the output. Reuses the
//! section-flag approach the original linker uses for its "keep" bit,
//! expressed here as [`crate::section::SectionFlags::MARK`].
//!
//! A second pass, [`classify_loader_relocs`], walks the same (or, with GC
//! disabled, the whole) section set and decides which fixups need a
//! matching entry in the `.loader` section's relocation table: a
//! pointer-width absolute reference against a symbol that isn't defined
//! in this link, that a dynamic object defines, or that is called but
//! still undefined (its descriptor companion will need the loader reloc
//! instead). Each such fixup's target gets `SymbolFlags::LDREL` and the
//! walk's count becomes `l_nreloc`.

use hashbrown::HashSet;

use crate::fixup::{Fixup, FixupKind, RelocHowto};
use crate::section::{SectionFlags, SectionId, SectionTable};
use crate::symbol::{Symbol, SymbolFlags, SymbolId, SymbolTable};
use crate::xcoff::{R_RL, R_RLA};

/// Mark every section reachable (through fixup targets) from `roots`,
/// returning the set of section ids to keep. `sections` is read-only here;
/// callers sweep afterward by filtering against the returned set.
pub fn mark(
    roots: impl IntoIterator<Item = SymbolId>,
    symbols: &SymbolTable,
    sections: &SectionTable,
) -> HashSet<SectionId> {
    let mut marked = HashSet::new();
    let mut worklist: Vec<SectionId> = Vec::new();

    for root in roots {
        if let Some((section, _offset)) = symbols.get(root).value() {
            if marked.insert(section) {
                worklist.push(section);
            }
        }
    }

    while let Some(id) = worklist.pop() {
        let section = sections.get(id);
        for fragment in &section.fragments {
            for fixup in &fragment.fixups {
                if let Some((target_section, _offset)) = symbols.get(fixup.symbol).value() {
                    if marked.insert(target_section) {
                        worklist.push(target_section);
                    }
                }
            }
        }
    }

    marked
}

/// Apply the marked set to every section's [`SectionFlags::MARK`] bit, so
/// later passes (sizing, the loader builder's reloc-count accounting) can
/// just check the flag instead of threading the set through.
pub fn apply_marks(sections: &mut SectionTable, marked: &HashSet<SectionId>) {
    for (id, section) in sections.iter_mut() {
        if marked.contains(&id) {
            section.flags.insert(SectionFlags::MARK);
        } else {
            section.flags.remove(SectionFlags::MARK);
        }
    }
}

/// The ids of sections that survive collection, suitable for building the
/// final output section list. Preserves input order.
pub fn surviving_sections(sections: &SectionTable) -> Vec<SectionId> {
    sections
        .iter()
        .filter(|(_, s)| s.flags.contains(SectionFlags::MARK))
        .map(|(id, _)| id)
        .collect()
}

/// Does `fixup` land a pointer-width absolute value that the runtime
/// loader may need to rebase, and does its target require the loader to
/// actually act on it? Grounded on the same condition `bfd_xcoff_backend`
/// uses to decide whether a relocation earns a `.loader` entry: the
/// reloc's own type is one the loader understands as address-sized
/// (`R_POS`/`R_NEG`/`R_RL`/`R_RLA`), and the target symbol is either not
/// defined in this link, defined by a dynamic object, or called while
/// still undefined (its descriptor, once synthesized, is what actually
/// carries the loader reloc).
fn needs_loader_reloc(fixup: &Fixup, target: &Symbol) -> bool {
    let is_address_width = match fixup.kind {
        FixupKind::Data { bits } => bits >= 32,
        FixupKind::LinkerResolved { howto } => matches!(
            howto,
            RelocHowto::Pos32 | RelocHowto::Neg32 | RelocHowto::Raw(R_RL) | RelocHowto::Raw(R_RLA)
        ),
        _ => false,
    };
    if !is_address_width {
        return false;
    }
    target.state.is_undefined()
        || target.xcoff.flags.contains(SymbolFlags::DEF_DYNAMIC)
        || (target.xcoff.flags.contains(SymbolFlags::CALLED) && target.xcoff.descriptor.is_none())
}

/// Is this fixup a call the linker must be able to redirect through a
/// glink stub if its target turns out to be dynamic or undefined?
pub(crate) fn is_call_fixup(kind: FixupKind) -> bool {
    matches!(
        kind,
        FixupKind::PcRelBranch { .. } | FixupKind::LinkerResolved { howto: RelocHowto::Br26 | RelocHowto::Br16 }
    )
}

/// Walk every fixup in `ids`, flagging `SymbolFlags::CALLED` on call
/// targets that may need a stub and `SymbolFlags::LDREL` on targets that
/// need a `.loader` relocation, returning the count of the latter (the
/// output `l_nreloc`). Called once with the surviving (marked) section
/// set when GC ran, or with every section when the entry symbol was
/// undefined and GC was skipped — the walk itself is identical either
/// way, only which sections it's run over changes.
pub fn classify_loader_relocs(
    symbols: &mut SymbolTable,
    sections: &SectionTable,
    ids: &HashSet<SectionId>,
) -> usize {
    let mut ldrel_count = 0;
    for (id, section) in sections.iter() {
        if !ids.contains(&id) {
            continue;
        }
        for fragment in &section.fragments {
            for fixup in &fragment.fixups {
                let target = symbols.get(fixup.symbol);
                if is_call_fixup(fixup.kind)
                    && (target.state.is_undefined() || target.xcoff.flags.contains(SymbolFlags::DEF_DYNAMIC))
                {
                    symbols.get_mut(fixup.symbol).xcoff.flags.insert(SymbolFlags::CALLED);
                }
                let target = symbols.get(fixup.symbol);
                if needs_loader_reloc(fixup, target) {
                    ldrel_count += 1;
                    symbols.get_mut(fixup.symbol).xcoff.flags.insert(SymbolFlags::LDREL);
                }
            }
        }
    }
    ldrel_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixup::{Fixup, FixupKind};
    use crate::section::{Fragment, FragContents, Section};
    use crate::symbol::SymbolState;

    #[test]
    fn marks_transitively_through_a_fixup_chain() {
        let mut sections = SectionTable::new();
        let a = sections.add(Section::new("a"));
        let b = sections.add(Section::new("b"));
        let c = sections.add(Section::new("c"));

        let mut symbols = SymbolTable::new();
        let sym_b = symbols.intern("b_entry");
        symbols.get_mut(sym_b).state = SymbolState::Defined {
            section: b,
            offset: 0,
        };
        let root = symbols.intern("root");
        symbols.get_mut(root).state = SymbolState::Defined { section: a, offset: 0 };

        sections.get_mut(a).fragments.push(Fragment {
            contents: FragContents::Fixed(vec![0; 4]),
            fixups: vec![Fixup {
                offset: 0,
                kind: FixupKind::Data { bits: 32 },
                symbol: sym_b,
                addend: 0,
                pcrel: false,
            }],
            address: 0,
        });

        let marked = mark([root], &symbols, &sections);
        assert!(marked.contains(&a));
        assert!(marked.contains(&b));
        assert!(!marked.contains(&c));
    }

    #[test]
    fn undefined_target_of_an_absolute_fixup_earns_a_loader_reloc() {
        let mut sections = SectionTable::new();
        let a = sections.add(Section::new("a"));

        let mut symbols = SymbolTable::new();
        let undef = symbols.intern("extern_fn");

        sections.get_mut(a).fragments.push(Fragment {
            contents: FragContents::Fixed(vec![0; 4]),
            fixups: vec![Fixup {
                offset: 0,
                kind: FixupKind::Data { bits: 32 },
                symbol: undef,
                addend: 0,
                pcrel: false,
            }],
            address: 0,
        });

        let mut ids = HashSet::new();
        ids.insert(a);
        let count = classify_loader_relocs(&mut symbols, &sections, &ids);
        assert_eq!(count, 1);
        assert!(symbols.get(undef).xcoff.flags.contains(SymbolFlags::LDREL));
    }

    #[test]
    fn a_defined_local_target_never_earns_a_loader_reloc() {
        let mut sections = SectionTable::new();
        let a = sections.add(Section::new("a"));
        let b = sections.add(Section::new("b"));

        let mut symbols = SymbolTable::new();
        let local = symbols.intern("local_data");
        symbols.get_mut(local).state = SymbolState::Defined { section: b, offset: 0 };

        sections.get_mut(a).fragments.push(Fragment {
            contents: FragContents::Fixed(vec![0; 4]),
            fixups: vec![Fixup {
                offset: 0,
                kind: FixupKind::Data { bits: 32 },
                symbol: local,
                addend: 0,
                pcrel: false,
            }],
            address: 0,
        });

        let mut ids = HashSet::new();
        ids.insert(a);
        ids.insert(b);
        let count = classify_loader_relocs(&mut symbols, &sections, &ids);
        assert_eq!(count, 0);
        assert!(!symbols.get(local).xcoff.flags.contains(SymbolFlags::LDREL));
    }

    #[test]
    fn a_call_to_an_undefined_symbol_gets_flagged_called() {
        let mut sections = SectionTable::new();
        let a = sections.add(Section::new("a"));

        let mut symbols = SymbolTable::new();
        let undef = symbols.intern("extern_fn");

        sections.get_mut(a).fragments.push(Fragment {
            contents: FragContents::Fixed(vec![0; 4]),
            fixups: vec![Fixup {
                offset: 0,
                kind: FixupKind::PcRelBranch { bits: 24, shift: 2 },
                symbol: undef,
                addend: 0,
                pcrel: true,
            }],
            address: 0,
        });

        let mut ids = HashSet::new();
        ids.insert(a);
        classify_loader_relocs(&mut symbols, &sections, &ids);
        assert!(symbols.get(undef).xcoff.flags.contains(SymbolFlags::CALLED));
    }
}
