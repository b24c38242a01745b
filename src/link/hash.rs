//! Linker hash & archive scan (C9).
//!
//! [`LinkState`] owns the global [`SymbolTable`] and [`SectionTable`] for
//! one link, plus the bookkeeping the archive scan needs: which inputs
//! have already been pulled in, and which undefined symbols are still
//! outstanding. Archive members are pulled with the classic single-pass
//! "does this member define anything we still need" scan, repeated to a
//! fixpoint, since pulling a member can itself create new undefined
//! references that an earlier member in the same archive could satisfy.

use hashbrown::{HashMap, HashSet};

use crate::callbacks::LinkCallbacks;
use crate::io::{ArchiveMember, ArchiveMembers};
use crate::link::toc::TocMerger;
use crate::section::SectionTable;
use crate::symbol::{InputId, SymbolState, SymbolTable};
use crate::xcoff::read::{sections_from_object, ParsedObject};

/// Global state threaded through the whole link.
pub struct LinkState {
    pub symbols: SymbolTable,
    pub sections: SectionTable,
    /// Inputs (regular objects or archive members) already pulled in, by a
    /// caller-assigned stable input id.
    pulled: HashSet<InputId>,
    next_input: u32,
    /// Folds duplicate TOC slots across every object ingested so far.
    toc_merge: TocMerger,
}

impl Default for LinkState {
    fn default() -> Self {
        LinkState {
            symbols: SymbolTable::new(),
            sections: SectionTable::new(),
            pulled: HashSet::new(),
            next_input: 0,
            toc_merge: TocMerger::new(),
        }
    }
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_input_id(&mut self) -> InputId {
        let id = InputId(self.next_input);
        self.next_input += 1;
        id
    }

    pub fn mark_pulled(&mut self, id: InputId) -> bool {
        self.pulled.insert(id)
    }

    pub fn is_pulled(&self, id: InputId) -> bool {
        self.pulled.contains(&id)
    }

    /// `true` once there are no more undefined-and-not-weak symbols left
    /// to satisfy (ignoring symbols the caller has already decided to
    /// leave undefined, e.g. because they're resolved dynamically).
    pub fn has_outstanding_undefined(&self) -> bool {
        self.symbols
            .iter()
            .any(|(_, sym)| matches!(sym.state, SymbolState::Undefined { referenced_by: Some(_) }))
    }

    /// Merge one already-parsed object's sections and define its csect
    /// symbols, reporting conflicts through `callbacks`. `file_name` is
    /// used only for diagnostics.
    pub fn ingest_object(
        &mut self,
        object: &ParsedObject<'_>,
        input: InputId,
        file_name: &str,
        is_dynamic: bool,
        callbacks: &mut dyn LinkCallbacks,
    ) -> crate::error::Result<()> {
        let new_sections = sections_from_object(object)?;
        // Csects are mapped to output sections by the name their
        // defining symbol carries, not by `n_scnum` arithmetic: one input
        // section can explode into several csects, so "the Nth input
        // section" no longer lines up with "the Nth output section" once
        // splitting (or TOC merging, below) has run.
        let mut name_to_section = HashMap::new();
        for (sec, toc_ref) in new_sections {
            let sec_name = sec.name.to_string();
            if let Some(target) = &toc_ref {
                if let Some(existing) = self.toc_merge.find(target) {
                    // A prior object already defined a TOC slot for this
                    // external: fold this csect's name onto that slot
                    // instead of emitting a second one.
                    name_to_section.insert(sec_name, existing);
                    continue;
                }
            }
            let id = self.sections.add(sec);
            name_to_section.insert(sec_name, id);
            if let Some(target) = toc_ref {
                self.toc_merge.insert(target, id);
            }
        }

        for sym in &object.symbols {
            if sym.sclass != crate::xcoff::C_EXT
                && sym.sclass != crate::xcoff::C_HIDEXT
                && sym.sclass != crate::xcoff::C_WEAKEXT
            {
                continue;
            }
            let weak = sym.sclass == crate::xcoff::C_WEAKEXT;
            let state = if sym.scnum == crate::xcoff::N_UNDEF {
                if weak {
                    SymbolState::UndefinedWeak {
                        referenced_by: Some(input),
                    }
                } else {
                    SymbolState::Undefined {
                        referenced_by: Some(input),
                    }
                }
            } else if let Some(aux) = &sym.csect_aux {
                if aux.smtyp == crate::xcoff::XTY_CM {
                    SymbolState::Common {
                        size: aux.scnlen,
                        align: 1 << aux.align_pow2,
                    }
                } else {
                    let Some(&section) = name_to_section.get(&sym.name) else {
                        continue;
                    };
                    if weak {
                        SymbolState::DefinedWeak {
                            section,
                            offset: 0,
                        }
                    } else {
                        SymbolState::Defined {
                            section,
                            offset: 0,
                        }
                    }
                }
            } else {
                continue;
            };

            let name = sym.name.clone();
            let is_real_def = state.is_defined();
            // The symbol table doesn't track which input first defined a
            // name, only its current state, so the prior definer's file
            // can't be named here; report the incoming file on both sides.
            let (id, changed) = self.symbols.resolve(&name, state, is_dynamic, |n| {
                callbacks.multiple_definition(n, file_name, file_name)
            });
            if is_dynamic && is_real_def && changed {
                self.symbols
                    .get_mut(id)
                    .xcoff
                    .flags
                    .insert(crate::symbol::SymbolFlags::DEF_DYNAMIC);
            }
        }
        Ok(())
    }

    /// Scan one archive to a fixpoint: pull every member that currently
    /// defines a symbol this link still needs undefined, then repeat,
    /// since each pull can surface fresh undefined references. Returns the
    /// number of members pulled.
    pub fn scan_archive<'data>(
        &mut self,
        members: &mut dyn ArchiveMembers<'data>,
        mut parse: impl FnMut(&ArchiveMember<'data>) -> crate::error::Result<ParsedObject<'data>>,
        callbacks: &mut dyn LinkCallbacks,
    ) -> crate::error::Result<usize> {
        let mut all_members = Vec::new();
        while let Some(m) = members.next_member()? {
            let input = self.fresh_input_id();
            all_members.push((input, m));
        }

        let mut pulled_count = 0;
        loop {
            let mut pulled_this_pass = false;
            for (input, member) in &all_members {
                let input = *input;
                if self.is_pulled(input) {
                    continue;
                }
                let object = parse(member)?;
                let defines_needed = object.symbols.iter().any(|s| {
                    s.scnum != crate::xcoff::N_UNDEF
                        && matches!(
                            self.symbols.find(&s.name).map(|id| &self.symbols.get(id).state),
                            Some(SymbolState::Undefined { .. } | SymbolState::UndefinedWeak { .. })
                        )
                });
                if defines_needed {
                    self.mark_pulled(input);
                    self.ingest_object(&object, input, &member.name, false, callbacks)?;
                    pulled_count += 1;
                    pulled_this_pass = true;
                }
            }
            if !pulled_this_pass {
                break;
            }
        }
        Ok(pulled_count)
    }
}
