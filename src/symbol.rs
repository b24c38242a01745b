//! Symbol table & hash (C3).
//!
//! Symbols live in one flat `Vec` inside [`SymbolTable`], addressed by
//! [`SymbolId`], rather than as a `symbol -> section -> owning file ->
//! section list -> ...` pointer graph.

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::section::SectionId;
use crate::xcoff::XMC_PR;

/// An index into a [`SymbolTable`]'s arena. Stable for the table's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Which input (by index into the link's input list) a symbol came from,
/// used for multiple-definition diagnostics and for "not yet placed"
/// common-symbol resolution. `None` means the symbol was synthesized by
/// the linker itself (a stub, a descriptor, a magic name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputId(pub u32);

/// The state lattice: `undef < common < defweak < defined`.
/// Transitions are monotone; a dynamic definition never promotes over a
/// regular one (checked in [`SymbolTable::resolve`]).
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolState {
    Undefined { referenced_by: Option<InputId> },
    UndefinedWeak { referenced_by: Option<InputId> },
    Common { size: u64, align: u32 },
    DefinedWeak { section: SectionId, offset: u64 },
    Defined { section: SectionId, offset: u64 },
    /// Resolved through another symbol (e.g. a versioned alias).
    Indirect { target: SymbolId },
}

impl SymbolState {
    /// The lattice rank; higher replaces lower when symbols of the same
    /// name are merged.
    fn rank(&self) -> u8 {
        match self {
            SymbolState::Undefined { .. } => 0,
            SymbolState::UndefinedWeak { .. } => 1,
            SymbolState::Common { .. } => 2,
            SymbolState::DefinedWeak { .. } => 3,
            SymbolState::Defined { .. } => 4,
            SymbolState::Indirect { .. } => 4,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(
            self,
            SymbolState::Defined { .. } | SymbolState::DefinedWeak { .. } | SymbolState::Indirect { .. }
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(
            self,
            SymbolState::Undefined { .. } | SymbolState::UndefinedWeak { .. }
        )
    }
}

bitflags! {
    /// The per-symbol bitfield.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u32 {
        const REF_REGULAR  = 1 << 0;
        const DEF_REGULAR  = 1 << 1;
        const DEF_DYNAMIC  = 1 << 2;
        const LDREL        = 1 << 3;
        const ENTRY        = 1 << 4;
        const CALLED       = 1 << 5;
        const SET_TOC      = 1 << 6;
        const IMPORT       = 1 << 7;
        const EXPORT       = 1 << 8;
        const BUILT_LDSYM  = 1 << 9;
        const MARK         = 1 << 10;
        const HAS_SIZE     = 1 << 11;
        const DESCRIPTOR   = 1 << 12;
    }
}

/// Where a symbol's TOC slot lives, once it has one: either a TOC offset
/// or a TOC-symbol index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocSlot {
    /// We created this TOC entry: its byte offset within the TOC section.
    Offset(u64),
    /// We inherited the entry from an input object: the symbol index of the
    /// `XMC_TC` csect symbol that defines it.
    InheritedSymbol(SymbolId),
}

/// Per-XCOFF-entry extra state.
#[derive(Debug, Clone, Default)]
pub struct XcoffExtra {
    /// Output symbol table index. `None` until assigned; a negative
    /// sentinel in the source becomes an explicit enum here.
    pub output_index: OutputIndex,
    pub toc_slot: Option<TocSlot>,
    /// Cross-link between a `.`-prefixed entry-point symbol and its
    /// function-descriptor symbol: exactly one of the pair carries
    /// `DESCRIPTOR`.
    pub descriptor: Option<SymbolId>,
    pub loader_symbol: Option<crate::link::loader::LoaderSymbolId>,
    pub loader_index: Option<u32>,
    pub storage_mapping_class: u8,
    pub flags: SymbolFlags,
}

impl XcoffExtra {
    pub fn new() -> Self {
        XcoffExtra {
            storage_mapping_class: XMC_PR,
            ..Default::default()
        }
    }
}

/// Output symbol index sentinel values: an unassigned index starts out
/// as one of two negative sentinels, the second meaning "must not be
/// stripped".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputIndex {
    Unassigned,
    MustNotStrip,
    Assigned(u32),
}

impl Default for OutputIndex {
    fn default() -> Self {
        OutputIndex::Unassigned
    }
}

/// A symbol: a name, a state, and (for XCOFF) the extra bookkeeping fields.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: Box<str>,
    pub state: SymbolState,
    pub weak: bool,
    pub xcoff: XcoffExtra,
}

impl Symbol {
    pub fn new_undefined(name: impl Into<Box<str>>) -> Self {
        Symbol {
            name: name.into(),
            state: SymbolState::Undefined {
                referenced_by: None,
            },
            weak: false,
            xcoff: XcoffExtra::new(),
        }
    }

    pub fn value(&self) -> Option<(SectionId, u64)> {
        match self.state {
            SymbolState::Defined { section, offset } | SymbolState::DefinedWeak { section, offset } => {
                Some((section, offset))
            }
            _ => None,
        }
    }
}

/// The linker's global hash, keyed by external name (C9), plus the symbol
/// arena (C3). One `SymbolTable` lives for the whole link.
#[derive(Debug, Default)]
pub struct SymbolTable {
    arena: Vec<Symbol>,
    by_name: IndexMap<Box<str>, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.arena[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.arena[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SymbolId, &mut Symbol)> {
        self.arena
            .iter_mut()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    pub fn find(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// Look up `name`, inserting a fresh `Undefined` entry if absent.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = SymbolId(self.arena.len() as u32);
        self.arena.push(Symbol::new_undefined(name));
        self.by_name.insert(name.into(), id);
        id
    }

    /// Merge a new sighting of `name` with state `incoming` into the table,
    /// enforcing the lattice ordering and invoking `on_conflict` (normally
    /// routed to `LinkCallbacks::multiple_definition`)
    /// when two *defined* states collide.
    ///
    /// Returns the id of the (possibly pre-existing) symbol.
    pub fn resolve(
        &mut self,
        name: &str,
        incoming: SymbolState,
        incoming_is_dynamic: bool,
        mut on_conflict: impl FnMut(&str) -> bool,
    ) -> (SymbolId, bool) {
        let id = self.intern(name);
        let existing = &self.arena[id.0 as usize].state;

        let existing_is_regular_defined = matches!(existing, SymbolState::Defined { .. });
        let incoming_is_real_def = matches!(
            incoming,
            SymbolState::Defined { .. } | SymbolState::DefinedWeak { .. }
        );

        // A dynamic definition never promotes over a regular definition,
        // regardless of lattice rank.
        if incoming_is_dynamic && incoming_is_real_def && existing_is_regular_defined {
            return (id, false);
        }

        let existing_rank = existing.rank();
        let incoming_rank = incoming.rank();

        if incoming_rank < existing_rank {
            // Incoming is weaker; keep what we have. A common symbol
            // sighted again just grows to the larger size/alignment.
            if let (
                SymbolState::Common { size: es, align: ea },
                SymbolState::Common { size: is_, align: ia },
            ) = (&self.arena[id.0 as usize].state, &incoming)
            {
                let size = (*es).max(*is_);
                let align = (*ea).max(*ia);
                self.arena[id.0 as usize].state = SymbolState::Common { size, align };
            }
            return (id, false);
        }

        const DEFINED_RANK: u8 = 4;
        if incoming_rank == existing_rank && incoming_rank == DEFINED_RANK {
            // Two strong definitions of the same name: ask the callback.
            if !on_conflict(name) {
                return (id, false);
            }
            // Callback said "continue": keep the first definition, as the
            // reference linker does (first one wins once the user has
            // been told).
            return (id, false);
        }

        self.arena[id.0 as usize].state = incoming;
        (id, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_promotes_monotonically() {
        let mut t = SymbolTable::new();
        let id = t.intern("foo");
        assert!(t.get(id).state.is_undefined());

        let (id2, changed) = t.resolve(
            "foo",
            SymbolState::Common { size: 4, align: 4 },
            false,
            |_| false,
        );
        assert_eq!(id, id2);
        assert!(changed);

        let (id3, changed) = t.resolve(
            "foo",
            SymbolState::Defined {
                section: SectionId(0),
                offset: 0,
            },
            false,
            |_| false,
        );
        assert_eq!(id, id3);
        assert!(changed);
        assert!(t.get(id).state.is_defined());
    }

    #[test]
    fn dynamic_definition_never_beats_regular() {
        let mut t = SymbolTable::new();
        t.resolve(
            "foo",
            SymbolState::Defined {
                section: SectionId(0),
                offset: 0,
            },
            false,
            |_| false,
        );
        let (id, changed) = t.resolve(
            "foo",
            SymbolState::Defined {
                section: SectionId(1),
                offset: 8,
            },
            true,
            |_| false,
        );
        assert!(!changed);
        assert_eq!(t.get(id).value(), Some((SectionId(0), 0)));
    }
}
