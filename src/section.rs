//! Section / fragment model (C4).
//!
//! A [`SectionTable`] owns an arena of [`Section`]s; each `Section` owns an
//! ordered `Vec<Fragment>`. Contract: `frag_more` reserves
//! bytes in the current fragment and returns a stable index into it;
//! `frag_var` closes the current fragment and opens a variable one whose
//! size the relaxation engine (C7) will choose later; `record_alignment`
//! raises a section's alignment monotonically; a subspace/subsegment API
//! lets callers switch `(section, subsegment)` and have writes land in the
//! most recently active fragment of that pair.

use crate::fixup::Fixup;
use crate::relax::{RelaxBase, RelaxState};
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub u32);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const ALLOC       = 1 << 0;
        const LOAD        = 1 << 1;
        const CODE        = 1 << 2;
        const READONLY    = 1 << 3;
        const HAS_CONTENTS= 1 << 4;
        const IN_MEMORY   = 1 << 5;
        const RELOCS      = 1 << 6;
        /// Marks a section as reachable during GC mark/sweep; given its own
        /// bit rather than reusing another flag's storage.
        const MARK        = 1 << 7;
    }
}

/// The payload of one fragment: either fixed bytes, or a variable
/// descriptor resolved later by the relaxation engine (C7).
#[derive(Debug, Clone)]
pub enum FragContents {
    Fixed(Vec<u8>),
    Variable {
        base: RelaxBase,
        state: RelaxState,
        /// The symbol the displacement is measured against.
        symbol: Option<SymbolId>,
        /// Addend added to the symbol's value before computing displacement.
        offset: i64,
        /// Bytes already settled (e.g. the opcode bits that don't change
        /// across subtypes); grows as `relax()` upgrades the subtype.
        storage: Vec<u8>,
        /// Upper bound on how many bytes this fragment could ever grow to,
        /// used to size the provisional address pass.
        max_growth: usize,
    },
}

impl FragContents {
    pub fn len(&self) -> usize {
        match self {
            FragContents::Fixed(b) => b.len(),
            FragContents::Variable { storage, .. } => storage.len(),
        }
    }
}

/// A contiguous byte range within a section, plus any fixups pending
/// against it.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub contents: FragContents,
    pub fixups: Vec<Fixup>,
    /// Fragment's offset within its section, assigned during the
    /// relaxation engine's provisional-address passes (C7 step 2) and
    /// final during the link pass (C13).
    pub address: u64,
}

impl Fragment {
    fn fixed(bytes: Vec<u8>) -> Self {
        Fragment {
            contents: FragContents::Fixed(bytes),
            fixups: Vec::new(),
            address: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.contents {
            FragContents::Fixed(b) => b,
            FragContents::Variable { storage, .. } => storage,
        }
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        match &mut self.contents {
            FragContents::Fixed(b) => b,
            FragContents::Variable { storage, .. } => storage,
        }
    }
}

/// HP-PA subspace attributes: the per-`.SUBSPA` bits `tc-hppa.c` tracks
/// alongside a subspace's sort key,
/// which have no equivalent on any other target this crate serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HppaSubspaceFlags {
    /// `.SUBSPA`'s `SORT_KEY=n`; subspaces sharing a space are ultimately
    /// ordered by this key, ties broken by first appearance.
    pub sort_key: u8,
    /// `ACCESS_CONTROL` quadrant: read/execute/gateway permission bits,
    /// packed the way `pa_subspace`'s `access_control_value` table does.
    pub access_control: u8,
    pub loadable: bool,
    pub comdat: bool,
}

impl Default for HppaSubspaceFlags {
    fn default() -> Self {
        HppaSubspaceFlags {
            sort_key: 0,
            access_control: 0,
            loadable: true,
            comdat: false,
        }
    }
}

/// One output (or input, pre-split) section: an alignment, a flag set, a
/// VMA/file offset pair assigned at link time, and its ordered fragments.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: Box<str>,
    pub align_pow2: u32,
    pub flags: SectionFlags,
    pub fragments: Vec<Fragment>,
    pub vma: u64,
    pub file_offset: u64,
    /// Assigned during the final link pass (C13); index into the output
    /// image's section list.
    pub target_index: Option<u32>,
    /// XCOFF storage-mapping class this section was shredded from, if any;
    /// `None` for sections synthesized by the linker itself
    /// (the loader section, linkage section, and so on have their own
    /// well-known names instead).
    pub storage_mapping_class: Option<u8>,
    /// Present only for sections built from `.SPACE`/`.SUBSPA` directives;
    /// `None` on every other target.
    pub hppa_subspace: Option<HppaSubspaceFlags>,
}

impl Section {
    pub fn new(name: impl Into<Box<str>>) -> Self {
        Section {
            name: name.into(),
            align_pow2: 0,
            flags: SectionFlags::empty(),
            fragments: Vec::new(),
            vma: 0,
            file_offset: 0,
            target_index: None,
            storage_mapping_class: None,
            hppa_subspace: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.fragments.iter().map(|f| f.len() as u64).sum()
    }

    /// `record_alignment`: monotonically raise the section's alignment.
    pub fn record_alignment(&mut self, power: u32) {
        if power > self.align_pow2 {
            self.align_pow2 = power;
        }
    }
}

/// The active `(section, subsegment)` pair and fragment cursor the
/// assembler writes through: the subspace/subsegment API.
pub struct SectionTable {
    sections: Vec<Section>,
    by_name: hashbrown::HashMap<Box<str>, SectionId>,
    /// Per-(section, subsegment) index of that pair's most recent fragment,
    /// so that switching away and back resumes appending to the same
    /// fragment run instead of starting a fresh one in the middle of the
    /// section (this is exactly what `subseg_set`/`subseg_new` do in the
    /// original assembler).
    subsegments: hashbrown::HashMap<(SectionId, u32), usize>,
}

impl Default for SectionTable {
    fn default() -> Self {
        SectionTable {
            sections: Vec::new(),
            by_name: hashbrown::HashMap::new(),
            subsegments: hashbrown::HashMap::new(),
        }
    }
}

impl SectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SectionId) -> &Section {
        &self.sections[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionId, &Section)> {
        self.sections
            .iter()
            .enumerate()
            .map(|(i, s)| (SectionId(i as u32), s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SectionId, &mut Section)> {
        self.sections
            .iter_mut()
            .enumerate()
            .map(|(i, s)| (SectionId(i as u32), s))
    }

    pub fn by_name(&self, name: &str) -> Option<SectionId> {
        self.by_name.get(name).copied()
    }

    pub fn add(&mut self, section: Section) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.by_name.insert(section.name.clone(), id);
        self.sections.push(section);
        id
    }

    pub fn get_or_create(&mut self, name: &str) -> SectionId {
        if let Some(id) = self.by_name(name) {
            return id;
        }
        self.add(Section::new(name))
    }

    /// `frag_more(n)`: reserve `n` bytes at the end of the current fragment
    /// of `(section, subsegment)`, returning a mutable slice into them.
    pub fn frag_more(&mut self, section: SectionId, subsegment: u32, n: usize) -> &mut [u8] {
        let key = (section, subsegment);
        let frag_index = *self.subsegments.entry(key).or_insert_with(|| {
            let sec = &mut self.sections[section.0 as usize];
            sec.fragments.push(Fragment::fixed(Vec::new()));
            sec.fragments.len() - 1
        });
        let sec = &mut self.sections[section.0 as usize];
        // If the most recent fragment for this subsegment became a
        // variable fragment (via `frag_var`), start a fresh fixed one.
        let frag_index = match &sec.fragments[frag_index].contents {
            FragContents::Variable { .. } => {
                sec.fragments.push(Fragment::fixed(Vec::new()));
                let idx = sec.fragments.len() - 1;
                self.subsegments.insert(key, idx);
                idx
            }
            FragContents::Fixed(_) => frag_index,
        };
        let bytes = sec.fragments[frag_index].bytes_mut();
        let start = bytes.len();
        bytes.resize(start + n, 0);
        &mut bytes[start..]
    }

    /// Append a fixup against the fragment most recently returned by
    /// `frag_more` for `(section, subsegment)`.
    pub fn add_fixup(&mut self, section: SectionId, subsegment: u32, fixup: Fixup) {
        let key = (section, subsegment);
        let frag_index = self.subsegments[&key];
        self.sections[section.0 as usize].fragments[frag_index]
            .fixups
            .push(fixup);
    }

    /// `frag_var`: finish the current fragment and start a new variable
    /// one. Returns its index so callers (the relaxation engine) can
    /// revisit it.
    #[allow(clippy::too_many_arguments)]
    pub fn frag_var(
        &mut self,
        section: SectionId,
        subsegment: u32,
        base: RelaxBase,
        state: RelaxState,
        symbol: Option<SymbolId>,
        offset: i64,
        max_growth: usize,
        initial_bytes: Vec<u8>,
    ) -> usize {
        let sec = &mut self.sections[section.0 as usize];
        sec.fragments.push(Fragment {
            contents: FragContents::Variable {
                base,
                state,
                symbol,
                offset,
                storage: initial_bytes,
                max_growth,
            },
            fixups: Vec::new(),
            address: 0,
        });
        let idx = sec.fragments.len() - 1;
        self.subsegments.insert((section, subsegment), idx);
        idx
    }

    pub fn record_alignment(&mut self, section: SectionId, power: u32) {
        self.sections[section.0 as usize].record_alignment(power);
    }
}
