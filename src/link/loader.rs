//! Loader-section builder (C11).
//!
//! Builds the in-memory contents of `.loader`: a header, a symbol table
//! (imports first, exports/entries after, following the reserved
//! `LDR_SECTION_*` indices for the three always-present sections), an
//! import-file table (deduplicated path/base/member triples), a
//! relocation table, and a string table for names too long to fit inline.

use hashbrown::HashMap;

use crate::strtab::StringTable;
use crate::xcoff::{
    LdRel, LdSym, LDR_FIRST_USER_SYMNDX, LDR_SECTION_BSS, LDR_SECTION_DATA, LDR_SECTION_TEXT,
    L_ENTRY, L_EXPORT, L_IMPORT,
};

/// An index into a [`LoaderBuilder`]'s symbol list. Distinct from
/// [`crate::symbol::SymbolId`] because not every linker symbol becomes a
/// loader symbol, and the loader symbol table has its own ordering rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderSymbolId(pub u32);

#[derive(Debug, Clone)]
pub struct LoaderSymbol {
    pub name: String,
    pub value: u32,
    /// Index into the loader's own section list (0=text,1=data,2=bss,
    /// 3.. = user sections that carry loader relocations), or `None` for
    /// an unresolved import.
    pub section: Option<u16>,
    pub smtype: u8,
    pub smclas: u8,
    pub flags: u8,
    /// Index into the import-file table, for imported symbols.
    pub ifile: u32,
}

/// One deduplicated import-file entry: `(path, base, member)` triple, the
/// same shape the real loader's `.loader` import strings use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportFile {
    pub path: String,
    pub base: String,
    pub member: String,
}

#[derive(Debug, Clone, Copy)]
pub struct LoaderReloc {
    pub vaddr: u32,
    pub symndx: u32,
    pub rtype: u16,
    /// Section number the relocation's target lives in, or a dummy howto
    /// section index when the original csect's section could not be
    /// determined; callers must never actually emit such a relocation for
    /// a marked, live symbol (the value is preserved and asserted against,
    /// not guessed at).
    pub rsecnm: u16,
}

#[derive(Default)]
pub struct LoaderBuilder {
    symbols: Vec<LoaderSymbol>,
    import_files: Vec<ImportFile>,
    import_file_index: HashMap<ImportFile, u32>,
    relocs: Vec<LoaderReloc>,
}

impl LoaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the three well-known section loader-symbol indices so
    /// user symbols start at [`LDR_FIRST_USER_SYMNDX`].
    pub fn reserved_indices() -> [u32; 3] {
        [LDR_SECTION_TEXT, LDR_SECTION_DATA, LDR_SECTION_BSS]
    }

    pub fn add_import_file(&mut self, file: ImportFile) -> u32 {
        if let Some(&idx) = self.import_file_index.get(&file) {
            return idx;
        }
        let idx = self.import_files.len() as u32;
        self.import_file_index.insert(file.clone(), idx);
        self.import_files.push(file);
        idx
    }

    pub fn add_symbol(&mut self, symbol: LoaderSymbol) -> LoaderSymbolId {
        let id = LoaderSymbolId(self.symbols.len() as u32 + LDR_FIRST_USER_SYMNDX);
        self.symbols.push(symbol);
        id
    }

    pub fn add_reloc(&mut self, reloc: LoaderReloc) {
        self.relocs.push(reloc);
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn reloc_count(&self) -> usize {
        self.relocs.len()
    }

    /// Serialize the `.loader` section body (everything after the header,
    /// which the final link pass writes separately once it knows the
    /// overall section count).
    ///
    /// Two-phase like the object writer: this first interns every
    /// over-8-byte name into `strtab` and immediately calls `strtab.write`
    /// to fix their final offsets, so the returned `LdSym`s already carry
    /// correct long-name references. Callers that share `strtab` with
    /// other tables must call this after every other interner of theirs
    /// has finished adding strings, or call it against a private table
    /// reserved for the loader section.
    pub fn build(&self, strtab: &mut StringTable, strtab_base: usize) -> (Vec<LdSym>, Vec<LdRel>, Vec<u8>, Vec<u8>) {
        let long_ids: Vec<Option<crate::strtab::StringId>> = self
            .symbols
            .iter()
            .map(|s| (s.name.len() > 8).then(|| strtab.add(s.name.as_bytes())))
            .collect();
        let mut strtab_bytes = Vec::new();
        strtab.write(strtab_base, &mut strtab_bytes);

        let ld_syms = self
            .symbols
            .iter()
            .zip(long_ids.iter())
            .map(|(s, long_id)| {
                let mut flags = s.flags;
                if s.section.is_none() {
                    flags |= L_IMPORT;
                }
                let l_name = if let Some(id) = long_id {
                    let mut buf = [0u8; 8];
                    buf[4..8].copy_from_slice(&(strtab.get_offset(*id) as u32).to_be_bytes());
                    buf
                } else {
                    let mut buf = [0u8; 8];
                    buf[..s.name.len()].copy_from_slice(s.name.as_bytes());
                    buf
                };
                LdSym {
                    l_name,
                    l_value: crate::endian::U32::new(crate::endian::BigEndian, s.value),
                    l_scnum: crate::endian::U16::new(
                        crate::endian::BigEndian,
                        s.section.unwrap_or(0),
                    ),
                    l_smtype: s.smtype,
                    l_smclas: s.smclas,
                    l_ifile: crate::endian::U32::new(crate::endian::BigEndian, s.ifile),
                    l_parm: crate::endian::U32::new(crate::endian::BigEndian, 0),
                }
            })
            .collect();

        let ld_rels = self
            .relocs
            .iter()
            .map(|r| LdRel {
                l_vaddr: crate::endian::U32::new(crate::endian::BigEndian, r.vaddr),
                l_symndx: crate::endian::U32::new(crate::endian::BigEndian, r.symndx),
                l_rtype: crate::endian::U16::new(crate::endian::BigEndian, r.rtype),
                l_rsecnm: crate::endian::U16::new(crate::endian::BigEndian, r.rsecnm),
            })
            .collect();

        let mut import_bytes = Vec::new();
        for file in &self.import_files {
            import_bytes.extend_from_slice(file.path.as_bytes());
            import_bytes.push(0);
            import_bytes.extend_from_slice(file.base.as_bytes());
            import_bytes.push(0);
            import_bytes.extend_from_slice(file.member.as_bytes());
            import_bytes.push(0);
        }

        (ld_syms, ld_rels, import_bytes, strtab_bytes)
    }

    pub fn entry_flag_for(is_entry: bool, is_export: bool) -> u8 {
        let mut flags = 0u8;
        if is_entry {
            flags |= L_ENTRY;
        }
        if is_export {
            flags |= L_EXPORT;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_import_files_dedup_to_one_index() {
        let mut b = LoaderBuilder::new();
        let f = ImportFile {
            path: "/usr/lib".into(),
            base: "libc.a".into(),
            member: "shr.o".into(),
        };
        let a = b.add_import_file(f.clone());
        let c = b.add_import_file(f);
        assert_eq!(a, c);
        assert_eq!(b.import_files.len(), 1);
    }

    #[test]
    fn user_symbols_start_after_reserved_indices() {
        let mut b = LoaderBuilder::new();
        let id = b.add_symbol(LoaderSymbol {
            name: "foo".into(),
            value: 0,
            section: Some(1),
            smtype: 0,
            smclas: 0,
            flags: 0,
            ifile: 0,
        });
        assert_eq!(id.0, LDR_FIRST_USER_SYMNDX);
    }
}
