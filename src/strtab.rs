//! Append-only byte arena returning stable offsets (C2).
//!
//! Used for the output COFF string table, the `.loader` section's long-name
//! string table, and the import-file path/file/member triples. Mirrors the
//! teacher's `write::string::StringTable` contract (`add`, `get_offset`,
//! `write`) inferred from its call sites in `write/xcoff.rs`.

use hashbrown::HashMap;

/// A handle into a `StringTable`, stable once issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringId(usize);

#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<Vec<u8>>,
    /// Maps a string to the id of its first occurrence, when de-dup is on.
    dedup: Option<HashMap<Vec<u8>, StringId>>,
    offsets: Vec<usize>,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable::default()
    }

    /// Enable de-duplication: a later `add` of bytes equal to an earlier
    /// one returns the earlier `StringId` instead of growing the arena.
    pub fn with_dedup() -> Self {
        StringTable {
            dedup: Some(HashMap::new()),
            ..Default::default()
        }
    }

    /// Append `bytes` (without a trailing NUL; callers add one if the
    /// target format wants it) and return a stable id.
    pub fn add(&mut self, bytes: &[u8]) -> StringId {
        if let Some(dedup) = &self.dedup {
            if let Some(&id) = dedup.get(bytes) {
                return id;
            }
        }
        let id = StringId(self.strings.len());
        self.strings.push(bytes.to_vec());
        if let Some(dedup) = &mut self.dedup {
            dedup.insert(bytes.to_vec(), id);
        }
        id
    }

    /// Total length of the table once serialized, given a `base` offset
    /// (callers building XCOFF string tables pass `4` since the first
    /// four bytes hold the table's own length).
    pub fn len(&self, base: usize) -> usize {
        base + self
            .strings
            .iter()
            .map(|s| s.len() + 1)
            .sum::<usize>()
    }

    /// Compute each string's final byte offset (relative to the start of
    /// the table, i.e. including `base`) and append the serialized bytes
    /// (NUL-terminated) to `out`.
    pub fn write(&mut self, base: usize, out: &mut Vec<u8>) {
        self.offsets.clear();
        let mut offset = base;
        for s in &self.strings {
            self.offsets.push(offset);
            out.extend_from_slice(s);
            out.push(0);
            offset += s.len() + 1;
        }
    }

    /// The final offset of a string, valid only after `write` has run.
    pub fn get_offset(&self, id: StringId) -> usize {
        self.offsets[id.0]
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_sequential() {
        let mut t = StringTable::new();
        let a = t.add(b"foo");
        let b = t.add(b"barbaz");
        let mut out = Vec::new();
        t.write(4, &mut out);
        assert_eq!(t.get_offset(a), 4);
        assert_eq!(t.get_offset(b), 4 + 4);
        assert_eq!(out, b"foo\0barbaz\0");
    }

    #[test]
    fn dedup_returns_same_id() {
        let mut t = StringTable::with_dedup();
        let a = t.add(b"dup");
        let b = t.add(b"dup");
        assert_eq!(a, b);
        assert_eq!(t.strings.len(), 1);
    }
}
