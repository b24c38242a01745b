//! The synchronous user callback interface.
//!
//! Every recoverable error is offered to the callback before the link
//! aborts; the callback returns `true` to continue, `false` to abort. Fatal
//! errors (`NoMemory`, `FileTooBig`) never reach this interface.

/// Implemented by the host embedding this linker core.
pub trait LinkCallbacks {
    /// Two definitions of the same global symbol were seen. `kept` is the
    /// symbol that wins the lattice ordering.
    fn multiple_definition(
        &mut self,
        name: &str,
        kept_file: &str,
        other_file: &str,
    ) -> bool {
        let _ = (name, kept_file, other_file);
        false
    }

    /// A fixup could not be resolved to bytes and had to be kept as an
    /// output relocation, but no output relocation format exists for it
    /// (e.g. the output format doesn't support this kind at all).
    fn unattached_reloc(&mut self, symbol: &str, file: &str, section: &str) -> bool {
        let _ = (symbol, file, section);
        false
    }

    /// A fixup's resolved value doesn't fit the field width.
    fn reloc_overflow(
        &mut self,
        symbol: &str,
        kind: &str,
        file: &str,
        section: &str,
    ) -> bool {
        let _ = (symbol, kind, file, section);
        false
    }

    /// A symbol referenced by a fixup was never defined anywhere in the
    /// link.
    fn undefined_symbol(&mut self, name: &str, file: &str) -> bool {
        let _ = (name, file);
        false
    }
}

/// A callback implementation that always aborts on the first recoverable
/// error, useful for tests and for hosts with no interactive diagnostics.
#[derive(Debug, Default)]
pub struct AbortOnFirstError;

impl LinkCallbacks for AbortOnFirstError {}

/// A callback implementation that records every diagnostic and always
/// continues; useful for hosts that want to batch-report everything wrong
/// with a link before giving up.
#[derive(Debug, Default)]
pub struct CollectAll {
    pub multiple_definitions: Vec<(String, String, String)>,
    pub unattached_relocs: Vec<(String, String, String)>,
    pub reloc_overflows: Vec<(String, String, String, String)>,
    pub undefined_symbols: Vec<(String, String)>,
}

impl LinkCallbacks for CollectAll {
    fn multiple_definition(&mut self, name: &str, kept_file: &str, other_file: &str) -> bool {
        self.multiple_definitions.push((
            name.to_string(),
            kept_file.to_string(),
            other_file.to_string(),
        ));
        true
    }

    fn unattached_reloc(&mut self, symbol: &str, file: &str, section: &str) -> bool {
        self.unattached_relocs
            .push((symbol.to_string(), file.to_string(), section.to_string()));
        true
    }

    fn reloc_overflow(&mut self, symbol: &str, kind: &str, file: &str, section: &str) -> bool {
        self.reloc_overflows.push((
            symbol.to_string(),
            kind.to_string(),
            file.to_string(),
            section.to_string(),
        ));
        true
    }

    fn undefined_symbol(&mut self, name: &str, file: &str) -> bool {
        self.undefined_symbols
            .push((name.to_string(), file.to_string()));
        true
    }
}
