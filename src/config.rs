//! Configuration records consumed by the core.
//!
//! These are plain data: parsing argv into them is out of scope.

/// Options the assembler front-end hands the encoder/relaxation pipeline.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// `--mri`: MRI-compatible syntax mode.
    pub mri: bool,
    /// `--defsym name=value` pairs.
    pub defsym: Vec<(String, i64)>,
    /// `-J`: suppress signed-overflow diagnostics on fixup resolution.
    pub suppress_overflow: bool,
    /// `-K`: warn when a fixup's displacement is altered by relaxation.
    pub warn_displacement: bool,
    /// `-L`: keep local symbols that would otherwise be stripped.
    pub keep_locals: bool,
    /// `-R`: merge data section into text.
    pub merge_data_into_text: bool,
    /// `-Z`: still emit an object file after a non-fatal error.
    pub emit_on_error: bool,
    /// `-f`: skip the preprocessing pass.
    pub skip_preprocessing: bool,
    /// `-I dir` search path entries.
    pub include_paths: Vec<String>,
    /// `-little`/`-EL`/`-EB`: endianness for targets that allow a choice (SH).
    pub little_endian: Option<bool>,
    /// `-relax`: enable the SH relaxation engine.
    pub relax: bool,
    /// `-m<cpu>`: Alpha CPU variant name.
    pub cpu: Option<String>,
    /// `AS_EMULATION` environment variable / emulation name.
    pub emulation: Option<String>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            mri: false,
            defsym: Vec::new(),
            suppress_overflow: false,
            warn_displacement: false,
            keep_locals: false,
            merge_data_into_text: false,
            emit_on_error: false,
            skip_preprocessing: false,
            include_paths: Vec::new(),
            little_endian: None,
            relax: false,
            cpu: None,
            emulation: None,
        }
    }
}

/// Which symbols the final link pass strips while rewriting input symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripMode {
    /// Strip nothing beyond the mandatory `C_STAT`/resolved-`XTY_ER` rules.
    None,
    /// `strip=debugger`: also strip `N_DEBUG`-numbered symbols.
    Debugger,
    /// `strip=some`: use the `keep`/`discard` name sets below.
    Some,
    /// Strip everything strippable.
    All,
}

/// Options controlling the final link pass (C13) and GC (C10).
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    pub strip: StripMode,
    /// `discard=l`: drop local symbols matched by name.
    pub discard_locals: bool,
    /// Explicit keep set used when `strip == Some`.
    pub keep_symbols: Vec<String>,
    /// Explicit drop set used when `strip == Some`.
    pub drop_symbols: Vec<String>,
    /// Page alignment in bytes for `.pad` section insertion (0 disables
    /// it). Pad sections are never inserted after the last loadable
    /// section, only between two consecutive ones.
    pub file_align: usize,
    /// The user-specified entry point symbol name.
    pub entry_symbol: Option<String>,
    /// Symbols the caller wants exported into the `.loader` section, in
    /// addition to any symbol already marked `EXPORT` by an import file.
    pub export_symbols: Vec<String>,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        LinkerConfig {
            strip: StripMode::None,
            discard_locals: false,
            keep_symbols: Vec::new(),
            drop_symbols: Vec::new(),
            file_align: 0,
            entry_symbol: Some("_start".to_string()),
            export_symbols: Vec::new(),
        }
    }
}
