//! Flat error kinds shared by every component.
//!
//! Mirrors the `bfd_error` list: the kinds are not hierarchical, and
//! every fallible entry point in this crate returns `Result<T>` rather
//! than panicking on malformed input.

use core::fmt;

/// The reason a core operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidOperation,
    WrongFormat,
    BadValue,
    NoSymbols,
    NoMoreArchivedFiles,
    NonRepresentableSection,
    FileTooBig,
    NoMemory,
    RelocOverflow,
    MultipleDefinition,
    UnattachedReloc,
    UndefinedSymbol,
    AmbiguousFormat,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidOperation => "invalid operation",
            ErrorKind::WrongFormat => "file format not recognized",
            ErrorKind::BadValue => "bad value",
            ErrorKind::NoSymbols => "no symbols",
            ErrorKind::NoMoreArchivedFiles => "no more archived files",
            ErrorKind::NonRepresentableSection => "section not representable in output format",
            ErrorKind::FileTooBig => "file too big",
            ErrorKind::NoMemory => "no memory",
            ErrorKind::RelocOverflow => "relocation truncated to fit",
            ErrorKind::MultipleDefinition => "multiple definition",
            ErrorKind::UnattachedReloc => "unattached relocation",
            ErrorKind::UndefinedSymbol => "undefined symbol",
            ErrorKind::AmbiguousFormat => "file format ambiguous",
        };
        f.write_str(s)
    }
}

/// A diagnostic carrying the `ErrorKind` plus whatever context (input file,
/// symbol, section) was available at the point of failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub file: Option<String>,
    pub symbol: Option<String>,
    pub section: Option<String>,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            file: None,
            symbol: None,
            section: None,
            message: message.into(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(file) = &self.file {
            write!(f, " (in {})", file)?;
        }
        if let Some(symbol) = &self.symbol {
            write!(f, " [symbol `{}`]", symbol)?;
        }
        if let Some(section) = &self.section {
            write!(f, " [section `{}`]", section)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

macro_rules! err {
    ($kind:ident, $($arg:tt)*) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($arg)*))
    };
}
pub(crate) use err;
