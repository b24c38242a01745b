//! Core of an XCOFF object-file linker for AIX/PowerPC, plus the
//! instruction-encoding and fixup pipeline shared with the accompanying
//! assembler.
//!
//! The crate is organized bottom-up: byte-level primitives
//! ([`endian`], [`pod`], [`io`]) and file-format layout ([`xcoff`]) at the
//! base; the in-memory symbol/section/fixup model
//! ([`symbol`], [`section`], [`fixup`], [`strtab`]) above that; the
//! multi-target encoder and relaxation engine ([`encode`], [`relax`])
//! alongside it; and the linker proper ([`link`]) built on top.
#![forbid(unsafe_op_in_unsafe_fn)]

pub mod callbacks;
pub mod config;
pub mod encode;
pub mod endian;
pub mod error;
pub mod fixup;
pub mod io;
pub mod link;
pub mod pod;
pub mod relax;
pub mod section;
pub mod strtab;
pub mod symbol;
pub mod xcoff;

pub use callbacks::LinkCallbacks;
pub use config::{AssemblerConfig, LinkerConfig, StripMode};
pub use error::{Error, ErrorKind, Result};
pub use link::{link, LinkInput, LinkOutput, LinkState};
