//! Linker core: hash & archive scan (C9), GC mark/sweep (C10), loader
//! section (C11), stub synthesis (C12), and the final link pass (C13).

pub mod gc;
pub mod hash;
pub mod loader;
pub mod pass;
pub mod stubs;
pub mod toc;

pub use hash::LinkState;
pub use pass::{link, LinkInput, LinkOutput};
