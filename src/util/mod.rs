//! Shared utilities

pub mod diagnostic;
pub mod files;
pub mod fs;
pub mod hash;
pub mod interning;

pub use diagnostic::Diagnostic;
pub use files::{FileHandle, FileSystemCache};
pub use interning::InternedString;
