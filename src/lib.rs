//! Garnet - an embeddable Ruby-like dynamic language
//!
//! This library provides the garnet compiler, virtual machine, and the
//! host embedding API ([`interp::Interp`]).

pub mod compiler;
pub mod config;
pub mod error;
pub mod interp;
mod stdlib;
pub mod vfs;
pub mod vm;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use error::{Error, ErrorKind};
pub use interp::{DebugHook, Interp, NativeFn};
pub use vfs::{DiskFs, MemFs, Vfs};
pub use vm::{GcStats, Value};
