//! Action sink implementations used by the binary
//!
//! - [`ConsoleSink`]: logs actions, tracks volume/mute in memory (dry run)
//! - [`ShellSink`]: runs configured shell command templates on the host

pub mod console;
pub mod shell;

pub use console::ConsoleSink;
pub use shell::{ShellActions, ShellSink};
