//! Host capabilities supplied to a module under test: the logging surface,
//! the foreign-reference table for panic payloads, and the wasmtime wrapper
//! that wires both into a module instance.

mod console;
mod externref;
mod module;

pub use console::{CaptureGuard, ConsoleProxy};
pub use externref::ForeignTable;
pub use module::{HostState, ModuleHost, TestInstance};
