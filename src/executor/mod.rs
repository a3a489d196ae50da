//! The executor drives one module through its declared tests, classifies
//! each outcome against the should-panic expectation, and emits the event
//! stream everything downstream is built on.

mod engine;
pub mod results;

pub use engine::{escape_for_display, Executor};
