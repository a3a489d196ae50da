//! Modtest runs the tests compiled into a WebAssembly module and reports
//! them the way a native unit-test run would.
//!
//! A test module exposes one nullary export per test plus a small
//! capability surface (a logging import, a string-reference import, and two
//! panic accessors); the build step records the declared tests — names,
//! ignore markers, should-panic expectations — in a manifest. Modtest
//! instantiates the module, invokes every test in manifest order, captures
//! what each test logs, classifies the outcome, and renders the familiar
//! report:
//!
//! ```text
//! running 2 tests
//! test add_ok ... ok
//! test boom - should panic ... ok
//!
//! test result: ok. 2 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.02s
//! ```
//!
//! ## Running a module
//!
//! Point modtest at a module and, unless the manifest is embedded in the
//! module itself, at the manifest the build step wrote:
//! ```bash
//! modtest target/suite.wasm --manifest target/tests.json
//! ```
//! Name filters work like the native harness: positional substrings,
//! `--exact`, `--ignored`, and the `--include`/`--exclude` regexes. Tests
//! removed by filtering are not run; the summary reports how many were
//! filtered out. `--list` prints the surviving names instead of running.
//!
//! ## Host contexts
//!
//! The same run can execute in different host contexts without changing
//! what is reported. `--context` (or `MODTEST_CONTEXT`) selects one:
//!
//!   - `in-process` — the default; the engine runs right here.
//!   - `dedicated` — a fresh background worker thread.
//!   - `shared` — one long-lived worker shared by every connection.
//!   - `lifecycle` — a registered worker that activates before serving and
//!     shuts down when idle.
//!   - `process` — a secondary process relaying JSON messages over its
//!     stdout, or posting to an HTTP report endpoint with `--http-report`.
//!
//! Worker contexts render the report where they run and stream finished
//! lines back; every relay resolves — with a terminal report, or with a
//! synthesized failure after the 30 second ceiling.
//!
//! ## Output capture
//!
//! Everything a test logs through the module's logging capability is
//! buffered per test and shown only if that test fails, under its
//! `---- <name> stdout ----` section. `--nocapture` prints lines as they
//! come instead. The exit status is 0 exactly when no test failed.

pub mod cli;
pub mod errors;
pub mod events;
pub mod executor;
pub mod host;
pub mod picker;
pub mod printer;
pub mod relay;
