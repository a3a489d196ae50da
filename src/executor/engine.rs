use std::sync::{mpsc, Arc};
use std::time::Instant;

use tracing::debug;

use crate::errors::HarnessError;
use crate::events::Event;
use crate::executor::results::RunResult;
use crate::host::{ConsoleProxy, ForeignTable, ModuleHost, TestInstance};
use crate::picker::TestDescriptor;

/// Drives the tests of one module, in manifest order, strictly one at a
/// time. Each test runs against a fresh instance so module-level state never
/// leaks between tests. Events go to the supplied sink; the executor knows
/// nothing about how far they travel.
pub struct Executor {
    host: ModuleHost,
    console: Arc<ConsoleProxy>,
    refs: Arc<ForeignTable>,
}

struct PanicText {
    payload: String,
    message: String,
}

impl Executor {
    /// Compile a module and wire up its capability imports.
    pub fn new(wasm_bytes: &[u8]) -> Result<Self, HarnessError> {
        let console = ConsoleProxy::new();
        let refs = ForeignTable::new();
        let host = ModuleHost::new(wasm_bytes, Arc::clone(&console), Arc::clone(&refs))?;
        Ok(Executor {
            host,
            console,
            refs,
        })
    }

    /// Run every test, emitting `run-start`, the per-test events, and
    /// `run-end`. A failing test never aborts the remaining tests.
    pub fn run(
        &self,
        tests: &[TestDescriptor],
        filtered: usize,
        emit: &mut dyn FnMut(Event),
    ) -> Result<RunResult, HarnessError> {
        let start = Instant::now();
        emit(Event::RunStart {
            total: tests.len(),
            filtered,
        });

        let mut failures = Vec::new();
        let mut ignored = 0usize;

        for test in tests {
            if test.ignore {
                ignored += 1;
                emit(Event::TestIgnored {
                    name: test.name.clone(),
                    reason: test.ignore_reason.clone(),
                });
                continue;
            }
            self.run_one(test, emit, &mut failures)?;
        }

        let failed = failures.len();
        let duration = start.elapsed();
        let result = RunResult {
            passed: tests.len() - failed - ignored,
            failed,
            ignored,
            filtered,
            failures,
            duration,
        };
        emit(Event::RunEnd {
            status: result.status(),
            passed: result.passed,
            failed: result.failed,
            ignored: result.ignored,
            filtered,
            duration_ms: duration.as_millis() as u64,
        });
        Ok(result)
    }

    fn run_one(
        &self,
        test: &TestDescriptor,
        emit: &mut dyn FnMut(Event),
        failures: &mut Vec<String>,
    ) -> Result<(), HarnessError> {
        debug!(test = %test.name, "running test");
        let mut fail = |error: String, should_panic: bool, emit: &mut dyn FnMut(Event)| {
            failures.push(test.name.clone());
            emit(Event::TestFailed {
                name: test.name.clone(),
                error,
                should_panic,
            });
        };

        let mut instance = match self.host.instantiate() {
            Ok(instance) => instance,
            Err(err) => {
                fail(err.to_string(), false, emit);
                return Ok(());
            }
        };

        let export = test.export_name();
        let func = match instance.lookup(export) {
            Some(func) => func,
            None => {
                fail(format!("missing export: {export}"), false, emit);
                return Ok(());
            }
        };

        // Capture everything the test logs; the guard restores the console
        // whichever way the call ends.
        let (lines_tx, lines_rx) = mpsc::channel();
        let outcome = {
            let _guard = self.console.begin(
                Box::new(move |line, stream, level| {
                    let _ = lines_tx.send((line.to_string(), stream, level));
                }),
                false,
            )?;
            instance.invoke(&func)
        };

        for (line, stream, level) in lines_rx.try_iter() {
            emit(Event::TestOutput {
                name: test.name.clone(),
                line,
                stream,
                level,
            });
        }

        match (test.should_panic, outcome) {
            (false, Ok(())) => emit(Event::TestOk {
                name: test.name.clone(),
                should_panic: false,
            }),
            (false, Err(trap)) => {
                let text = self.panic_text(&mut instance, &trap);
                fail(text.message, false, emit);
            }
            (true, Ok(())) => {
                fail("test did not panic as expected".to_string(), true, emit);
            }
            (true, Err(trap)) => {
                let text = self.panic_text(&mut instance, &trap);
                match &test.should_panic_reason {
                    Some(expected) if !text.payload.contains(expected.as_str()) => {
                        let error = format!(
                            "{}\nnote: panic did not contain expected string\n      panic message: \"{}\"\n expected substring: \"{}\"",
                            text.message,
                            escape_for_display(&text.payload),
                            escape_for_display(expected),
                        );
                        fail(error, true, emit);
                    }
                    _ => emit(Event::TestOk {
                        name: test.name.clone(),
                        should_panic: true,
                    }),
                }
            }
        }

        Ok(())
    }

    /// Pull the panic payload and message out of the module after a trap,
    /// clearing the table slots. A module without the accessors (or with
    /// nothing registered) falls back to the trap's own text.
    fn panic_text(&self, instance: &mut TestInstance, trap: &anyhow::Error) -> PanicText {
        let (payload, message) = instance.panic_handles();
        let fallback = || trap.root_cause().to_string();
        PanicText {
            payload: payload
                .filter(|handle| *handle >= 0)
                .map(|handle| self.refs.resolve(handle))
                .unwrap_or_else(&fallback),
            message: message
                .filter(|handle| *handle >= 0)
                .map(|handle| self.refs.resolve(handle))
                .unwrap_or_else(&fallback),
        }
    }
}

/// Make panic text printable on one line: control characters and
/// backslashes render as escape sequences.
pub fn escape_for_display(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Level, RunStatus, Stream};

    const FIXTURE: &str = r#"
        (module
          (import "host" "log" (func $log (param i32 i32 i32)))
          (import "host" "str_ref" (func $str_ref (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "bad input: -1")
          (data (i32.const 16) "checking the sum")
          (global $payload (mut i32) (i32.const -1))
          (global $message (mut i32) (i32.const -1))
          (global $count (mut i32) (i32.const 0))
          (func (export "add_ok"))
          (func (export "noisy_ok")
            (call $log (i32.const 0) (i32.const 16) (i32.const 16)))
          (func (export "boom")
            (call $log (i32.const 3) (i32.const 16) (i32.const 16))
            (global.set $payload (call $str_ref (i32.const 0) (i32.const 13)))
            (global.set $message (call $str_ref (i32.const 0) (i32.const 13)))
            unreachable)
          (func (export "counts")
            (global.set $count (i32.add (global.get $count) (i32.const 1)))
            (if (i32.ne (global.get $count) (i32.const 1)) (then unreachable)))
          (func (export "last_panic_payload") (result i32) (global.get $payload))
          (func (export "last_panic_message") (result i32) (global.get $message))
        )
    "#;

    fn descriptor(name: &str) -> TestDescriptor {
        TestDescriptor {
            name: name.to_string(),
            export: None,
            ignore: false,
            ignore_reason: None,
            should_panic: false,
            should_panic_reason: None,
        }
    }

    fn run(tests: Vec<TestDescriptor>) -> (RunResult, Vec<Event>) {
        let executor = Executor::new(FIXTURE.as_bytes()).unwrap();
        let mut events = Vec::new();
        let result = executor
            .run(&tests, 0, &mut |event| events.push(event))
            .unwrap();
        (result, events)
    }

    #[test]
    fn a_passing_test_emits_ok_and_the_worked_example_counts() {
        let (result, events) = run(vec![descriptor("add_ok")]);
        assert_eq!((result.passed, result.failed, result.ignored), (1, 0, 0));
        assert_eq!(result.status(), RunStatus::Ok);
        assert_eq!(
            events[0],
            Event::RunStart {
                total: 1,
                filtered: 0
            }
        );
        assert_eq!(
            events[1],
            Event::TestOk {
                name: "add_ok".to_string(),
                should_panic: false
            }
        );
        assert!(matches!(events[2], Event::RunEnd { status: RunStatus::Ok, passed: 1, .. }));
    }

    #[test]
    fn counts_always_add_up_to_the_total() {
        let mut ignored = descriptor("skipped");
        ignored.ignore = true;
        ignored.ignore_reason = Some("not ported yet".to_string());
        let mut failing = descriptor("boom");

        let (result, events) = run(vec![descriptor("add_ok"), ignored, failing.clone()]);
        assert_eq!(result.passed + result.failed + result.ignored, 3);
        assert_eq!((result.passed, result.failed, result.ignored), (1, 1, 1));
        assert_eq!(result.failures, vec!["boom".to_string()]);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::TestIgnored { name, reason: Some(reason) }
                if name == "skipped" && reason == "not ported yet"
        )));

        // An ignored should-panic test is still just ignored.
        failing.ignore = true;
        let (result, _) = run(vec![failing]);
        assert_eq!((result.passed, result.failed, result.ignored), (0, 0, 1));
    }

    #[test]
    fn an_unexpected_trap_reports_the_panic_message() {
        let (result, events) = run(vec![descriptor("boom")]);
        assert_eq!(result.failed, 1);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::TestFailed { name, error, should_panic: false }
                if name == "boom" && error == "bad input: -1"
        )));
    }

    #[test]
    fn output_events_precede_the_terminal_event() {
        let (_, events) = run(vec![descriptor("boom"), descriptor("add_ok")]);
        let positions: Vec<_> = events
            .iter()
            .enumerate()
            .filter_map(|(index, event)| match event {
                Event::TestOutput { name, line, stream, .. } if name == "boom" => {
                    assert_eq!(line, "checking the sum");
                    assert_eq!(*stream, Stream::Stderr);
                    Some(index)
                }
                Event::TestFailed { name, .. } if name == "boom" => Some(index),
                Event::TestOk { name, .. } if name == "add_ok" => Some(index),
                _ => None,
            })
            .collect();
        // Output, then boom's terminal event, then the next test's.
        assert_eq!(positions.len(), 3);
        assert!(positions[0] < positions[1] && positions[1] < positions[2]);
    }

    #[test]
    fn noisy_output_is_tagged_with_its_level() {
        let (_, events) = run(vec![descriptor("noisy_ok")]);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::TestOutput { level: Level::Log, stream: Stream::Stdout, .. }
        )));
    }

    #[test]
    fn should_panic_is_satisfied_by_any_trap_without_a_reason() {
        let mut test = descriptor("boom");
        test.should_panic = true;
        let (result, events) = run(vec![test]);
        assert_eq!((result.passed, result.failed), (1, 0));
        assert!(events.contains(&Event::TestOk {
            name: "boom".to_string(),
            should_panic: true
        }));
    }

    #[test]
    fn should_panic_with_a_matching_substring_passes() {
        let mut test = descriptor("boom");
        test.should_panic = true;
        test.should_panic_reason = Some("bad input".to_string());
        let (result, _) = run(vec![test]);
        assert_eq!((result.passed, result.failed), (1, 0));
    }

    #[test]
    fn should_panic_with_a_mismatched_substring_reports_both_texts() {
        let mut test = descriptor("boom");
        test.should_panic = true;
        test.should_panic_reason = Some("other error".to_string());
        let (result, events) = run(vec![test]);
        assert_eq!(result.failed, 1);
        let error = events
            .iter()
            .find_map(|event| match event {
                Event::TestFailed { error, should_panic: true, .. } => Some(error.clone()),
                _ => None,
            })
            .unwrap();
        assert!(error.contains("note: panic did not contain expected string"));
        assert!(error.contains("panic message: \"bad input: -1\""));
        assert!(error.contains("expected substring: \"other error\""));
    }

    #[test]
    fn a_should_panic_test_that_returns_is_always_failed() {
        let mut test = descriptor("add_ok");
        test.should_panic = true;
        test.should_panic_reason = Some("anything".to_string());
        let (result, events) = run(vec![test]);
        assert_eq!((result.passed, result.failed), (0, 1));
        assert!(events.iter().any(|event| matches!(
            event,
            Event::TestFailed { error, should_panic: true, .. }
                if error == "test did not panic as expected"
        )));
    }

    #[test]
    fn a_missing_export_fails_without_invocation() {
        let (result, events) = run(vec![descriptor("no_such_test")]);
        assert_eq!(result.failed, 1);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::TestFailed { error, .. } if error == "missing export: no_such_test"
        )));
    }

    #[test]
    fn each_test_sees_a_fresh_instance() {
        let mut second = descriptor("counts_again");
        second.export = Some("counts".to_string());
        let (result, _) = run(vec![descriptor("counts"), second]);
        assert_eq!((result.passed, result.failed), (2, 0));
    }

    #[test]
    fn escaping_renders_control_characters() {
        assert_eq!(
            escape_for_display("a\\b\rc\nd\te\0f\u{8}g\u{c}h"),
            "a\\\\b\\rc\\nd\\te\\0f\\bg\\fh"
        );
        assert_eq!(escape_for_display("plain"), "plain");
    }
}
