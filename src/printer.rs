//! Renders the execution event stream as conventional unit-test output.
//!
//! The formatter is a state machine over events: it owns the per-test
//! capture buffers and the ordered failure reports, and writes finished
//! lines to a `(line, stream)` sink. Output captured for a test is withheld
//! until the test is known to have failed; buffered output for a passing or
//! ignored test is discarded unseen.

use std::collections::HashMap;

use crate::events::{Event, RunStatus, Stream};

struct FailureReport {
    name: String,
    entries: Vec<(String, Stream)>,
    error: String,
}

pub struct TextFormatter<F: FnMut(&str, Stream)> {
    nocapture: bool,
    sink: F,
    buffered: HashMap<String, Vec<(String, Stream)>>,
    failed: Vec<String>,
    reports: Vec<FailureReport>,
}

impl<F: FnMut(&str, Stream)> TextFormatter<F> {
    pub fn new(nocapture: bool, sink: F) -> Self {
        TextFormatter {
            nocapture,
            sink,
            buffered: HashMap::new(),
            failed: Vec::new(),
            reports: Vec::new(),
        }
    }

    fn write(&mut self, line: &str, stream: Stream) {
        (self.sink)(line, stream);
    }

    fn take_buffer(&mut self, name: &str) -> Vec<(String, Stream)> {
        self.buffered.remove(name).unwrap_or_default()
    }

    pub fn on_event(&mut self, event: &Event) {
        use colored::*;

        match event {
            Event::RunStart { total, .. } => {
                self.write("", Stream::Stdout);
                self.write(&format!("running {total} tests"), Stream::Stdout);
            }
            Event::TestOutput {
                name, line, stream, ..
            } => {
                if self.nocapture {
                    self.write(line, *stream);
                } else {
                    self.buffered
                        .entry(name.clone())
                        .or_default()
                        .push((line.clone(), *stream));
                }
            }
            Event::TestOk { name, should_panic } => {
                self.take_buffer(name);
                let suffix = if *should_panic { " - should panic" } else { "" };
                self.write(
                    &format!("test {name}{suffix} ... {}", "ok".green()),
                    Stream::Stdout,
                );
            }
            Event::TestIgnored { name, reason } => {
                self.take_buffer(name);
                let status = match reason {
                    Some(reason) => format!("ignored, {reason}"),
                    None => "ignored".to_string(),
                };
                self.write(
                    &format!("test {name} ... {}", status.yellow()),
                    Stream::Stdout,
                );
            }
            Event::TestFailed {
                name,
                error,
                should_panic,
            } => {
                self.failed.push(name.clone());
                let suffix = if *should_panic { " - should panic" } else { "" };
                self.write(
                    &format!("test {name}{suffix} ... {}", "FAILED".red()),
                    Stream::Stdout,
                );
                let entries = self.take_buffer(name);
                self.reports.push(FailureReport {
                    name: name.clone(),
                    entries,
                    error: error.clone(),
                });
            }
            Event::RunEnd {
                status,
                passed,
                failed,
                ignored,
                filtered,
                duration_ms,
            } => {
                self.write("", Stream::Stdout);

                let reports = std::mem::take(&mut self.reports);
                let names = std::mem::take(&mut self.failed);
                if !names.is_empty() {
                    self.write("failures:", Stream::Stdout);
                    self.write("", Stream::Stdout);
                    for report in &reports {
                        self.write(&format!("---- {} stdout ----", report.name), Stream::Stdout);
                        for (line, stream) in &report.entries {
                            (self.sink)(line, *stream);
                        }
                        if !report.error.is_empty() {
                            self.write("", Stream::Stdout);
                            self.write(&report.error, Stream::Stdout);
                        }
                        self.write("", Stream::Stdout);
                    }
                    self.write("failures:", Stream::Stdout);
                    for name in &names {
                        self.write(&format!("    {name}"), Stream::Stdout);
                    }
                    self.write("", Stream::Stdout);
                }

                let status = match status {
                    RunStatus::Ok => "ok".green(),
                    RunStatus::Failed => "FAILED".red(),
                };
                let seconds = *duration_ms as f64 / 1000.0;
                self.write(
                    &format!(
                        "test result: {status}. {passed} passed; {failed} failed; {ignored} ignored; 0 measured; {filtered} filtered out; finished in {seconds:.2}s"
                    ),
                    Stream::Stdout,
                );
                self.write("", Stream::Stdout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Level;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn render(nocapture: bool, events: &[Event]) -> Vec<(String, Stream)> {
        colored::control::set_override(false);
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink_lines = Rc::clone(&lines);
        let mut formatter = TextFormatter::new(nocapture, move |line, stream| {
            sink_lines.borrow_mut().push((line.to_string(), stream));
        });
        for event in events {
            formatter.on_event(event);
        }
        let out = lines.borrow().clone();
        out
    }

    fn output(name: &str, line: &str) -> Event {
        Event::TestOutput {
            name: name.to_string(),
            line: line.to_string(),
            stream: Stream::Stdout,
            level: Level::Log,
        }
    }

    fn text(lines: &[(String, Stream)]) -> Vec<&str> {
        lines.iter().map(|(line, _)| line.as_str()).collect()
    }

    #[test]
    fn a_passing_run_matches_the_canonical_transcript() {
        let lines = render(
            false,
            &[
                Event::RunStart {
                    total: 1,
                    filtered: 0,
                },
                Event::TestOk {
                    name: "add_ok".to_string(),
                    should_panic: false,
                },
                Event::RunEnd {
                    status: RunStatus::Ok,
                    passed: 1,
                    failed: 0,
                    ignored: 0,
                    filtered: 0,
                    duration_ms: 3,
                },
            ],
        );
        assert_eq!(
            text(&lines),
            vec![
                "",
                "running 1 tests",
                "test add_ok ... ok",
                "",
                "test result: ok. 1 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.00s",
                "",
            ]
        );
    }

    #[test]
    fn captured_output_of_a_passing_test_is_discarded() {
        let lines = render(
            false,
            &[
                Event::RunStart {
                    total: 1,
                    filtered: 0,
                },
                output("add_ok", "scratch work"),
                Event::TestOk {
                    name: "add_ok".to_string(),
                    should_panic: false,
                },
                Event::RunEnd {
                    status: RunStatus::Ok,
                    passed: 1,
                    failed: 0,
                    ignored: 0,
                    filtered: 0,
                    duration_ms: 0,
                },
            ],
        );
        assert!(!text(&lines).contains(&"scratch work"));
    }

    #[test]
    fn a_failing_test_gets_its_buffered_output_and_error_in_order() {
        let lines = render(
            false,
            &[
                Event::RunStart {
                    total: 2,
                    filtered: 1,
                },
                output("boom", "first"),
                output("boom", "second"),
                Event::TestFailed {
                    name: "boom".to_string(),
                    error: "bad input: -1".to_string(),
                    should_panic: false,
                },
                Event::TestOk {
                    name: "add_ok".to_string(),
                    should_panic: false,
                },
                Event::RunEnd {
                    status: RunStatus::Failed,
                    passed: 1,
                    failed: 1,
                    ignored: 0,
                    filtered: 1,
                    duration_ms: 1234,
                },
            ],
        );
        assert_eq!(
            text(&lines),
            vec![
                "",
                "running 2 tests",
                "test boom ... FAILED",
                "test add_ok ... ok",
                "",
                "failures:",
                "",
                "---- boom stdout ----",
                "first",
                "second",
                "",
                "bad input: -1",
                "",
                "failures:",
                "    boom",
                "",
                "test result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 1 filtered out; finished in 1.23s",
                "",
            ]
        );
    }

    #[test]
    fn nocapture_writes_lines_immediately_on_their_stream() {
        let lines = render(
            true,
            &[
                Event::RunStart {
                    total: 1,
                    filtered: 0,
                },
                Event::TestOutput {
                    name: "noisy".to_string(),
                    line: "warning line".to_string(),
                    stream: Stream::Stderr,
                    level: Level::Warn,
                },
                Event::TestOk {
                    name: "noisy".to_string(),
                    should_panic: false,
                },
            ],
        );
        assert!(lines.contains(&("warning line".to_string(), Stream::Stderr)));
    }

    #[test]
    fn status_lines_mark_should_panic_and_ignore_reasons() {
        let lines = render(
            false,
            &[
                Event::TestOk {
                    name: "boom".to_string(),
                    should_panic: true,
                },
                Event::TestIgnored {
                    name: "slow".to_string(),
                    reason: Some("needs io".to_string()),
                },
                Event::TestFailed {
                    name: "quiet".to_string(),
                    error: "test did not panic as expected".to_string(),
                    should_panic: true,
                },
            ],
        );
        let rendered = text(&lines);
        assert!(rendered.contains(&"test boom - should panic ... ok"));
        assert!(rendered.contains(&"test slow ... ignored, needs io"));
        assert!(rendered.contains(&"test quiet - should panic ... FAILED"));
    }

    #[test]
    fn identical_runs_render_identical_text() {
        let events = vec![
            Event::RunStart {
                total: 1,
                filtered: 0,
            },
            output("boom", "state dump"),
            Event::TestFailed {
                name: "boom".to_string(),
                error: "bad input".to_string(),
                should_panic: false,
            },
            Event::RunEnd {
                status: RunStatus::Failed,
                passed: 0,
                failed: 1,
                ignored: 0,
                filtered: 0,
                duration_ms: 7,
            },
        ];
        assert_eq!(render(false, &events), render(false, &events));
    }
}
