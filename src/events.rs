//! The event and message types that cross the engine/formatter and
//! controller/worker boundaries. Events are the sole channel between the
//! execution engine and whatever consumes it; no report state is shared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination stream for a line of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Severity of a line the module logged through the host capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl Level {
    /// Decode the level tag the module passes to `host.log`. Unknown tags
    /// fall back to `Log`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Level::Info,
            2 => Level::Debug,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Log,
        }
    }

    /// Warnings and errors belong on stderr, everything else on stdout.
    pub fn stream(self) -> Stream {
        match self {
            Level::Warn | Level::Error => Stream::Stderr,
            _ => Stream::Stdout,
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "FAILED")]
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunStatus::Ok => write!(f, "ok"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One occurrence during a run. Totally ordered within a run: events for a
/// test are fully emitted, output first, before the next test starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    RunStart {
        total: usize,
        filtered: usize,
    },
    TestOutput {
        name: String,
        line: String,
        stream: Stream,
        level: Level,
    },
    TestOk {
        name: String,
        should_panic: bool,
    },
    TestIgnored {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    TestFailed {
        name: String,
        error: String,
        #[serde(default)]
        should_panic: bool,
    },
    RunEnd {
        status: RunStatus,
        passed: usize,
        failed: usize,
        ignored: usize,
        filtered: usize,
        duration_ms: u64,
    },
}

/// A message relayed from a worker context back to its controller.
/// Exactly one `Report` terminates every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// A finished, rendered report line.
    Line { line: String },
    /// A line a test logged, forwarded to the controller's real console.
    UserOutput {
        line: String,
        stream: Stream,
        level: Level,
    },
    /// Terminal message: the full rendered report and the failure count.
    Report {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines: Option<Vec<String>>,
        failed: usize,
    },
}
