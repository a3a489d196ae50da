//! The transport family: adapters that run the executor inside a target
//! host context and relay its output back to the controlling context.
//!
//! Every message-backed adapter honors the same contract: rendered lines
//! stream back as they are produced, test output is forwarded for the
//! controller's real console, and exactly one terminal report closes the
//! run. The shared driver owns the timeout ceiling, the message pump, and
//! the exactly-once release of the underlying context; adapters only know
//! how to start their context and how to tear it down.

pub mod dedicated;
pub mod in_process;
pub mod lifecycle;
pub mod process;
pub mod report;
pub mod shared;
mod worker;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::HarnessError;
use crate::events::{RelayMessage, Stream};
use crate::picker::TestDescriptor;

/// Ceiling on how long a controller waits for a relayed run.
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Host context a run executes in. The spawner is the only component that
/// looks at this; adapters are symmetric in the contract they honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Run directly in the controlling context.
    InProcess,
    /// A fresh background worker thread per run.
    Dedicated,
    /// One long-lived worker thread shared by every connection.
    Shared,
    /// A registered worker that activates before serving and shuts down
    /// when idle.
    Lifecycle,
    /// A secondary native process relaying over its stdout.
    Process,
}

impl FromStr for ContextKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-process" => Ok(ContextKind::InProcess),
            "dedicated" => Ok(ContextKind::Dedicated),
            "shared" => Ok(ContextKind::Shared),
            "lifecycle" => Ok(ContextKind::Lifecycle),
            "process" => Ok(ContextKind::Process),
            _ => Err(HarnessError(
                "must be one of in-process, dedicated, shared, lifecycle, process".to_string(),
            )),
        }
    }
}

/// Everything a target context needs to execute a run. The context loads
/// the module bytes itself.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub module: PathBuf,
    pub tests: Vec<TestDescriptor>,
    pub filtered: usize,
    pub nocapture: bool,
}

/// What a run resolves to on the controller side: the rendered report and
/// the failure count the exit status derives from.
#[derive(Debug)]
pub struct RelayReport {
    pub lines: Vec<String>,
    pub failed: usize,
}

impl RelayReport {
    fn synthesized(message: String) -> Self {
        eprintln!("error: {message}");
        RelayReport {
            lines: vec![message],
            failed: 1,
        }
    }
}

/// The controller's end of a running context: the message stream plus a
/// teardown that releases the context. Release happens at most once.
pub struct RelayChannel {
    messages: mpsc::UnboundedReceiver<RelayMessage>,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl RelayChannel {
    pub fn new(
        messages: mpsc::UnboundedReceiver<RelayMessage>,
        teardown: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        RelayChannel { messages, teardown }
    }

    fn release(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            debug!("releasing relay context");
            teardown();
        }
    }
}

/// Select the adapter for `kind` and run the job through it. Setup
/// failures, channel errors, and timeouts all resolve to a synthesized
/// single-failure report; a launch never hangs and never panics the
/// controller.
pub async fn launch(kind: ContextKind, job: RunJob, http_report: bool) -> RelayReport {
    debug!(?kind, "launching run");
    let result = match kind {
        ContextKind::InProcess => in_process::run(&job),
        ContextKind::Dedicated => match dedicated::spawn(job) {
            Ok(channel) => Ok(drive(channel).await),
            Err(err) => Err(err),
        },
        ContextKind::Shared => match shared::connect(job) {
            Ok(channel) => Ok(drive(channel).await),
            Err(err) => Err(err),
        },
        ContextKind::Lifecycle => match lifecycle::connect(job) {
            Ok(channel) => Ok(drive(channel).await),
            Err(err) => Err(err),
        },
        ContextKind::Process if http_report => process::run_http(&job).await,
        ContextKind::Process => match process::spawn(&job) {
            Ok(channel) => Ok(drive(channel).await),
            Err(err) => Err(err),
        },
    };

    result.unwrap_or_else(|err| RelayReport::synthesized(err.to_string()))
}

/// Pump messages from a context until its terminal report, the timeout
/// ceiling, or channel closure. Lines print as they arrive; forwarded test
/// output goes to the real console.
pub async fn drive(channel: RelayChannel) -> RelayReport {
    drive_until(channel, tokio::time::Instant::now() + RELAY_TIMEOUT).await
}

async fn drive_until(mut channel: RelayChannel, deadline: tokio::time::Instant) -> RelayReport {
    let mut lines = Vec::new();
    let mut streamed = false;

    loop {
        let message = match tokio::time::timeout_at(deadline, channel.messages.recv()).await {
            Err(_) => {
                channel.release();
                return RelayReport::synthesized(
                    "relay timed out waiting for a report".to_string(),
                );
            }
            Ok(None) => {
                channel.release();
                return RelayReport::synthesized(
                    "relay channel closed before a report arrived".to_string(),
                );
            }
            Ok(Some(message)) => message,
        };

        match message {
            RelayMessage::Line { line } => {
                streamed = true;
                println!("{line}");
                lines.push(line);
            }
            RelayMessage::UserOutput { line, stream, .. } => match stream {
                Stream::Stdout => println!("{line}"),
                Stream::Stderr => eprintln!("{line}"),
            },
            RelayMessage::Report {
                lines: reported,
                failed,
            } => {
                channel.release();
                // A context that never streamed (the synthesized failure
                // path) carries its lines in the report instead.
                if !streamed {
                    if let Some(reported) = reported {
                        for line in &reported {
                            println!("{line}");
                        }
                        lines = reported;
                    }
                }
                return RelayReport { lines, failed };
            }
        }
    }
}
