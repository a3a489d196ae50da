//! The secondary-process adapter: the harness spawns itself in a worker
//! role, configured entirely through the environment. The child renders the
//! run in its own process and relays messages as newline-delimited JSON on
//! stdout, or posts them to the controller's report endpoint when it has a
//! report URL instead of a return pipe.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::HarnessError;
use crate::events::RelayMessage;
use crate::relay::{report, worker, RelayChannel, RelayReport, RunJob, RELAY_TIMEOUT};

const CHILD_FLAG: &str = "MODTEST_CHILD";
const MODULE_VAR: &str = "MODTEST_MODULE";
const TESTS_VAR: &str = "MODTEST_TESTS";
const FILTERED_VAR: &str = "MODTEST_FILTERED";
const NOCAPTURE_VAR: &str = "MODTEST_NOCAPTURE";
const REPORT_URL_VAR: &str = "MODTEST_REPORT_URL";

fn command(job: &RunJob) -> Result<tokio::process::Command, HarnessError> {
    let exe = std::env::current_exe()?;
    let mut cmd = tokio::process::Command::new(exe);
    cmd.env(CHILD_FLAG, "1")
        .env(MODULE_VAR, &job.module)
        .env(TESTS_VAR, serde_json::to_string(&job.tests)?)
        .env(FILTERED_VAR, job.filtered.to_string())
        .env(NOCAPTURE_VAR, if job.nocapture { "1" } else { "0" })
        .env_remove(REPORT_URL_VAR)
        .kill_on_drop(true);
    Ok(cmd)
}

/// Spawn the worker process with a piped stdout and adapt its message
/// stream onto a relay channel. Releasing the channel kills the child.
pub fn spawn(job: &RunJob) -> Result<RelayChannel, HarnessError> {
    let mut cmd = command(job)?;
    cmd.stdout(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|err| HarnessError(format!("failed to spawn worker process: {err}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HarnessError("worker process has no stdout".to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<RelayMessage>(&line) {
                Ok(message) => {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(%err, "discarding malformed relay line"),
            }
        }
    });

    Ok(RelayChannel::new(
        rx,
        Some(Box::new(move || drop(child))),
    ))
}

/// Spawn the worker process against a freshly bound report endpoint and
/// wait for its terminal status, under the same ceiling as every other
/// relay. On timeout the child is killed and a single failure synthesized.
pub async fn run_http(job: &RunJob) -> Result<RelayReport, HarnessError> {
    let server = report::ReportServer::start(None, report::ReportServer::console_sink()).await?;
    let mut cmd = command(job)?;
    cmd.env(REPORT_URL_VAR, server.url());
    let mut child = cmd
        .spawn()
        .map_err(|err| HarnessError(format!("failed to spawn worker process: {err}")))?;

    let outcome = tokio::time::timeout(RELAY_TIMEOUT, server.finished()).await;
    let resolved = match outcome {
        Ok(status) => {
            debug!(?status, "worker reported over http");
            let _ = child.wait().await;
            RelayReport {
                lines: Vec::new(),
                failed: match status {
                    report::ReportStatus::Ok => 0,
                    report::ReportStatus::Failed | report::ReportStatus::Abnormal => 1,
                },
            }
        }
        Err(_) => {
            let _ = child.start_kill();
            RelayReport::synthesized("worker process never posted a terminal status".to_string())
        }
    };
    server.shutdown();
    Ok(resolved)
}

/// Whether this process was spawned as a worker.
pub fn is_child() -> bool {
    std::env::var(CHILD_FLAG).map(|value| value == "1").unwrap_or(false)
}

/// Entry point for the worker role: read the job from the environment and
/// relay over stdout, or over HTTP when a report URL is present.
pub fn child_main() -> Result<i32, HarnessError> {
    let job = job_from_env()?;

    if let Ok(url) = std::env::var(REPORT_URL_VAR) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(report::post_run(&job, &url))?;
        return Ok(0);
    }

    let stdout = std::io::stdout();
    worker::serve(&job, &|message| {
        if let Ok(line) = serde_json::to_string(&message) {
            let mut lock = stdout.lock();
            let _ = writeln!(lock, "{line}");
            let _ = lock.flush();
        }
    });
    Ok(0)
}

fn job_from_env() -> Result<RunJob, HarnessError> {
    let module = std::env::var(MODULE_VAR)
        .map_err(|_| HarnessError(format!("{MODULE_VAR} is not set")))?;
    let tests = std::env::var(TESTS_VAR)
        .map_err(|_| HarnessError(format!("{TESTS_VAR} is not set")))?;
    Ok(RunJob {
        module: PathBuf::from(module),
        tests: serde_json::from_str(&tests)?,
        filtered: std::env::var(FILTERED_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(0),
        nocapture: std::env::var(NOCAPTURE_VAR)
            .map(|value| value == "1")
            .unwrap_or(false),
    })
}
