//! The dedicated-worker adapter: one fresh background thread per run,
//! reachable only through its message channel.

use tokio::sync::mpsc;

use crate::errors::HarnessError;
use crate::relay::{worker, RelayChannel, RunJob};

/// Start a worker thread for the job. Releasing the channel detaches the
/// worker; with its sender gone, nothing it produces afterwards is
/// observable.
pub fn spawn(job: RunJob) -> Result<RelayChannel, HarnessError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = std::thread::Builder::new()
        .name("modtest-worker".to_string())
        .spawn(move || {
            worker::serve(&job, &|message| {
                let _ = tx.send(message);
            });
        })
        .map_err(|err| HarnessError(format!("failed to spawn worker thread: {err}")))?;

    Ok(RelayChannel::new(
        rx,
        Some(Box::new(move || drop(handle))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::TestDescriptor;
    use crate::relay::drive;

    #[tokio::test]
    async fn a_dedicated_worker_relays_a_full_run() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("suite.wat");
        std::fs::write(&module, "(module (func (export \"add_ok\")))").unwrap();

        let job = RunJob {
            module,
            tests: vec![TestDescriptor {
                name: "add_ok".to_string(),
                export: None,
                ignore: false,
                ignore_reason: None,
                should_panic: false,
                should_panic_reason: None,
            }],
            filtered: 0,
            nocapture: false,
        };

        let report = drive(spawn(job).unwrap()).await;
        assert_eq!(report.failed, 0);
        assert!(report
            .lines
            .iter()
            .any(|line| line.contains("test add_ok ... ")));
        assert!(report
            .lines
            .iter()
            .any(|line| line.contains("1 passed; 0 failed")));
    }
}
