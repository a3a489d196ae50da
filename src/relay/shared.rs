//! The shared-worker adapter: one long-lived worker thread serves every
//! controller that connects. Connections queue; the worker runs them one at
//! a time, each with its own reply port.

use std::sync::{mpsc as std_mpsc, Mutex, OnceLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::HarnessError;
use crate::events::RelayMessage;
use crate::relay::{worker, RelayChannel, RunJob};

struct Connection {
    job: RunJob,
    port: mpsc::UnboundedSender<RelayMessage>,
}

struct SharedWorker {
    connections: Mutex<std_mpsc::Sender<Connection>>,
}

static SHARED: OnceLock<SharedWorker> = OnceLock::new();

fn shared_worker() -> &'static SharedWorker {
    SHARED.get_or_init(|| {
        debug!("starting shared worker");
        let (tx, rx) = std_mpsc::channel::<Connection>();
        std::thread::spawn(move || {
            while let Ok(connection) = rx.recv() {
                worker::serve(&connection.job, &|message| {
                    let _ = connection.port.send(message);
                });
            }
        });
        SharedWorker {
            connections: Mutex::new(tx),
        }
    })
}

/// Connect to the shared worker and hand it the job. Releasing closes only
/// this connection's port; the worker itself lives on for later runs.
pub fn connect(job: RunJob) -> Result<RelayChannel, HarnessError> {
    let (tx, rx) = mpsc::unbounded_channel();
    shared_worker()
        .connections
        .lock()
        .unwrap()
        .send(Connection { job, port: tx })
        .map_err(|_| HarnessError("shared worker is not accepting connections".to_string()))?;
    Ok(RelayChannel::new(rx, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::TestDescriptor;
    use crate::relay::drive;

    fn job_for(module: std::path::PathBuf, name: &str) -> RunJob {
        RunJob {
            module,
            tests: vec![TestDescriptor {
                name: name.to_string(),
                export: None,
                ignore: false,
                ignore_reason: None,
                should_panic: false,
                should_panic_reason: None,
            }],
            filtered: 0,
            nocapture: false,
        }
    }

    #[tokio::test]
    async fn the_same_worker_serves_consecutive_connections() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("suite.wat");
        std::fs::write(
            &module,
            "(module (func (export \"add_ok\")) (func (export \"boom\") unreachable))",
        )
        .unwrap();

        let passing = drive(connect(job_for(module.clone(), "add_ok")).unwrap()).await;
        assert_eq!(passing.failed, 0);

        // Independent run, independent report, same worker.
        let failing = drive(connect(job_for(module, "boom")).unwrap()).await;
        assert_eq!(failing.failed, 1);
    }
}
