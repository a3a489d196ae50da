//! The lifecycle-bound worker adapter. Unlike the shared worker, this one
//! has a registration protocol: the scope thread signals activation before
//! it accepts any attachment, serves each attachment on a per-run port, and
//! shuts itself down after sitting idle. A later run finds the registration
//! dead and re-registers.

use std::sync::{mpsc as std_mpsc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::HarnessError;
use crate::events::RelayMessage;
use crate::relay::{worker, RelayChannel, RunJob};

/// How long the scope thread lingers with no attachments before exiting.
const IDLE_SHUTDOWN: Duration = Duration::from_secs(30);
/// How long a controller waits for the scope to activate.
const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);

struct Attach {
    job: RunJob,
    port: mpsc::UnboundedSender<RelayMessage>,
}

struct Registration {
    control: std_mpsc::Sender<Attach>,
}

fn registrations() -> &'static Mutex<Option<Registration>> {
    static REGISTRATION: OnceLock<Mutex<Option<Registration>>> = OnceLock::new();
    REGISTRATION.get_or_init(|| Mutex::new(None))
}

fn register() -> Result<Registration, HarnessError> {
    debug!("registering lifecycle worker");
    let (control_tx, control_rx) = std_mpsc::channel::<Attach>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<()>();

    std::thread::Builder::new()
        .name("modtest-lifecycle-worker".to_string())
        .spawn(move || {
            // Activated: attachments may arrive now.
            let _ = ready_tx.send(());
            while let Ok(attach) = control_rx.recv_timeout(IDLE_SHUTDOWN) {
                worker::serve(&attach.job, &|message| {
                    let _ = attach.port.send(message);
                });
            }
            debug!("lifecycle worker idled out");
        })
        .map_err(|err| HarnessError(format!("failed to spawn lifecycle worker: {err}")))?;

    ready_rx
        .recv_timeout(ACTIVATION_TIMEOUT)
        .map_err(|_| HarnessError("lifecycle worker never became active".to_string()))?;

    Ok(Registration {
        control: control_tx,
    })
}

/// Attach a run to the registered scope, registering (or re-registering,
/// when the previous worker idled out) as needed.
pub fn connect(job: RunJob) -> Result<RelayChannel, HarnessError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut slot = registrations().lock().unwrap();

    let mut attach = Attach { job, port: tx };
    if let Some(registration) = slot.as_ref() {
        match registration.control.send(attach) {
            Ok(()) => return Ok(RelayChannel::new(rx, None)),
            Err(std_mpsc::SendError(returned)) => {
                debug!("lifecycle registration is dead, re-registering");
                attach = returned;
            }
        }
    }

    let registration = register()?;
    registration
        .control
        .send(attach)
        .map_err(|_| HarnessError("lifecycle worker exited during activation".to_string()))?;
    *slot = Some(registration);
    Ok(RelayChannel::new(rx, None))
}
