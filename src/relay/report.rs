//! The HTTP report boundary, for a worker with no direct return channel.
//!
//! The controller runs a small endpoint: ordered `POST /report` calls carry
//! one rendered line each, and a single `POST /finished` carries the
//! terminal status. Lines may arrive out of order (the worker posts them
//! concurrently); the endpoint re-sequences them by their order stamp and
//! emits each to the report sink as soon as its turn comes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::debug;

use crate::errors::HarnessError;
use crate::events::{RelayMessage, Stream};
use crate::relay::{worker, RunJob};

pub type ReportSink = Arc<dyn Fn(&str, Stream) + Send + Sync>;

/// One rendered line, stamped with its position in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportLine {
    pub order: usize,
    pub stream: Stream,
    pub line: String,
}

/// Terminal status of a reported run. `Abnormal` means the counts were
/// computed but at least one report POST never made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Ok,
    Failed,
    Abnormal,
}

#[derive(Debug, Serialize, Deserialize)]
struct Finished {
    status: ReportStatus,
}

#[derive(Default)]
struct Reorder {
    next: usize,
    pending: BTreeMap<usize, ReportLine>,
}

struct ServerState {
    reorder: Mutex<Reorder>,
    finished: Mutex<Option<ReportStatus>>,
    notify: Notify,
    sink: ReportSink,
}

pub struct ReportServer {
    url: String,
    state: Arc<ServerState>,
    task: tokio::task::JoinHandle<()>,
}

impl ReportServer {
    /// Bind the endpoint. With no address given, an ephemeral localhost
    /// port is used; the worker learns the URL from its environment.
    pub async fn start(address: Option<SocketAddr>, sink: ReportSink) -> Result<Self, HarnessError> {
        let address = address.unwrap_or_else(|| SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0));
        let listener = TcpListener::bind(address)
            .await
            .map_err(|err| HarnessError(format!("failed to bind report endpoint: {err}")))?;
        let local_addr = listener.local_addr()?;
        let url = format!("http://{}:{}", local_addr.ip(), local_addr.port());
        debug!(%url, "report endpoint listening");

        let state = Arc::new(ServerState {
            reorder: Mutex::new(Reorder::default()),
            finished: Mutex::new(None),
            notify: Notify::new(),
            sink,
        });
        let router = Router::new()
            .route("/report", post(report))
            .route("/finished", post(finished))
            .with_state(Arc::clone(&state));
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                debug!(%err, "report endpoint exited");
            }
        });

        Ok(ReportServer { url, state, task })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve once the terminal status POST lands.
    pub async fn finished(&self) -> ReportStatus {
        loop {
            let notified = self.state.notify.notified();
            if let Some(status) = *self.state.finished.lock().unwrap() {
                return status;
            }
            notified.await;
        }
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }

    /// The default sink: the controller's real streams.
    pub fn console_sink() -> ReportSink {
        Arc::new(|line, stream| match stream {
            Stream::Stdout => println!("{line}"),
            Stream::Stderr => eprintln!("{line}"),
        })
    }
}

async fn report(State(state): State<Arc<ServerState>>, Json(line): Json<ReportLine>) {
    let reorder = &mut *state.reorder.lock().unwrap();
    if line.order < reorder.next {
        debug!(order = line.order, "discarding replayed report line");
        return;
    }
    if line.order > reorder.next {
        reorder.pending.insert(line.order, line);
        return;
    }

    (state.sink)(&line.line, line.stream);
    reorder.next += 1;
    loop {
        let next = reorder.next;
        match reorder.pending.remove(&next) {
            Some(entry) => {
                (state.sink)(&entry.line, entry.stream);
                reorder.next += 1;
            }
            None => break,
        }
    }
}

async fn finished(State(state): State<Arc<ServerState>>, Json(body): Json<Finished>) {
    debug!(status = ?body.status, "report finished");
    *state.finished.lock().unwrap() = Some(body.status);
    state.notify.notify_waiters();
}

/// Worker side: run the job in this context, post every rendered line with
/// its order stamp, wait for the POSTs to settle, then post the terminal
/// status. The status is `ok` only when the run passed and every POST
/// succeeded; a lost line degrades it to `abnormal` without touching the
/// counts already rendered.
pub async fn post_run(job: &RunJob, base_url: &str) -> Result<(), HarnessError> {
    let collected = RefCell::new(Vec::new());
    worker::serve(job, &|message| collected.borrow_mut().push(message));
    let messages = collected.into_inner();

    let client = reqwest::Client::new();
    let mut posts = Vec::new();
    let mut order = 0usize;
    let mut run_failed = 0usize;
    for message in messages {
        let (stream, line) = match message {
            RelayMessage::Line { line } => (Stream::Stdout, line),
            RelayMessage::UserOutput { line, stream, .. } => (stream, line),
            RelayMessage::Report { failed, .. } => {
                run_failed = failed;
                continue;
            }
        };
        posts.push(post_line(&client, base_url, ReportLine { order, stream, line }));
        order += 1;
    }

    let results = futures::future::join_all(posts).await;
    let lost = results.iter().any(Result::is_err);
    let status = if lost {
        ReportStatus::Abnormal
    } else if run_failed > 0 {
        ReportStatus::Failed
    } else {
        ReportStatus::Ok
    };

    client
        .post(format!("{base_url}/finished"))
        .json(&Finished { status })
        .send()
        .await
        .map_err(|err| HarnessError(format!("failed to post terminal status: {err}")))?;
    Ok(())
}

async fn post_line(
    client: &reqwest::Client,
    base_url: &str,
    line: ReportLine,
) -> Result<(), reqwest::Error> {
    client
        .post(format!("{base_url}/report"))
        .json(&line)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
