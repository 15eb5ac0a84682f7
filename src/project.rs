//! Project lifecycle coordinator
//!
//! The coordinator owns at most one open project. Each open project runs
//! as its own task that drains the project's persist channel until it is
//! cancelled. An open request first cancels the running project task and
//! waits for it to finish its cleanup (store closed, `Closed` announced)
//! before the next project is opened, so two projects never persist at
//! the same time.

use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Action, ActionKind};
use crate::error::{ArchiveError, Result};
use crate::host::{Failure, Host};
use crate::session::Session;
use crate::state::Transition;
use crate::store;

/// Lifecycle notifications.
#[derive(Debug, Clone)]
pub enum ProjectEvent {
    Opened(Session),
    /// A persisted project update was written
    Saved { id: String, name: String },
    /// A persisted update failed and was reverted; the project stays open
    SaveFailed { id: String, message: String },
    /// The project's store is closed; `id` is `None` if it never opened
    Closed { file: PathBuf, id: Option<String> },
}

enum Request {
    Open(PathBuf),
    Shutdown,
}

/// Handle to the supervising task.
pub struct Coordinator {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<ProjectEvent>,
    task: JoinHandle<()>,
}

impl Coordinator {
    /// Start the supervisor on the current runtime.
    pub fn spawn(host: Host) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let task = tokio::spawn(supervise(rx, events.clone(), host));

        Self {
            requests,
            events,
            task,
        }
    }

    /// Close the current project (if any) and open `file`.
    pub fn open(&self, file: impl AsRef<Path>) -> Result<()> {
        self.requests
            .send(Request::Open(file.as_ref().to_path_buf()))
            .map_err(|_| ArchiveError::ProjectClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.events.subscribe()
    }

    /// Close the current project and stop the supervisor.
    pub async fn shutdown(self) -> Result<()> {
        // The supervisor may already be gone
        let _ = self.requests.send(Request::Shutdown);
        self.task.await?;
        Ok(())
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Running {
    /// Cancel the project task and wait for its cleanup to finish.
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "project task failed");
        }
    }
}

async fn supervise(
    mut requests: mpsc::UnboundedReceiver<Request>,
    events: broadcast::Sender<ProjectEvent>,
    host: Host,
) {
    let mut current: Option<Running> = None;

    while let Some(request) = requests.recv().await {
        if let Some(running) = current.take() {
            running.stop().await;
        }

        match request {
            Request::Open(file) => {
                let cancel = CancellationToken::new();
                let task = tokio::spawn(run_project(
                    file,
                    cancel.clone(),
                    events.clone(),
                    host.clone(),
                ));
                current = Some(Running { cancel, task });
            }
            Request::Shutdown => break,
        }
    }

    if let Some(running) = current.take() {
        running.stop().await;
    }
    debug!("project supervisor stopped");
}

async fn run_project(
    file: PathBuf,
    cancel: CancellationToken,
    events: broadcast::Sender<ProjectEvent>,
    host: Host,
) {
    let (session, mut persist) = match Session::open(&file, cancel.clone()).await {
        Ok(opened) => opened,
        Err(e) => {
            error!(file = %file.display(), error = %e, "failed to open project");
            let _ = events.send(ProjectEvent::Closed { file, id: None });
            return;
        }
    };

    let id = session.project().id;
    info!(project = %id, file = %file.display(), "project opened");
    let _ = events.send(ProjectEvent::Opened(session.clone()));

    loop {
        let action = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(project = %id, "project cancelled");
                break;
            }
            action = persist.recv() => match action {
                Some(action) => action,
                None => break,
            },
        };
        // A started write runs to completion before cancellation is honoured
        save(&session, action, &events, &host).await;
    }

    // Make sure commands still holding the session see the project as closing
    cancel.cancel();
    if let Err(e) = session.store().close().await {
        warn!(project = %id, error = %e, "failed to close project store");
    }
    let _ = events.send(ProjectEvent::Closed {
        file,
        id: Some(id.clone()),
    });
    info!(project = %id, "project closed");
}

/// Write one persist-marked action.
///
/// The projection is updated first; if the write fails, the previous value
/// is applied again and the failure reported. The project stays open.
async fn save(
    session: &Session,
    action: Action,
    events: &broadcast::Sender<ProjectEvent>,
    host: &Host,
) {
    if action.kind != ActionKind::ProjectSave {
        warn!(kind = ?action.kind, "not a project update, ignored");
        return;
    }
    let name = match action.project_patch() {
        Ok(patch) => patch.name.clone(),
        Err(e) => {
            warn!(error = %e, "invalid persist action");
            return;
        }
    };

    let project = session.project();
    session.apply(Transition::ProjectUpdate { name: name.clone() }, false);

    let (id, value) = (project.id.clone(), name.clone());
    let written = session
        .store()
        .seq(move |conn| store::project::rename(conn, &id, &value))
        .await;

    match written {
        Ok(()) => {
            info!(project = %project.id, %name, "project saved");
            let _ = events.send(ProjectEvent::Saved {
                id: project.id,
                name,
            });
        }
        Err(e) => {
            warn!(project = %project.id, error = %e, "project save failed");
            session.apply(
                Transition::ProjectUpdate {
                    name: project.name,
                },
                false,
            );
            let message = e.to_string();
            host.notifier
                .fail(&Failure {
                    kind: action.kind,
                    targets: Vec::new(),
                    message: message.clone(),
                })
                .await;
            let _ = events.send(ProjectEvent::SaveFailed {
                id: project.id,
                message,
            });
        }
    }
}
