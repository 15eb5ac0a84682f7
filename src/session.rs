//! One open project: its store, its in-memory projection and the channels
//! connecting it to the project coordinator.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::command::Action;
use crate::error::{ArchiveError, Result};
use crate::state::{ProjectInfo, State, Transition};
use crate::store::{self, Store};

/// A transition as it was applied to the projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub transition: Transition,
    /// Whether the search index was asked to refresh
    pub search: bool,
}

/// Handle to the open project. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    store: Store,
    state: Arc<RwLock<State>>,
    transitions: broadcast::Sender<Emitted>,
    persist: mpsc::UnboundedSender<Action>,
    cancel: CancellationToken,
}

impl Session {
    /// Open a project file and load its projection.
    ///
    /// Returns the receiving end of the persist channel; the project
    /// coordinator drains it for as long as the project stays open.
    pub async fn open(
        file: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Action>)> {
        let file = file.as_ref().to_path_buf();
        let store = Store::open(&file).await?;

        let loaded = store
            .seq(move |conn| store::project::load_state(conn, &file))
            .await;
        let state = match loaded {
            Ok(state) => state,
            Err(e) => {
                store.close().await?;
                return Err(e);
            }
        };

        let (persist, rx) = mpsc::unbounded_channel();
        let (transitions, _) = broadcast::channel(256);

        let session = Self {
            store,
            state: Arc::new(RwLock::new(state)),
            transitions,
            persist,
            cancel,
        };
        Ok((session, rx))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn project(&self) -> ProjectInfo {
        self.state.read().project.clone()
    }

    /// Copy of the whole projection.
    pub fn snapshot(&self) -> State {
        self.state.read().clone()
    }

    /// Read part of the projection under the lock.
    pub fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.state.read())
    }

    /// Apply a transition and announce it to subscribers.
    pub fn apply(&self, transition: Transition, search: bool) {
        self.state.write().apply(&transition);
        trace!(?transition, "transition applied");
        // No subscribers is fine
        let _ = self.transitions.send(Emitted { transition, search });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Emitted> {
        self.transitions.subscribe()
    }

    /// Hand a persist-marked action to the coordinator.
    pub fn forward(&self, action: Action) -> Result<()> {
        self.persist
            .send(action)
            .map_err(|_| ArchiveError::ProjectClosed)
    }

    /// Whether the coordinator has started closing this project.
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("closing", &self.is_closing())
            .finish()
    }
}
