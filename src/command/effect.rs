//! The effect handle a command runs against.
//!
//! Every method is a suspension point: it yields to the scheduler, so
//! other commands' effects may interleave between two effects of the
//! same command, but a command's own effects always run in the order it
//! awaits them. Once the owning project starts closing, every effect
//! fails with [`ArchiveError::ProjectClosed`].

use futures_util::future::try_join_all;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use super::{ActionKind, History, HistoryFilter};
use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::host::Host;
use crate::session::Session;
use crate::state::{State, Transition};

pub struct Effects {
    kind: ActionKind,
    search: bool,
    session: Session,
    host: Host,
    config: Arc<Config>,
    history: Arc<Mutex<History>>,
}

impl Effects {
    pub(crate) fn new(
        kind: ActionKind,
        search: bool,
        session: Session,
        host: Host,
        config: Arc<Config>,
        history: Arc<Mutex<History>>,
    ) -> Self {
        Self {
            kind,
            search,
            session,
            host,
            config,
            history,
        }
    }

    fn check(&self) -> Result<()> {
        if self.session.is_closing() {
            return Err(ArchiveError::ProjectClosed);
        }
        Ok(())
    }

    /// Kind of the action this command runs for.
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Await an arbitrary asynchronous operation.
    pub async fn invoke<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        op.await
    }

    /// Run statements outside a transaction.
    pub async fn seq<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.check()?;
        self.session.store().seq(f).await
    }

    /// Run statements in one transaction; nothing is committed on error.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.check()?;
        self.session.store().transaction(f).await
    }

    /// Read from the current projection.
    pub async fn select<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        self.check()?;
        let value = self.session.read(f);
        tokio::task::yield_now().await;
        Ok(value)
    }

    /// Apply a transition to the projection.
    ///
    /// The search index is refreshed if the action asked for it.
    pub async fn emit(&self, transition: Transition) -> Result<()> {
        self.publish(transition, self.search).await
    }

    /// Apply a transition and always refresh the search index for it.
    pub async fn emit_indexed(&self, transition: Transition) -> Result<()> {
        self.publish(transition, true).await
    }

    async fn publish(&self, transition: Transition, search: bool) -> Result<()> {
        self.check()?;
        let ids = if search { transition.item_ids() } else { Vec::new() };
        self.session.apply(transition, search);

        if !ids.is_empty() {
            if let Err(e) = self.host.search.refresh(&ids).await {
                warn!(kind = ?self.kind, error = %e, "search refresh failed");
            }
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Wait on several effects; fails as soon as one of them fails.
    pub async fn all<I, F, T>(&self, effects: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        try_join_all(effects).await
    }

    /// Ask the user to confirm; `false` means cancel.
    pub async fn confirm(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.host.prompt.confirm(key).await)
    }

    /// Ask the user for a file to write to.
    pub async fn save_path(&self) -> Result<Option<PathBuf>> {
        self.check()?;
        Ok(self.host.prompt.save_path().await)
    }

    /// Remove history entries without running them.
    pub fn drop_history(&self, filter: HistoryFilter) -> usize {
        self.history.lock().discard(&filter)
    }
}

impl std::fmt::Debug for Effects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effects")
            .field("kind", &self.kind)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
