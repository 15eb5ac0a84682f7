//! Runs commands, one task each, and keeps the history in step.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Action, Effects, History, Outcome, Registry};
use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::host::{Failure, Host};
use crate::session::Session;
use crate::state::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// A fresh command: recorded in the history
    Record,
    /// The inner run of an undo or redo
    Bypass,
}

/// Scheduler for the commands of one open project.
#[derive(Clone)]
pub struct Interpreter {
    registry: Arc<Registry>,
    session: Session,
    host: Host,
    config: Arc<Config>,
    history: Arc<Mutex<History>>,
}

impl Interpreter {
    pub fn new(registry: Arc<Registry>, session: Session, host: Host, config: Arc<Config>) -> Self {
        Self {
            registry,
            session,
            host,
            config,
            history: Arc::new(Mutex::new(History::new())),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn history(&self) -> &Arc<Mutex<History>> {
        &self.history
    }

    /// Start a command in the background.
    pub fn dispatch(&self, action: Action) -> JoinHandle<Result<Outcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute(action).await })
    }

    /// Run a command to completion and record it.
    pub async fn execute(&self, action: Action) -> Result<Outcome> {
        self.run(action, Mode::Record).await
    }

    /// Revert the most recent history entry.
    ///
    /// Returns `Ok(None)` if there is nothing to undo. If the inverse
    /// fails, the error is reported and the history is left as it was.
    pub async fn undo(&self) -> Result<Option<Outcome>> {
        let Some(entry) = self.history.lock().peek_undo() else {
            return Ok(None);
        };
        debug!(kind = ?entry.action.kind, seq = entry.seq, "undo");

        let outcome = self.run(entry.undo.clone(), Mode::Bypass).await?;
        if matches!(outcome, Outcome::Completed(_)) {
            self.history.lock().settle_undo(entry.seq);
        }
        Ok(Some(outcome))
    }

    /// Re-apply the most recently undone entry.
    pub async fn redo(&self) -> Result<Option<Outcome>> {
        let Some(entry) = self.history.lock().peek_redo() else {
            return Ok(None);
        };
        debug!(kind = ?entry.action.kind, seq = entry.seq, "redo");

        let outcome = self.run(entry.redo_action().clone(), Mode::Bypass).await?;
        if let Outcome::Completed(done) = &outcome {
            self.history.lock().settle_redo(entry.seq, done);
        }
        Ok(Some(outcome))
    }

    async fn run(&self, action: Action, mode: Mode) -> Result<Outcome> {
        // Commands write through their own transactions; only project
        // updates are left to the coordinator's persist loop
        if action.meta.persist && action.kind.is_project_update() {
            debug!(kind = ?action.kind, "forwarding to project");
            self.session.forward(action)?;
            return Ok(Outcome::Forwarded);
        }

        match self.spawn(action.clone()).await {
            Ok(outcome) => {
                if let Outcome::Completed(done) = &outcome {
                    let net = done.delta.net();
                    if net != 0 {
                        self.session.apply(Transition::ItemCount(net), false);
                    }
                    if mode == Mode::Record {
                        self.history.lock().record(&action, done);
                    }
                }
                debug!(kind = ?action.kind, ?mode, "command finished");
                Ok(outcome)
            }
            Err(e) => {
                self.report(&action, &e).await;
                Err(e)
            }
        }
    }

    async fn spawn(&self, action: Action) -> Result<Outcome> {
        let fx = Effects::new(
            action.kind,
            action.meta.search,
            self.session.clone(),
            self.host.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.history),
        );
        let command = self.registry.instantiate(action)?;

        tokio::spawn(async move { command.exec(&fx).await }).await?
    }

    async fn report(&self, action: &Action, error: &ArchiveError) {
        warn!(kind = ?action.kind, targets = ?action.targets(), error = %error, "command failed");
        let failure = Failure {
            kind: action.kind,
            targets: action.targets(),
            message: error.to_string(),
        };
        self.host.notifier.fail(&failure).await;
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("registry", &self.registry)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A project opened with the standard registry and recording host.

    use super::*;
    use crate::host::testing::Recorder;
    use crate::state::State;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    pub struct Fixture {
        pub dir: tempfile::TempDir,
        pub recorder: Arc<Recorder>,
        pub session: Session,
        pub interpreter: Interpreter,
        pub persist: mpsc::UnboundedReceiver<Action>,
    }

    impl Fixture {
        /// Open `test.tpy` in `dir` (seeded and closed by the caller).
        pub async fn open(dir: tempfile::TempDir) -> Self {
            Self::with_recorder(dir, Recorder::default()).await
        }

        pub async fn with_recorder(dir: tempfile::TempDir, recorder: Recorder) -> Self {
            let recorder = Arc::new(recorder);
            let (session, persist) =
                Session::open(dir.path().join("test.tpy"), CancellationToken::new())
                    .await
                    .unwrap();
            let interpreter = Interpreter::new(
                Arc::new(Registry::standard().unwrap()),
                session.clone(),
                recorder.host(),
                Arc::new(Config::default()),
            );
            Self {
                dir,
                recorder,
                session,
                interpreter,
                persist,
            }
        }

        pub fn state(&self) -> State {
            self.session.snapshot()
        }

        pub async fn execute(&self, action: Action) -> Outcome {
            self.interpreter.execute(action).await.unwrap()
        }

        /// The projection with transient view state stripped, for
        /// comparing states across runs.
        pub fn model(&self) -> State {
            normalize(self.state())
        }

        /// Assert the projection matches what is committed to the file.
        pub async fn assert_consistent(&self) {
            let file = self.session.project().file;
            let stored = self
                .session
                .store()
                .seq(move |conn| crate::store::project::load_state(conn, &file))
                .await
                .unwrap();

            let projected = self.model();
            let stored = normalize(stored);
            assert_eq!(projected.items, stored.items);
            assert_eq!(projected.photos, stored.photos);
            assert_eq!(projected.metadata, stored.metadata);
            assert_eq!(projected.project, stored.project);
            projected.check_ownership().unwrap();
        }
    }

    fn normalize(mut state: State) -> State {
        state.selection.clear();
        state.metadata.retain(|_, data| !data.is_empty());
        state
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::command::{ActionKind, ActionMeta, Command, Completion, Output, TagRef};
    use crate::state::ItemId;
    use crate::store::testing::*;
    use async_trait::async_trait;

    /// Trashes its items in parallel, refusing the first one, then selects them.
    struct Halting {
        action: Action,
    }

    impl Halting {
        fn build(action: Action) -> Box<dyn Command> {
            Box::new(Self { action })
        }
    }

    async fn trash(fx: &Effects, id: ItemId, refuse: bool) -> Result<()> {
        if refuse {
            return Err(ArchiveError::Invariant(format!("item {} refused", id)));
        }
        fx.emit(Transition::ItemsDeleted {
            ids: vec![id],
            deleted: true,
        })
        .await
    }

    #[async_trait]
    impl Command for Halting {
        async fn exec(&self, fx: &Effects) -> Result<Outcome> {
            let ids = self.action.ids()?.to_vec();
            fx.all(ids.iter().enumerate().map(|(i, id)| trash(fx, *id, i == 0)))
                .await?;
            fx.emit(Transition::Select(ids.clone())).await?;
            Outcome::done(Completion::new(Output::Ids(ids.clone())).undo(Action::restore(ids)))
        }
    }

    #[tokio::test]
    async fn test_new_command_after_undo_clears_redo() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        let (b, _) = seed_item(&store, &["/2.jpg"]).await;
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        fx.execute(Action::delete(vec![a])).await;
        fx.interpreter.undo().await.unwrap();
        assert!(fx.interpreter.history().lock().can_redo());

        fx.execute(Action::delete(vec![b])).await;
        assert!(!fx.interpreter.history().lock().can_redo());
        assert!(fx.interpreter.redo().await.unwrap().is_none());
        assert!(!fx.state().items[&a].deleted);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_stale_undo_target_fails_safely() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        let t = seed_tag(&store, "letters").await;
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        fx.execute(Action::add_tags(vec![a], vec![TagRef::Id(t)])).await;

        // The item disappears behind the history's back
        fx.session
            .store()
            .transaction(move |conn| crate::store::item::destroy(conn, &[a]))
            .await
            .unwrap();

        let before = fx.interpreter.history().lock().past().to_vec();
        let result = fx.interpreter.undo().await;

        let err = result.unwrap_err();
        assert!(err.is_invariant(), "unexpected error: {}", err);
        assert_eq!(fx.interpreter.history().lock().past(), &before[..]);
        assert!(!fx.interpreter.history().lock().can_redo());

        let failures = fx.recorder.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, ActionKind::RemoveTags);
        assert_eq!(failures[0].targets, vec![a]);
    }

    #[tokio::test]
    async fn test_persist_actions_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        scratch(&dir).await.close().await.unwrap();
        let mut fx = Fixture::open(dir).await;

        let outcome = fx.execute(Action::save_project("Renamed")).await;
        assert_eq!(outcome, Outcome::Forwarded);
        assert_eq!(fx.persist.recv().await.unwrap().kind, ActionKind::ProjectSave);
        assert!(!fx.interpreter.history().lock().can_undo());
    }

    #[tokio::test]
    async fn test_failed_sub_effect_aborts_command() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        let (b, _) = seed_item(&store, &["/2.jpg"]).await;
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        let registry = Registry::builder()
            .register(ActionKind::Load, Halting::build)
            .unwrap()
            .build();
        let interpreter = Interpreter::new(
            Arc::new(registry),
            fx.session.clone(),
            fx.recorder.host(),
            Arc::new(Config::default()),
        );

        let result = interpreter.execute(Action::load(vec![a, b])).await;

        assert!(matches!(result, Err(ArchiveError::Invariant(_))));
        assert!(!fx.state().items[&a].deleted);
        // Nothing after the join ran
        assert!(fx.state().selection.is_empty());
        assert!(!interpreter.history().lock().can_undo());
        assert_eq!(fx.state().project.items, 2);

        let failures = fx.recorder.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, ActionKind::Load);
        assert_eq!(failures[0].targets, vec![a, b]);
    }

    #[tokio::test]
    async fn test_persist_marked_command_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        store.close().await.unwrap();
        let mut fx = Fixture::open(dir).await;

        let action = Action::delete(vec![a]).with_meta(ActionMeta {
            persist: true,
            ..ActionMeta::default()
        });
        let outcome = fx.execute(action).await;

        assert!(outcome.completion().is_some());
        assert!(fx.state().items[&a].deleted);
        assert!(fx.interpreter.history().lock().can_undo());
        assert!(fx.persist.try_recv().is_err());
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_effects_fail_once_project_closes() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        fx.session.cancel_token().cancel();
        let result = fx.interpreter.execute(Action::delete(vec![a])).await;

        assert!(matches!(result, Err(ArchiveError::ProjectClosed)));
        assert!(!fx.state().items[&a].deleted);
    }

    #[tokio::test]
    async fn test_dispatch_runs_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        let handle = fx.interpreter.dispatch(Action::delete(vec![a]));
        let outcome = handle.await.unwrap().unwrap();

        assert!(outcome.completion().is_some());
        assert_eq!(fx.state().project.items, 0);
        assert!(fx.recorder.refreshed.lock().contains(&a));
        fx.assert_consistent().await;
    }
}
