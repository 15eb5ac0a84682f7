//! External collaborators
//!
//! The core never talks to a window, clipboard or plugin directly. It
//! goes through these traits; [`Host::headless`] provides the versions
//! the CLI and the tests use.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

use crate::command::ActionKind;
use crate::error::{ArchiveError, Result};
use crate::state::ItemId;

/// What the notifier is told about a failed command.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: ActionKind,
    /// Ids the failed action targeted, for a manual retry
    pub targets: Vec<i64>,
    pub message: String,
}

/// User confirmation and file dialogs.
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Ask the user to confirm the operation named by `key`.
    async fn confirm(&self, key: &str) -> bool;

    /// Ask for a file to save to; `None` if the dialog was dismissed.
    async fn save_path(&self) -> Option<PathBuf>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn fail(&self, failure: &Failure);
}

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<()>;
}

#[async_trait]
pub trait PluginHost: Send + Sync {
    async fn export(&self, plugin: &str, data: &serde_json::Value) -> Result<()>;
}

/// Search index fed by transitions emitted with `meta.search`.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn refresh(&self, ids: &[ItemId]) -> Result<()>;
}

/// The set of collaborators handed to commands.
#[derive(Clone)]
pub struct Host {
    pub prompt: Arc<dyn Prompt>,
    pub notifier: Arc<dyn Notifier>,
    pub clipboard: Arc<dyn Clipboard>,
    pub plugins: Arc<dyn PluginHost>,
    pub search: Arc<dyn SearchIndex>,
}

impl Host {
    /// Collaborators for running without a UI: every confirmation is
    /// accepted, dialogs are dismissed, failures are logged.
    pub fn headless() -> Self {
        Self {
            prompt: Arc::new(AutoConfirm),
            notifier: Arc::new(LogNotifier),
            clipboard: Arc::new(NoClipboard),
            plugins: Arc::new(NoPlugins),
            search: Arc::new(NoSearch),
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = search;
        self
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::headless()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

struct AutoConfirm;

#[async_trait]
impl Prompt for AutoConfirm {
    async fn confirm(&self, _key: &str) -> bool {
        true
    }

    async fn save_path(&self) -> Option<PathBuf> {
        None
    }
}

struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn fail(&self, failure: &Failure) {
        error!(kind = ?failure.kind, targets = ?failure.targets, "{}", failure.message);
    }
}

struct NoClipboard;

#[async_trait]
impl Clipboard for NoClipboard {
    async fn write_text(&self, _text: &str) -> Result<()> {
        Err(ArchiveError::Collaborator("no clipboard available".into()))
    }
}

struct NoPlugins;

#[async_trait]
impl PluginHost for NoPlugins {
    async fn export(&self, plugin: &str, _data: &serde_json::Value) -> Result<()> {
        Err(ArchiveError::Collaborator(format!("plugin {} not loaded", plugin)))
    }
}

struct NoSearch;

#[async_trait]
impl SearchIndex for NoSearch {
    async fn refresh(&self, ids: &[ItemId]) -> Result<()> {
        debug!(?ids, "search refresh skipped");
        Ok(())
    }
}
