//! Photo archive core
//!
//! Items own photos, tags and metadata and live in a per-project SQLite
//! file. Every change is made by a [`command::Command`] run through the
//! [`command::Interpreter`], which keeps an undo/redo [`command::History`].
//! The [`project::Coordinator`] owns the single open project.

pub mod command;
pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod project;
pub mod session;
pub mod state;
pub mod store;

pub use command::{Action, ActionKind, Interpreter, Outcome, Registry};
pub use config::Config;
pub use error::{ArchiveError, Result};
pub use host::Host;
pub use project::{Coordinator, ProjectEvent};
pub use session::Session;
pub use store::Store;
