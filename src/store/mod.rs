//! Relational store access
//!
//! A [`Store`] wraps the single SQLite connection of one open project.
//! It offers exactly two ways in:
//! - [`Store::seq`] runs one or more statements outside a transaction
//! - [`Store::transaction`] runs a closure inside one transaction that
//!   either commits completely or leaves the file untouched
//!
//! Both run on tokio's blocking pool and hold the connection lock for the
//! whole closure, so only one transaction is ever in flight per project.
//! The row-level helpers live in the submodules and take a plain
//! `&Connection`, which a `rusqlite::Transaction` derefs to.

pub mod item;
pub mod metadata;
pub mod photo;
pub mod project;
pub mod schema;
pub mod tag;

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ArchiveError, Result};

/// Handle to an open project file.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Option<Connection>>>,
    path: PathBuf,
}

impl Store {
    /// Open an existing project file (or create an empty one), configure
    /// pragmas and make sure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            // Ensure the parent directory exists
            if let Some(parent) = open_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let mut conn = Connection::open(&open_path)?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            schema::init_schema(&mut conn)?;
            Ok(conn)
        })
        .await??;

        info!(path = %path.display(), "opened project store");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
        })
    }

    /// Create a new project file with a fresh project id.
    pub async fn create(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let store = Self::open(path).await?;
        let name = name.into();
        let id = store.seq(move |conn| project::create(conn, &name)).await?;
        debug!(project = %id, "created project");
        Ok(store)
    }

    /// Get the path to the project file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`Store::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    /// Run statements against the connection without a transaction.
    pub async fn seq<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(ArchiveError::StoreClosed)?;
            f(conn)
        })
        .await?
    }

    /// Run a closure inside a single transaction.
    ///
    /// The transaction commits only if the closure returns `Ok`; any error
    /// drops it, which rolls every statement back.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard.as_mut().ok_or(ArchiveError::StoreClosed)?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await?
    }

    /// Close the connection. Waits for an in-flight transaction to finish.
    pub async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(conn) = conn.lock().take() {
                conn.close().map_err(|(_, e)| ArchiveError::Sqlite(e))?;
                debug!(path = %path.display(), "closed project store");
            }
            Ok(())
        })
        .await?
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Seconds since the epoch, for `created_at` columns.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the store and command tests.

    use super::*;
    use crate::state::{ItemId, PhotoId, TagId};

    /// A freshly created project in a temp dir.
    pub async fn scratch(dir: &tempfile::TempDir) -> Store {
        Store::create(dir.path().join("test.tpy"), "Test Project")
            .await
            .unwrap()
    }

    /// Insert an item owning one photo per path, returning ids.
    pub async fn seed_item(store: &Store, paths: &[&str]) -> (ItemId, Vec<PhotoId>) {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        store
            .transaction(move |conn| {
                let id = item::create(conn, "generic")?;
                let mut photos = Vec::new();
                for path in &paths {
                    photos.push(photo::create(conn, id, path)?.id);
                }
                Ok((id, photos))
            })
            .await
            .unwrap()
    }

    /// Create a tag by name.
    pub async fn seed_tag(store: &Store, name: &str) -> TagId {
        let name = name.to_string();
        store
            .seq(move |conn| Ok(tag::create(conn, &name)?.id))
            .await
            .unwrap()
    }

    /// Every `(photo, owner)` pair in the file, ordered by photo id.
    pub async fn ownership(store: &Store) -> Vec<(PhotoId, ItemId)> {
        store
            .seq(|conn| {
                let mut stmt = conn.prepare("SELECT id, item_id FROM photo ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;

        let result: Result<()> = store
            .transaction(|conn| {
                item::create(conn, "generic")?;
                Err(ArchiveError::Invariant("boom".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = store
            .seq(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM item", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        store.close().await.unwrap();

        assert!(store.is_closed());
        let result = store.seq(|_| Ok(())).await;
        assert!(matches!(result, Err(ArchiveError::StoreClosed)));

        // Closing twice is fine
        store.close().await.unwrap();
    }
}
