//! The project row, and loading a whole project into a [`State`].

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use super::{item, metadata, now, photo, tag};
use crate::error::{ArchiveError, Result};
use crate::state::{ProjectInfo, State};

/// Insert the project row of a new file, returning its id.
pub fn create(conn: &Connection, name: &str) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO project (project_id, name, created_at) VALUES (?1, ?2, ?3)",
        params![id, name, now()],
    )?;
    Ok(id)
}

/// Read `(project_id, name)`.
pub fn load(conn: &Connection) -> Result<(String, String)> {
    conn.query_row("SELECT project_id, name FROM project LIMIT 1", [], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
    .optional()?
    .ok_or_else(|| ArchiveError::Invariant("file has no project row".to_string()))
}

/// Persist a new project name.
pub fn rename(conn: &Connection, id: &str, name: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE project SET name = ?1 WHERE project_id = ?2",
        params![name, id],
    )?;
    if changed == 0 {
        return Err(ArchiveError::Invariant(format!("project {} not found", id)));
    }
    Ok(())
}

/// Load everything the projection needs.
pub fn load_state(conn: &Connection, file: &Path) -> Result<State> {
    let (id, name) = load(conn)?;
    let mut state = State::default();

    for item in item::load_all(conn)? {
        state.items.insert(item.id, item);
    }
    for photo in photo::load_all(conn)? {
        state.photos.insert(photo.id, photo);
    }
    for tag in tag::load_all(conn)? {
        state.tags.insert(tag.id, tag);
    }
    state.metadata = metadata::load_all(conn)?;

    let live = state.items.values().filter(|item| !item.deleted).count();
    state.project = ProjectInfo {
        id,
        name,
        file: file.to_path_buf(),
        items: live as i64,
    };

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::*;

    #[tokio::test]
    async fn test_load_state_counts_live_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/a.jpg"]).await;
        seed_item(&store, &["/b.jpg"]).await;
        store
            .transaction(move |conn| item::delete(conn, &[a]))
            .await
            .unwrap();

        let file = store.path().to_path_buf();
        let state = store
            .seq(move |conn| load_state(conn, &file))
            .await
            .unwrap();

        assert_eq!(state.project.name, "Test Project");
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.project.items, 1);
        assert!(state.check_ownership().is_ok());
    }
}
