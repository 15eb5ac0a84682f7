//! Photo rows.

use rusqlite::{params, Connection, OptionalExtension};

use super::now;
use crate::error::{ArchiveError, Result};
use crate::state::{ItemId, Photo, PhotoId};

/// Insert a new photo at the end of `item`'s photo list.
pub fn create(conn: &Connection, item: ItemId, path: &str) -> Result<Photo> {
    conn.execute("INSERT INTO subject (created_at) VALUES (?1)", params![now()])?;
    let id = conn.last_insert_rowid();
    let position = next_position(conn, item)?;

    conn.execute(
        "INSERT INTO photo (id, item_id, path, position) VALUES (?1, ?2, ?3, ?4)",
        params![id, item, path, position],
    )?;

    Ok(Photo {
        id,
        item,
        path: path.to_string(),
    })
}

/// Get all photos in the file
pub fn load_all(conn: &Connection) -> Result<Vec<Photo>> {
    let mut stmt = conn.prepare("SELECT id, item_id, path FROM photo ORDER BY id")?;
    let photos = stmt
        .query_map([], |row| {
            Ok(Photo {
                id: row.get(0)?,
                item: row.get(1)?,
                path: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(photos)
}

/// Photo ids owned by `item`, in display order.
pub fn owned_by(conn: &Connection, item: ItemId) -> Result<Vec<PhotoId>> {
    let mut stmt =
        conn.prepare_cached("SELECT id FROM photo WHERE item_id = ?1 ORDER BY position, id")?;
    let ids = stmt
        .query_map([item], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Current owner of a photo.
pub fn owner(conn: &Connection, id: PhotoId) -> Result<ItemId> {
    conn.query_row("SELECT item_id FROM photo WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or(ArchiveError::NotFound { entity: "photo", id })
}

/// Whether a photo with this path is already in the project.
pub fn path_exists(conn: &Connection, path: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM photo WHERE path = ?1 LIMIT 1", [path], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Reassign photos to `item`, appending them in the given order.
pub fn move_to(conn: &Connection, ids: &[PhotoId], item: ItemId) -> Result<()> {
    let mut position = next_position(conn, item)?;
    let mut stmt =
        conn.prepare_cached("UPDATE photo SET item_id = ?1, position = ?2 WHERE id = ?3")?;

    for id in ids {
        if stmt.execute(params![item, position, id])? == 0 {
            return Err(ArchiveError::NotFound { entity: "photo", id: *id });
        }
        position += 1;
    }

    Ok(())
}

/// Renumber `item`'s photos: the ids in `order` first (in that order),
/// then any other photos it owns, keeping their relative order.
pub fn order(conn: &Connection, item: ItemId, order: &[PhotoId]) -> Result<Vec<PhotoId>> {
    let current = owned_by(conn, item)?;
    let mut photos: Vec<PhotoId> = order
        .iter()
        .copied()
        .filter(|id| current.contains(id))
        .collect();
    photos.extend(current.iter().copied().filter(|id| !order.contains(id)));

    let mut stmt = conn.prepare_cached("UPDATE photo SET position = ?1 WHERE id = ?2")?;
    for (position, id) in photos.iter().enumerate() {
        stmt.execute(params![position as i64, id])?;
    }

    Ok(photos)
}

/// Delete photos (and their metadata).
pub fn destroy(conn: &Connection, ids: &[PhotoId]) -> Result<()> {
    super::metadata::delete(conn, ids)?;
    let mut stmt = conn.prepare_cached("DELETE FROM subject WHERE id = ?1")?;
    for id in ids {
        stmt.execute([id])?;
    }
    Ok(())
}

fn next_position(conn: &Connection, item: ItemId) -> Result<i64> {
    let position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM photo WHERE item_id = ?1",
        [item],
        |row| row.get(0),
    )?;
    Ok(position)
}
