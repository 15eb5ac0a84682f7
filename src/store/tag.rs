//! Tag rows and item taggings.

use rusqlite::{params, Connection};
use std::collections::BTreeSet;

use super::item;
use crate::error::Result;
use crate::state::{ItemId, Tag, TagId};

/// Create a named tag.
pub fn create(conn: &Connection, name: &str) -> Result<Tag> {
    conn.execute("INSERT INTO tag (name) VALUES (?1)", [name])?;
    Ok(Tag {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
    })
}

/// Get all tags
pub fn load_all(conn: &Connection) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare("SELECT id, name FROM tag ORDER BY id")?;
    let tags = stmt
        .query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

/// Tags attached to one item.
pub fn of_item(conn: &Connection, id: ItemId) -> Result<BTreeSet<TagId>> {
    let mut stmt = conn.prepare_cached("SELECT tag_id FROM item_tag WHERE item_id = ?1")?;
    let tags = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(tags)
}

/// Attach tags; pairs that already exist are ignored.
pub fn set(conn: &Connection, pairs: &[(ItemId, TagId)]) -> Result<()> {
    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO item_tag (item_id, tag_id) VALUES (?1, ?2)")?;
    for (id, tag) in pairs {
        item::ensure_exists(conn, *id)?;
        stmt.execute(params![id, tag])?;
    }
    Ok(())
}

/// Detach `tags` from every item in `ids`.
pub fn remove(conn: &Connection, ids: &[ItemId], tags: &[TagId]) -> Result<()> {
    let mut stmt = conn.prepare_cached("DELETE FROM item_tag WHERE item_id = ?1 AND tag_id = ?2")?;
    for id in ids {
        item::ensure_exists(conn, *id)?;
        for tag in tags {
            stmt.execute(params![id, tag])?;
        }
    }
    Ok(())
}

/// Detach every tag from an item.
pub fn clear(conn: &Connection, id: ItemId) -> Result<()> {
    item::ensure_exists(conn, id)?;
    conn.execute("DELETE FROM item_tag WHERE item_id = ?1", [id])?;
    Ok(())
}
