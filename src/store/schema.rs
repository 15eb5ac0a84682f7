use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Initialize the project schema.
/// Creates all necessary tables and indexes if they don't exist.
///
/// Items and photos share the `subject` id space so that metadata
/// can be keyed by owner id alone.
pub fn init_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    // Project identity (exactly one row per file)
    tx.execute(
        "CREATE TABLE IF NOT EXISTS project (
            project_id      TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        )",
        [],
    )?;

    // Shared id space for items and photos
    tx.execute(
        "CREATE TABLE IF NOT EXISTS subject (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at      INTEGER NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS item (
            id              INTEGER PRIMARY KEY REFERENCES subject(id) ON DELETE CASCADE,
            template        TEXT NOT NULL,
            deleted         INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // A photo belongs to exactly one item; position orders it within that item
    tx.execute(
        "CREATE TABLE IF NOT EXISTS photo (
            id              INTEGER PRIMARY KEY REFERENCES subject(id) ON DELETE CASCADE,
            item_id         INTEGER NOT NULL REFERENCES item(id),
            path            TEXT NOT NULL,
            position        INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS tag (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS item_tag (
            item_id         INTEGER NOT NULL REFERENCES item(id) ON DELETE CASCADE,
            tag_id          INTEGER NOT NULL REFERENCES tag(id) ON DELETE CASCADE,
            PRIMARY KEY (item_id, tag_id)
        )",
        [],
    )?;

    // Metadata is keyed by owner id and has no foreign key:
    // owners delete their own records
    tx.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
            owner_id        INTEGER NOT NULL,
            property        TEXT NOT NULL,
            datatype        TEXT NOT NULL,
            text            TEXT NOT NULL,
            PRIMARY KEY (owner_id, property)
        )",
        [],
    )?;

    // Create indexes for fast queries
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_photo_item
         ON photo(item_id, position)",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_photo_path
         ON photo(path)",
        [],
    )?;

    tx.commit()?;
    debug!("project schema initialized");

    Ok(())
}
