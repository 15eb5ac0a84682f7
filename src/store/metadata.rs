//! Metadata rows, keyed by owner id + property.

use rusqlite::{params, Connection};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::state::{Metadata, SubjectId, Value};

/// Load one owner's metadata (empty if it has none).
pub fn load(conn: &Connection, id: SubjectId) -> Result<Metadata> {
    let mut stmt = conn.prepare_cached(
        "SELECT property, datatype, text FROM metadata WHERE owner_id = ?1",
    )?;
    let data = stmt
        .query_map([id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Value {
                    datatype: row.get(1)?,
                    text: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Metadata>>()?;
    Ok(data)
}

/// Load the metadata of every owner in the file.
pub fn load_all(conn: &Connection) -> Result<BTreeMap<SubjectId, Metadata>> {
    let mut stmt = conn.prepare("SELECT owner_id, property, datatype, text FROM metadata")?;
    let mut rows = stmt.query([])?;
    let mut all: BTreeMap<SubjectId, Metadata> = BTreeMap::new();

    while let Some(row) = rows.next()? {
        let owner: SubjectId = row.get(0)?;
        all.entry(owner).or_default().insert(
            row.get(1)?,
            Value {
                datatype: row.get(2)?,
                text: row.get(3)?,
            },
        );
    }

    Ok(all)
}

/// Insert or overwrite the given properties, leaving others alone.
pub fn insert(conn: &Connection, id: SubjectId, data: &Metadata) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO metadata (owner_id, property, datatype, text) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (owner_id, property)
         DO UPDATE SET datatype = excluded.datatype, text = excluded.text",
    )?;
    for (property, value) in data {
        stmt.execute(params![id, property, value.datatype, value.text])?;
    }
    Ok(())
}

/// Replace an owner's metadata wholesale.
pub fn replace(conn: &Connection, id: SubjectId, data: &Metadata) -> Result<()> {
    delete(conn, &[id])?;
    insert(conn, id, data)
}

/// Copy all of `from`'s properties onto `to`.
pub fn copy(conn: &Connection, from: SubjectId, to: SubjectId) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (owner_id, property, datatype, text)
         SELECT ?2, property, datatype, text FROM metadata WHERE owner_id = ?1",
        params![from, to],
    )?;
    Ok(())
}

/// Delete the metadata of the given owners.
pub fn delete(conn: &Connection, ids: &[SubjectId]) -> Result<()> {
    let mut stmt = conn.prepare_cached("DELETE FROM metadata WHERE owner_id = ?1")?;
    for id in ids {
        stmt.execute([id])?;
    }
    Ok(())
}
