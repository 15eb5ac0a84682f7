//! Item rows and the restructuring algorithms.
//!
//! Every function here expects to run inside [`Store::transaction`]
//! when it touches more than one row: merge, split, explode, reattach
//! and implode check their preconditions against the file (not against
//! the projection) and fail with an invariant error before anything is
//! committed if the rows they target are gone or owned by someone else.
//!
//! [`Store::transaction`]: super::Store::transaction

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};

use super::{metadata, now, photo, tag};
use crate::error::{ArchiveError, Result};
use crate::state::{Item, ItemId, Metadata, PhotoId, TagId};

/// What a merge took from the absorbed items.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    /// Photos appended to the primary item, in order
    pub photos: Vec<PhotoId>,
    /// Tags the primary item gained
    pub tags: Vec<TagId>,
    /// Snapshots of the absorbed items as they were before the merge
    pub items: Vec<Item>,
    /// Metadata of the absorbed items, by item id
    pub data: BTreeMap<ItemId, Metadata>,
    /// Metadata of the primary item before the merge
    pub primary_data: Metadata,
}

/// Rows removed by a destroy or prune.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Destroyed {
    pub items: Vec<ItemId>,
    pub photos: Vec<PhotoId>,
}

/// Create a new live item.
pub fn create(conn: &Connection, template: &str) -> Result<ItemId> {
    conn.execute("INSERT INTO subject (created_at) VALUES (?1)", params![now()])?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO item (id, template) VALUES (?1, ?2)",
        params![id, template],
    )?;
    Ok(id)
}

/// Re-create an item under a known id (used when splitting a merge back up).
fn insert_with_id(conn: &Connection, id: ItemId, template: &str) -> Result<()> {
    if exists(conn, id)? {
        return Err(ArchiveError::Invariant(format!("item {} already exists", id)));
    }
    conn.execute(
        "INSERT INTO subject (id, created_at) VALUES (?1, ?2)",
        params![id, now()],
    )?;
    conn.execute(
        "INSERT INTO item (id, template) VALUES (?1, ?2)",
        params![id, template],
    )?;
    Ok(())
}

pub fn exists(conn: &Connection, id: ItemId) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM item WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Fail with `NotFound` unless the item row exists.
pub fn ensure_exists(conn: &Connection, id: ItemId) -> Result<()> {
    if exists(conn, id)? {
        Ok(())
    } else {
        Err(ArchiveError::item_not_found(id))
    }
}

/// Load one item with its photos and tags.
pub fn load_one(conn: &Connection, id: ItemId) -> Result<Item> {
    let row = conn
        .query_row(
            "SELECT template, deleted FROM item WHERE id = ?1",
            [id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
        )
        .optional()?;

    let Some((template, deleted)) = row else {
        return Err(ArchiveError::item_not_found(id));
    };

    Ok(Item {
        id,
        template,
        photos: photo::owned_by(conn, id)?,
        tags: tag::of_item(conn, id)?,
        deleted,
    })
}

/// Load the given items, skipping ids that no longer exist.
pub fn load(conn: &Connection, ids: &[ItemId]) -> Result<Vec<Item>> {
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        match load_one(conn, *id) {
            Ok(item) => items.push(item),
            Err(ArchiveError::NotFound { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(items)
}

/// Load every item, including soft-deleted ones.
pub fn load_all(conn: &Connection) -> Result<Vec<Item>> {
    let ids: Vec<ItemId> = {
        let mut stmt = conn.prepare("SELECT id FROM item ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };
    load(conn, &ids)
}

/// Soft-delete items (move them to the trash).
pub fn delete(conn: &Connection, ids: &[ItemId]) -> Result<()> {
    set_deleted(conn, ids, true)
}

/// Take items out of the trash.
pub fn restore(conn: &Connection, ids: &[ItemId]) -> Result<()> {
    set_deleted(conn, ids, false)
}

fn set_deleted(conn: &Connection, ids: &[ItemId], deleted: bool) -> Result<()> {
    let mut stmt = conn.prepare_cached("UPDATE item SET deleted = ?1 WHERE id = ?2")?;
    for id in ids {
        if stmt.execute(params![deleted, id])? == 0 {
            return Err(ArchiveError::item_not_found(*id));
        }
    }
    Ok(())
}

/// Change an item's template, returning the one it had before.
pub fn set_template(conn: &Connection, id: ItemId, template: &str) -> Result<String> {
    let previous: Option<String> = conn
        .query_row("SELECT template FROM item WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    let Some(previous) = previous else {
        return Err(ArchiveError::item_not_found(id));
    };

    conn.execute(
        "UPDATE item SET template = ?1 WHERE id = ?2",
        params![template, id],
    )?;
    Ok(previous)
}

/// Permanently remove items together with their photos, tags and metadata.
pub fn destroy(conn: &Connection, ids: &[ItemId]) -> Result<Destroyed> {
    let mut destroyed = Destroyed::default();

    for id in ids {
        ensure_exists(conn, *id)?;
        let photos = photo::owned_by(conn, *id)?;
        photo::destroy(conn, &photos)?;
        metadata::delete(conn, &[*id])?;
        conn.execute("DELETE FROM subject WHERE id = ?1", [id])?;

        destroyed.items.push(*id);
        destroyed.photos.extend(photos);
    }

    Ok(destroyed)
}

/// Permanently remove every item in the trash.
pub fn prune(conn: &Connection) -> Result<Destroyed> {
    let ids: Vec<ItemId> = {
        let mut stmt = conn.prepare("SELECT id FROM item WHERE deleted = 1 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };
    destroy(conn, &ids)
}

/// Create a copy of an item: same template, metadata and tags, no photos.
pub fn dup(conn: &Connection, id: ItemId) -> Result<Item> {
    let source = load_one(conn, id)?;
    let copy = create(conn, &source.template)?;

    metadata::copy(conn, id, copy)?;
    let pairs: Vec<(ItemId, TagId)> = source.tags.iter().map(|tag| (copy, *tag)).collect();
    tag::set(conn, &pairs)?;

    load_one(conn, copy)
}

/// Merge `absorbed` into `primary`.
///
/// The absorbed items' photos are appended to the primary item in order,
/// their tags are added to it, and the absorbed rows are removed along
/// with their metadata. Everything needed to split them back out is
/// returned.
pub fn merge(conn: &Connection, primary: ItemId, absorbed: &[ItemId]) -> Result<Merged> {
    if absorbed.is_empty() {
        return Err(ArchiveError::Invariant("merge needs at least two items".into()));
    }
    if absorbed.contains(&primary) {
        return Err(ArchiveError::Invariant(format!(
            "item {} cannot be merged into itself",
            primary
        )));
    }

    let mut seen = BTreeSet::new();
    if let Some(id) = absorbed.iter().find(|id| !seen.insert(**id)) {
        return Err(ArchiveError::Invariant(format!(
            "item {} is merged more than once",
            id
        )));
    }

    let target = load_one(conn, primary)?;
    let primary_data = metadata::load(conn, primary)?;

    let mut items = Vec::with_capacity(absorbed.len());
    let mut data = BTreeMap::new();
    let mut photos = Vec::new();
    let mut gained = BTreeSet::new();

    for id in absorbed {
        let item = load_one(conn, *id)?;
        data.insert(*id, metadata::load(conn, *id)?);
        photos.extend(item.photos.iter().copied());
        gained.extend(item.tags.difference(&target.tags).copied());
        items.push(item);
    }

    photo::move_to(conn, &photos, primary)?;

    let tags: Vec<TagId> = gained.into_iter().collect();
    let pairs: Vec<(ItemId, TagId)> = tags.iter().map(|tag| (primary, *tag)).collect();
    tag::set(conn, &pairs)?;

    metadata::delete(conn, absorbed)?;
    let mut stmt = conn.prepare_cached("DELETE FROM subject WHERE id = ?1")?;
    for id in absorbed {
        stmt.execute([id])?;
    }

    Ok(Merged {
        photos,
        tags,
        items,
        data,
        primary_data,
    })
}

/// Inverse of [`merge`]: re-create `items` (with their original ids) and
/// hand each its photos, tags and metadata back from `primary`.
///
/// `tags` are the tags the primary gained in the merge, `primary_data`
/// its metadata and `order` its photo order before the merge.
pub fn split(
    conn: &Connection,
    primary: ItemId,
    items: &[Item],
    data: &BTreeMap<ItemId, Metadata>,
    primary_data: &Metadata,
    tags: &[TagId],
    order: &[PhotoId],
) -> Result<Vec<Item>> {
    ensure_exists(conn, primary)?;

    for spec in items {
        insert_with_id(conn, spec.id, &spec.template)?;

        for photo_id in &spec.photos {
            let owner = photo::owner(conn, *photo_id)?;
            if owner != primary {
                return Err(ArchiveError::Invariant(format!(
                    "photo {} belongs to item {}, not {}",
                    photo_id, owner, primary
                )));
            }
        }
        photo::move_to(conn, &spec.photos, spec.id)?;

        let pairs: Vec<(ItemId, TagId)> = spec.tags.iter().map(|tag| (spec.id, *tag)).collect();
        tag::set(conn, &pairs)?;

        if let Some(record) = data.get(&spec.id) {
            metadata::replace(conn, spec.id, record)?;
        }
        if spec.deleted {
            delete(conn, &[spec.id])?;
        }
    }

    tag::remove(conn, &[primary], tags)?;
    metadata::replace(conn, primary, primary_data)?;
    photo::order(conn, primary, order)?;

    let mut ids = vec![primary];
    ids.extend(items.iter().map(|item| item.id));
    load(conn, &ids)
}

/// Give each photo in `photos` its own copy of `id`.
///
/// Photos are processed in input order; the n-th returned item owns the
/// n-th photo.
pub fn explode(conn: &Connection, id: ItemId, photos: &[PhotoId]) -> Result<Vec<Item>> {
    ensure_exists(conn, id)?;
    let mut items = Vec::with_capacity(photos.len());

    for photo_id in photos {
        let owner = photo::owner(conn, *photo_id)?;
        if owner != id {
            return Err(ArchiveError::Invariant(format!(
                "photo {} belongs to item {}, not {}",
                photo_id, owner, id
            )));
        }

        let copy = dup(conn, id)?;
        photo::move_to(conn, &[*photo_id], copy.id)?;
        items.push(load_one(conn, copy.id)?);
    }

    Ok(items)
}

/// Redo path of explode: restore previously exploded `items` and move
/// `photos` onto them positionally, without allocating new ids.
pub fn reattach(
    conn: &Connection,
    id: ItemId,
    photos: &[PhotoId],
    items: &[ItemId],
) -> Result<Vec<Item>> {
    if photos.len() != items.len() {
        return Err(ArchiveError::Invariant(format!(
            "cannot reattach {} photos to {} items",
            photos.len(),
            items.len()
        )));
    }
    ensure_exists(conn, id)?;
    restore(conn, items)?;

    for (photo_id, item) in photos.iter().zip(items) {
        let owner = photo::owner(conn, *photo_id)?;
        if owner != id {
            return Err(ArchiveError::Invariant(format!(
                "photo {} belongs to item {}, not {}",
                photo_id, owner, id
            )));
        }
        photo::move_to(conn, &[*photo_id], *item)?;
    }

    load(conn, items)
}

/// Inverse of [`explode`]: move every photo of `items` back onto `id`,
/// then soft-delete `items`. `order` is `id`'s photo order to restore.
///
/// Returns `id`'s resulting photo list.
pub fn implode(
    conn: &Connection,
    id: ItemId,
    order: &[PhotoId],
    items: &[ItemId],
) -> Result<Vec<PhotoId>> {
    ensure_exists(conn, id)?;

    for item in items {
        ensure_exists(conn, *item)?;
        let photos = photo::owned_by(conn, *item)?;
        photo::move_to(conn, &photos, id)?;
    }

    delete(conn, items)?;
    photo::order(conn, id, order)
}
