//! In-memory projection of the open project
//!
//! The projection is only ever changed by applying a [`Transition`],
//! and transitions are only emitted after the store committed the
//! corresponding rows (or, for persisted project fields, as an
//! optimistic update that is reverted with its literal inverse).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::data::{Item, ItemId, Metadata, Photo, PhotoId, ProjectInfo, SubjectId, Tag, TagId};

/// Snapshot of everything the commands can `select`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub project: ProjectInfo,
    pub items: BTreeMap<ItemId, Item>,
    pub photos: BTreeMap<PhotoId, Photo>,
    pub metadata: BTreeMap<SubjectId, Metadata>,
    pub tags: BTreeMap<TagId, Tag>,
    /// Currently selected items
    pub selection: Vec<ItemId>,
}

/// A described state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transition {
    /// Insert (or replace) whole items
    ItemsInsert(Vec<Item>),
    /// Drop items from the projection
    ItemsRemove(Vec<ItemId>),
    /// Bulk update of the soft-delete flag
    ItemsDeleted { ids: Vec<ItemId>, deleted: bool },
    /// Replace an item's photo order
    ItemPhotos { id: ItemId, photos: Vec<PhotoId> },
    /// Set item templates: `(item, template)`
    ItemsTemplate(Vec<(ItemId, String)>),
    ItemTagsInsert { id: ItemId, tags: Vec<TagId> },
    ItemTagsRemove { id: ItemId, tags: Vec<TagId> },
    /// Reassign photos: `(photo, new owner)`, appended in this order
    PhotosMove(Vec<(PhotoId, ItemId)>),
    PhotosInsert(Vec<Photo>),
    PhotosRemove(Vec<PhotoId>),
    /// Merge properties into an owner's metadata
    MetadataInsert { id: SubjectId, data: Metadata },
    /// Replace an owner's metadata wholesale
    MetadataReplace { id: SubjectId, data: Metadata },
    MetadataRemove(Vec<SubjectId>),
    /// Replace the item selection
    Select(Vec<ItemId>),
    /// Update project fields (persisted by the project coordinator)
    ProjectUpdate { name: String },
    /// Change the live item counter
    ItemCount(i64),
}

impl Transition {
    /// Item ids this transition touches (used for search refreshes).
    pub fn item_ids(&self) -> Vec<ItemId> {
        match self {
            Transition::ItemsInsert(items) => items.iter().map(|i| i.id).collect(),
            Transition::ItemsRemove(ids) | Transition::Select(ids) => ids.clone(),
            Transition::ItemsDeleted { ids, .. } => ids.clone(),
            Transition::ItemsTemplate(changes) => changes.iter().map(|(id, _)| *id).collect(),
            Transition::ItemPhotos { id, .. }
            | Transition::ItemTagsInsert { id, .. }
            | Transition::ItemTagsRemove { id, .. } => vec![*id],
            Transition::PhotosMove(moves) => {
                let ids: BTreeSet<ItemId> = moves.iter().map(|(_, item)| *item).collect();
                ids.into_iter().collect()
            }
            Transition::MetadataInsert { id, .. } | Transition::MetadataReplace { id, .. } => {
                vec![*id]
            }
            Transition::MetadataRemove(ids) => ids.clone(),
            Transition::PhotosInsert(_)
            | Transition::PhotosRemove(_)
            | Transition::ProjectUpdate { .. }
            | Transition::ItemCount(_) => Vec::new(),
        }
    }
}

impl State {
    /// Apply one transition in place.
    pub fn apply(&mut self, transition: &Transition) {
        match transition {
            Transition::ItemsInsert(items) => {
                for item in items {
                    self.items.insert(item.id, item.clone());
                }
            }
            Transition::ItemsRemove(ids) => {
                for id in ids {
                    self.items.remove(id);
                }
                self.selection.retain(|id| !ids.contains(id));
            }
            Transition::ItemsDeleted { ids, deleted } => {
                for id in ids {
                    if let Some(item) = self.items.get_mut(id) {
                        item.deleted = *deleted;
                    }
                }
            }
            Transition::ItemsTemplate(changes) => {
                for (id, template) in changes {
                    if let Some(item) = self.items.get_mut(id) {
                        item.template = template.clone();
                    }
                }
            }
            Transition::ItemPhotos { id, photos } => {
                if let Some(item) = self.items.get_mut(id) {
                    item.photos = photos.clone();
                }
            }
            Transition::ItemTagsInsert { id, tags } => {
                if let Some(item) = self.items.get_mut(id) {
                    item.tags.extend(tags.iter().copied());
                }
            }
            Transition::ItemTagsRemove { id, tags } => {
                if let Some(item) = self.items.get_mut(id) {
                    for tag in tags {
                        item.tags.remove(tag);
                    }
                }
            }
            Transition::PhotosMove(moves) => {
                for (photo_id, to) in moves {
                    self.move_photo(*photo_id, *to);
                }
            }
            Transition::PhotosInsert(photos) => {
                for photo in photos {
                    if let Some(item) = self.items.get_mut(&photo.item) {
                        if !item.photos.contains(&photo.id) {
                            item.photos.push(photo.id);
                        }
                    }
                    self.photos.insert(photo.id, photo.clone());
                }
            }
            Transition::PhotosRemove(ids) => {
                for id in ids {
                    if let Some(photo) = self.photos.remove(id) {
                        if let Some(item) = self.items.get_mut(&photo.item) {
                            item.photos.retain(|p| p != id);
                        }
                    }
                }
            }
            Transition::MetadataInsert { id, data } => {
                let record = self.metadata.entry(*id).or_default();
                for (property, value) in data {
                    record.insert(property.clone(), value.clone());
                }
            }
            Transition::MetadataReplace { id, data } => {
                self.metadata.insert(*id, data.clone());
            }
            Transition::MetadataRemove(ids) => {
                for id in ids {
                    self.metadata.remove(id);
                }
            }
            Transition::Select(ids) => {
                self.selection = ids.clone();
            }
            Transition::ProjectUpdate { name } => {
                self.project.name = name.clone();
            }
            Transition::ItemCount(delta) => {
                self.project.items += delta;
            }
        }
    }

    fn move_photo(&mut self, photo_id: PhotoId, to: ItemId) {
        let Some(photo) = self.photos.get_mut(&photo_id) else {
            return;
        };
        let from = photo.item;
        photo.item = to;

        if let Some(item) = self.items.get_mut(&from) {
            item.photos.retain(|p| *p != photo_id);
        }
        if let Some(item) = self.items.get_mut(&to) {
            if !item.photos.contains(&photo_id) {
                item.photos.push(photo_id);
            }
        }
    }

    /// Resolve tag names to ids, ignoring unknown names.
    pub fn find_tag_ids(&self, names: &[String]) -> Vec<TagId> {
        names
            .iter()
            .filter_map(|name| {
                self.tags
                    .values()
                    .find(|tag| tag.name == *name)
                    .map(|tag| tag.id)
            })
            .collect()
    }

    /// Checks that every photo is listed by exactly one item, and that
    /// this item is the photo's back-reference.
    pub fn check_ownership(&self) -> Result<(), String> {
        let mut seen: BTreeMap<PhotoId, ItemId> = BTreeMap::new();

        for item in self.items.values() {
            for photo in &item.photos {
                if let Some(other) = seen.insert(*photo, item.id) {
                    return Err(format!(
                        "photo {} owned by items {} and {}",
                        photo, other, item.id
                    ));
                }
            }
        }

        for photo in self.photos.values() {
            match seen.get(&photo.id) {
                Some(owner) if *owner == photo.item => {}
                Some(owner) => {
                    return Err(format!(
                        "photo {} points at item {} but is listed by {}",
                        photo.id, photo.item, owner
                    ))
                }
                None => return Err(format!("photo {} is orphaned", photo.id)),
            }
        }

        Ok(())
    }
}
