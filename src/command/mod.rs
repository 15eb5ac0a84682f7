//! Command engine
//!
//! User input arrives as an [`Action`] (`kind`, `payload`, `meta`).
//! The [`Registry`] maps the kind to a [`Command`], the [`Interpreter`]
//! runs it as its own task against an [`Effects`] handle, and
//! reversible results land on the [`History`] stack.
//!
//! A command never mutates anything behind the interpreter's back: it
//! returns a [`Completion`] that carries its value, its inverse action
//! and the item counter delta, and the interpreter does the bookkeeping.

pub mod effect;
pub mod history;
pub mod interpreter;
pub mod registry;

pub use effect::Effects;
pub use history::{Entry, History, HistoryFilter};
pub use interpreter::Interpreter;
pub use registry::{Factory, Registry, RegistryBuilder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{ArchiveError, Result};
use crate::state::{Item, ItemId, Metadata, PhotoId, TagId};

/// Identifies which command an action triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "item.delete")]
    Delete,
    #[serde(rename = "item.destroy")]
    Destroy,
    #[serde(rename = "item.load")]
    Load,
    #[serde(rename = "item.restore")]
    Restore,
    #[serde(rename = "item.merge")]
    Merge,
    #[serde(rename = "item.split")]
    Split,
    #[serde(rename = "item.explode")]
    Explode,
    #[serde(rename = "item.implode")]
    Implode,
    #[serde(rename = "item.template.change")]
    TemplateChange,
    #[serde(rename = "item.export")]
    Export,
    #[serde(rename = "item.import")]
    Import,
    #[serde(rename = "item.tag.create")]
    AddTags,
    #[serde(rename = "item.tag.delete")]
    RemoveTags,
    #[serde(rename = "item.tag.toggle")]
    ToggleTags,
    #[serde(rename = "item.tag.clear")]
    ClearTags,
    /// Persisted project update; handled by the project coordinator
    #[serde(rename = "project.persist")]
    ProjectSave,
}

impl ActionKind {
    /// Every kind that maps to a command.
    pub const COMMANDS: [ActionKind; 15] = [
        ActionKind::Delete,
        ActionKind::Destroy,
        ActionKind::Load,
        ActionKind::Restore,
        ActionKind::Merge,
        ActionKind::Split,
        ActionKind::Explode,
        ActionKind::Implode,
        ActionKind::TemplateChange,
        ActionKind::Export,
        ActionKind::Import,
        ActionKind::AddTags,
        ActionKind::RemoveTags,
        ActionKind::ToggleTags,
        ActionKind::ClearTags,
    ];

    /// Kinds whose `persist` actions the project coordinator writes.
    pub fn is_project_update(self) -> bool {
        matches!(self, ActionKind::ProjectSave)
    }
}

/// Option flags carried alongside an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionMeta {
    /// Forward to the project coordinator for serialization to storage
    pub persist: bool,
    /// Refresh the search index for the touched items
    pub search: bool,
    /// Tag payloads name tags instead of giving ids
    pub resolve: bool,
    /// Export target: `:clipboard:`, `:plugin:` or a file path
    pub target: Option<String>,
    /// Export plugin id (implies target `:plugin:`)
    pub plugin: Option<String>,
}

/// A tag given either by id or (with `meta.resolve`) by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagRef {
    Id(TagId),
    Name(String),
}

/// The same tags applied to several items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsPayload {
    pub items: Vec<ItemId>,
    pub tags: Vec<TagRef>,
}

/// Tags changed on one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTags {
    pub id: ItemId,
    pub tags: Vec<TagId>,
}

/// Everything needed to undo a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPayload {
    /// The primary item as it was before the merge
    pub item: Item,
    /// The absorbed items as they were before the merge
    pub items: Vec<Item>,
    /// Metadata of the absorbed items
    pub data: BTreeMap<ItemId, Metadata>,
    /// Metadata of the primary item before the merge
    pub primary_data: Metadata,
    /// Tags the primary item gained in the merge
    pub tags: Vec<TagId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplodePayload {
    pub id: ItemId,
    /// Photos to split off (default: all but the first)
    pub photos: Option<Vec<PhotoId>>,
    /// Items to restore and reattach to, positionally (redo path)
    pub items: Option<Vec<ItemId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplodePayload {
    /// The exploded item as it was before the explode
    pub item: Item,
    /// The items to absorb back
    pub items: Vec<ItemId>,
}

/// The template one item should have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub id: ItemId,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPatch {
    pub name: String,
}

/// Command-specific input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    None,
    Ids(Vec<ItemId>),
    Item(ItemId),
    Tags(TagsPayload),
    TagWork(Vec<ItemTags>),
    Split(SplitPayload),
    Explode(ExplodePayload),
    Implode(ImplodePayload),
    Files(Vec<PathBuf>),
    Templates(Vec<ItemTemplate>),
    Project(ProjectPatch),
}

/// A dispatched user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub payload: Payload,
    #[serde(default)]
    pub meta: ActionMeta,
}

impl Action {
    pub fn new(kind: ActionKind, payload: Payload) -> Self {
        Self {
            kind,
            payload,
            meta: ActionMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: ActionMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn delete(ids: Vec<ItemId>) -> Self {
        Self::new(ActionKind::Delete, Payload::Ids(ids))
    }

    pub fn restore(ids: Vec<ItemId>) -> Self {
        Self::new(ActionKind::Restore, Payload::Ids(ids))
    }

    /// Permanently remove `ids`, or prune the trash if empty.
    pub fn destroy(ids: Vec<ItemId>) -> Self {
        Self::new(ActionKind::Destroy, Payload::Ids(ids))
    }

    pub fn load(ids: Vec<ItemId>) -> Self {
        Self::new(ActionKind::Load, Payload::Ids(ids))
    }

    /// Merge `ids[1..]` into `ids[0]`.
    pub fn merge(ids: Vec<ItemId>) -> Self {
        Self::new(ActionKind::Merge, Payload::Ids(ids))
    }

    pub fn split(payload: SplitPayload) -> Self {
        Self::new(ActionKind::Split, Payload::Split(payload))
    }

    pub fn explode(id: ItemId, photos: Option<Vec<PhotoId>>) -> Self {
        Self::new(
            ActionKind::Explode,
            Payload::Explode(ExplodePayload {
                id,
                photos,
                items: None,
            }),
        )
    }

    pub fn implode(item: Item, items: Vec<ItemId>) -> Self {
        Self::new(ActionKind::Implode, Payload::Implode(ImplodePayload { item, items }))
    }

    /// Give every item in `ids` the same template.
    pub fn change_template(ids: Vec<ItemId>, template: impl Into<String>) -> Self {
        let template = template.into();
        let items = ids
            .into_iter()
            .map(|id| ItemTemplate {
                id,
                template: template.clone(),
            })
            .collect();
        Self::new(ActionKind::TemplateChange, Payload::Templates(items))
    }

    pub fn export(ids: Vec<ItemId>, target: Option<String>) -> Self {
        let mut action = Self::new(ActionKind::Export, Payload::Ids(ids));
        action.meta.target = target;
        action
    }

    pub fn import(files: Vec<PathBuf>) -> Self {
        Self::new(ActionKind::Import, Payload::Files(files))
    }

    pub fn add_tags(items: Vec<ItemId>, tags: Vec<TagRef>) -> Self {
        Self::new(ActionKind::AddTags, Payload::Tags(TagsPayload { items, tags }))
    }

    pub fn remove_tags(items: Vec<ItemId>, tags: Vec<TagRef>) -> Self {
        Self::new(ActionKind::RemoveTags, Payload::Tags(TagsPayload { items, tags }))
    }

    pub fn toggle_tags(id: ItemId, tags: Vec<TagRef>) -> Self {
        Self::new(
            ActionKind::ToggleTags,
            Payload::Tags(TagsPayload {
                items: vec![id],
                tags,
            }),
        )
    }

    pub fn clear_tags(id: ItemId) -> Self {
        Self::new(ActionKind::ClearTags, Payload::Item(id))
    }

    /// Rename the open project; always marked `persist`.
    pub fn save_project(name: impl Into<String>) -> Self {
        let mut action = Self::new(
            ActionKind::ProjectSave,
            Payload::Project(ProjectPatch { name: name.into() }),
        );
        action.meta.persist = true;
        action
    }

    /// Ids this action targets, for failure reports and history filters.
    pub fn targets(&self) -> Vec<i64> {
        match &self.payload {
            Payload::None | Payload::Files(_) | Payload::Project(_) => Vec::new(),
            Payload::Ids(ids) => ids.clone(),
            Payload::Item(id) => vec![*id],
            Payload::Tags(p) => p.items.clone(),
            Payload::TagWork(work) => work.iter().map(|w| w.id).collect(),
            Payload::Templates(items) => items.iter().map(|i| i.id).collect(),
            Payload::Split(p) => {
                let mut ids = vec![p.item.id];
                ids.extend(p.items.iter().map(|i| i.id));
                ids
            }
            Payload::Explode(p) => {
                let mut ids = vec![p.id];
                ids.extend(p.items.iter().flatten().copied());
                ids
            }
            Payload::Implode(p) => {
                let mut ids = vec![p.item.id];
                ids.extend(p.items.iter().copied());
                ids
            }
        }
    }

    fn invalid(&self, expected: &str) -> ArchiveError {
        ArchiveError::InvalidPayload {
            kind: self.kind,
            reason: format!("expected {} payload", expected),
        }
    }

    pub(crate) fn ids(&self) -> Result<&[ItemId]> {
        match &self.payload {
            Payload::Ids(ids) => Ok(ids),
            _ => Err(self.invalid("ids")),
        }
    }

    pub(crate) fn item(&self) -> Result<ItemId> {
        match &self.payload {
            Payload::Item(id) => Ok(*id),
            _ => Err(self.invalid("item")),
        }
    }

    pub(crate) fn files(&self) -> Result<&[PathBuf]> {
        match &self.payload {
            Payload::Files(files) => Ok(files),
            _ => Err(self.invalid("files")),
        }
    }

    pub(crate) fn split_payload(&self) -> Result<&SplitPayload> {
        match &self.payload {
            Payload::Split(p) => Ok(p),
            _ => Err(self.invalid("split")),
        }
    }

    pub(crate) fn explode_payload(&self) -> Result<&ExplodePayload> {
        match &self.payload {
            Payload::Explode(p) => Ok(p),
            _ => Err(self.invalid("explode")),
        }
    }

    pub(crate) fn implode_payload(&self) -> Result<&ImplodePayload> {
        match &self.payload {
            Payload::Implode(p) => Ok(p),
            _ => Err(self.invalid("implode")),
        }
    }

    pub(crate) fn templates(&self) -> Result<&[ItemTemplate]> {
        match &self.payload {
            Payload::Templates(items) => Ok(items),
            _ => Err(self.invalid("templates")),
        }
    }

    pub(crate) fn project_patch(&self) -> Result<&ProjectPatch> {
        match &self.payload {
            Payload::Project(p) => Ok(p),
            _ => Err(self.invalid("project")),
        }
    }
}

/// Item counter change of a completed command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryDelta {
    pub inc: i64,
    pub dec: i64,
}

impl HistoryDelta {
    pub fn inc(n: usize) -> Self {
        Self {
            inc: n as i64,
            dec: 0,
        }
    }

    pub fn dec(n: usize) -> Self {
        Self {
            inc: 0,
            dec: n as i64,
        }
    }

    pub fn net(&self) -> i64 {
        self.inc - self.dec
    }
}

/// Value a command returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Unit,
    Ids(Vec<ItemId>),
    Item(Item),
    Items(Vec<Item>),
    TagWork(Vec<ItemTags>),
    Export(serde_json::Value),
}

/// Result of a command that ran to the end.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub value: Output,
    /// Inverse action; commands without one are not recorded
    pub undo: Option<Action>,
    /// Redo action; defaults to re-running the original action
    pub redo: Option<Action>,
    pub delta: HistoryDelta,
}

impl Completion {
    pub fn new(value: Output) -> Self {
        Self {
            value,
            undo: None,
            redo: None,
            delta: HistoryDelta::default(),
        }
    }

    pub fn undo(mut self, action: Action) -> Self {
        self.undo = Some(action);
        self
    }

    pub fn redo(mut self, action: Action) -> Self {
        self.redo = Some(action);
        self
    }

    pub fn delta(mut self, delta: HistoryDelta) -> Self {
        self.delta = delta;
        self
    }
}

/// How a command run ended (errors aside).
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Completion),
    /// The user backed out; nothing was changed or recorded
    Cancelled,
    /// The action was handed to the project coordinator
    Forwarded,
}

impl Outcome {
    pub(crate) fn done(completion: Completion) -> Result<Self> {
        Ok(Outcome::Completed(completion))
    }

    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Outcome::Completed(done) => Some(done),
            _ => None,
        }
    }
}

/// A unit of work bound to one action kind.
///
/// Implementations are built by a [`Factory`] from the triggering action
/// and describe their side effects through the [`Effects`] handle.
#[async_trait]
pub trait Command: Send + Sync {
    async fn exec(&self, fx: &Effects) -> Result<Outcome>;
}
