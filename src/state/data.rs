//! Shared data structures for the archive state
//!
//! These structs represent the data model that flows between
//! the store layer, the commands and the in-memory projection.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Row id of an item (a subject id)
pub type ItemId = i64;
/// Row id of a photo (a subject id)
pub type PhotoId = i64;
/// Row id of a tag
pub type TagId = i64;
/// Owner id of a metadata record: any item, photo or selection id
pub type SubjectId = i64;

/// Metadata record of one owner: property identifier -> typed value
pub type Metadata = BTreeMap<String, Value>;

/// Represents a single item (a record) in the archive
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Unique subject ID
    pub id: ItemId,
    /// Identifier of the metadata schema this item follows
    pub template: String,
    /// Photos owned by this item, in display order
    pub photos: Vec<PhotoId>,
    /// Tags attached to this item
    pub tags: BTreeSet<TagId>,
    /// Soft-delete flag (item is in the trash)
    pub deleted: bool,
}

impl Item {
    /// Create an empty, live item
    pub fn new(id: ItemId, template: impl Into<String>) -> Self {
        Self {
            id,
            template: template.into(),
            photos: Vec::new(),
            tags: BTreeSet::new(),
            deleted: false,
        }
    }
}

/// Represents a single photo file attached to an item
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    /// Unique subject ID
    pub id: PhotoId,
    /// Back-reference to the owning item
    pub item: ItemId,
    /// Full path to the photo file
    pub path: String,
}

/// A named tag
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}

/// A typed metadata value
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// Datatype IRI or short name (e.g. "text", "date")
    #[serde(rename = "type")]
    pub datatype: String,
    /// Lexical form of the value
    pub text: String,
}

impl Value {
    /// Plain text value
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            datatype: "text".to_string(),
            text: text.into(),
        }
    }

    /// Value with an explicit datatype
    pub fn typed(datatype: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            datatype: datatype.into(),
            text: text.into(),
        }
    }
}

/// The open project's identity as seen by the projection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectInfo {
    /// Stable project id (uuid)
    pub id: String,
    /// Display name, persisted via `ProjectSave`
    pub name: String,
    /// Path of the project file
    pub file: PathBuf,
    /// Number of live items, maintained by command history deltas
    pub items: i64,
}
