//! State management module
//!
//! This module holds the archive's data model and its in-memory view:
//! - Shared data structures (data.rs)
//! - The projection and the transitions that change it (projection.rs)

pub mod data;
pub mod projection;

pub use data::{Item, ItemId, Metadata, Photo, PhotoId, ProjectInfo, SubjectId, Tag, TagId, Value};
pub use projection::{State, Transition};
