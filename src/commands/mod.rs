//! Built-in commands.

/// Declares a command struct holding its triggering action, with the
/// `build` factory the registry stores.
macro_rules! command {
    ($name:ident) => {
        pub struct $name {
            action: $crate::command::Action,
        }

        impl $name {
            pub fn build(action: $crate::command::Action) -> Box<dyn $crate::command::Command> {
                Box::new(Self { action })
            }
        }
    };
}

pub mod export;
pub mod import;
pub mod item;
pub mod tags;

use crate::command::{ActionKind, RegistryBuilder};
use crate::error::Result;

/// Register every built-in command.
pub fn register_all(builder: RegistryBuilder) -> Result<RegistryBuilder> {
    builder
        .register(ActionKind::Delete, item::Delete::build)?
        .register(ActionKind::Destroy, item::Destroy::build)?
        .register(ActionKind::Load, item::Load::build)?
        .register(ActionKind::Restore, item::Restore::build)?
        .register(ActionKind::Merge, item::Merge::build)?
        .register(ActionKind::Split, item::Split::build)?
        .register(ActionKind::Explode, item::Explode::build)?
        .register(ActionKind::Implode, item::Implode::build)?
        .register(ActionKind::TemplateChange, item::TemplateChange::build)?
        .register(ActionKind::Export, export::Export::build)?
        .register(ActionKind::Import, import::Import::build)?
        .register(ActionKind::AddTags, tags::AddTags::build)?
        .register(ActionKind::RemoveTags, tags::RemoveTags::build)?
        .register(ActionKind::ToggleTags, tags::ToggleTags::build)?
        .register(ActionKind::ClearTags, tags::ClearTags::build)
}
