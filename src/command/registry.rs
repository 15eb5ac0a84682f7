//! Static mapping from action kinds to command constructors.

use std::collections::HashMap;

use super::{Action, ActionKind, Command};
use crate::error::{ArchiveError, Result};

/// Builds a command from the action that triggered it.
pub type Factory = fn(Action) -> Box<dyn Command>;

/// Collects registrations; a second registration for a kind is an error.
#[derive(Default)]
pub struct RegistryBuilder {
    commands: HashMap<ActionKind, Factory>,
}

impl RegistryBuilder {
    pub fn register(mut self, kind: ActionKind, factory: Factory) -> Result<Self> {
        if self.commands.contains_key(&kind) {
            return Err(ArchiveError::DuplicateRegistration(kind));
        }
        self.commands.insert(kind, factory);
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            commands: self.commands,
        }
    }
}

/// Resolved at startup and read-only afterwards.
pub struct Registry {
    commands: HashMap<ActionKind, Factory>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with every built-in command.
    pub fn standard() -> Result<Self> {
        Ok(crate::commands::register_all(Self::builder())?.build())
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.commands.contains_key(&kind)
    }

    /// Instantiate the command registered for `action.kind`.
    pub fn instantiate(&self, action: Action) -> Result<Box<dyn Command>> {
        let factory = self
            .commands
            .get(&action.kind)
            .ok_or(ArchiveError::Unregistered(action.kind))?;
        Ok(factory(action))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.commands.keys().collect();
        kinds.sort();
        f.debug_struct("Registry").field("commands", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Effects, Outcome};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Command for Noop {
        async fn exec(&self, _fx: &Effects) -> Result<Outcome> {
            Ok(Outcome::Cancelled)
        }
    }

    fn noop(_: Action) -> Box<dyn Command> {
        Box::new(Noop)
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let result = Registry::builder()
            .register(ActionKind::Load, noop)
            .and_then(|b| b.register(ActionKind::Load, noop));

        assert!(matches!(
            result,
            Err(ArchiveError::DuplicateRegistration(ActionKind::Load))
        ));
    }

    #[test]
    fn test_unregistered_kind() {
        let registry = Registry::builder().build();
        let result = registry.instantiate(Action::load(vec![]));
        assert!(matches!(result, Err(ArchiveError::Unregistered(ActionKind::Load))));
    }

    #[test]
    fn test_standard_registry_covers_every_command() {
        let registry = Registry::standard().unwrap();
        for kind in ActionKind::COMMANDS {
            assert!(registry.contains(kind), "{:?} not registered", kind);
        }
        assert!(!registry.contains(ActionKind::ProjectSave));
    }
}
