//! Tagging commands.
//!
//! AddTags and RemoveTags compute a per-item work list (the tags that
//! actually change on each item) before touching the file. The work list
//! is what gets emitted and what the inverse replays, so undoing a tag
//! change never touches tags the item already had.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::command::{
    Action, ActionKind, Command, Completion, Effects, ItemTags, Outcome, Output, Payload, TagRef,
};
use crate::error::{ArchiveError, Result};
use crate::state::{ItemId, State, TagId, Transition};
use crate::store::{item, tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Add,
    Remove,
}

/// Turn tag references into ids. Names are only accepted with
/// `meta.resolve`; unknown names are skipped.
async fn resolve(fx: &Effects, action: &Action, refs: &[TagRef]) -> Result<Vec<TagId>> {
    let mut ids = Vec::new();
    let mut names = Vec::new();

    for tag in refs {
        match tag {
            TagRef::Id(id) => ids.push(*id),
            TagRef::Name(name) if action.meta.resolve => names.push(name.clone()),
            TagRef::Name(name) => {
                return Err(ArchiveError::InvalidPayload {
                    kind: action.kind,
                    reason: format!("tag {:?} given by name without resolve", name),
                })
            }
        }
    }

    if !names.is_empty() {
        ids.extend(fx.select(|state| state.find_tag_ids(&names)).await?);
    }
    Ok(ids)
}

fn item_tags(state: &State, id: ItemId) -> BTreeSet<TagId> {
    state
        .items
        .get(&id)
        .map(|item| item.tags.clone())
        .unwrap_or_default()
}

/// Shared body of AddTags and RemoveTags.
async fn apply(fx: &Effects, action: &Action, change: Change) -> Result<Outcome> {
    let (items, work) = match &action.payload {
        Payload::Tags(p) => {
            let tags = resolve(fx, action, &p.tags).await?;
            let work = fx
                .select(|state| {
                    p.items
                        .iter()
                        .map(|id| {
                            let current = item_tags(state, *id);
                            let tags = tags
                                .iter()
                                .filter(|t| current.contains(t) == (change == Change::Remove))
                                .copied()
                                .collect();
                            ItemTags { id: *id, tags }
                        })
                        .collect::<Vec<_>>()
                })
                .await?;
            (p.items.clone(), work)
        }
        Payload::TagWork(work) => (work.iter().map(|w| w.id).collect(), work.clone()),
        _ => {
            return Err(ArchiveError::InvalidPayload {
                kind: action.kind,
                reason: "expected tags or tag work payload".into(),
            })
        }
    };

    let rows = work.clone();
    fx.transaction(move |conn| {
        // Every requested item must exist, even those with nothing to change
        for id in &items {
            item::ensure_exists(conn, *id)?;
        }
        for w in rows.iter().filter(|w| !w.tags.is_empty()) {
            match change {
                Change::Add => {
                    let pairs: Vec<(ItemId, TagId)> = w.tags.iter().map(|t| (w.id, *t)).collect();
                    tag::set(conn, &pairs)?;
                }
                Change::Remove => tag::remove(conn, &[w.id], &w.tags)?,
            }
        }
        Ok(())
    })
    .await?;

    let work: Vec<ItemTags> = work.into_iter().filter(|w| !w.tags.is_empty()).collect();
    for w in &work {
        let transition = match change {
            Change::Add => Transition::ItemTagsInsert {
                id: w.id,
                tags: w.tags.clone(),
            },
            Change::Remove => Transition::ItemTagsRemove {
                id: w.id,
                tags: w.tags.clone(),
            },
        };
        fx.emit(transition).await?;
    }

    let mut done = Completion::new(Output::TagWork(work.clone()));
    if !work.is_empty() {
        let inverse = match change {
            Change::Add => ActionKind::RemoveTags,
            Change::Remove => ActionKind::AddTags,
        };
        done = done.undo(Action::new(inverse, Payload::TagWork(work)));
    }
    Outcome::done(done)
}

command!(AddTags);

#[async_trait]
impl Command for AddTags {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        apply(fx, &self.action, Change::Add).await
    }
}

command!(RemoveTags);

#[async_trait]
impl Command for RemoveTags {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        apply(fx, &self.action, Change::Remove).await
    }
}

command!(ToggleTags);

#[async_trait]
impl Command for ToggleTags {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let Payload::Tags(p) = &self.action.payload else {
            return Err(ArchiveError::InvalidPayload {
                kind: self.action.kind,
                reason: "expected tags payload".into(),
            });
        };
        let &[id] = p.items.as_slice() else {
            return Err(ArchiveError::InvalidPayload {
                kind: self.action.kind,
                reason: "toggle applies to exactly one item".into(),
            });
        };

        let tags = resolve(fx, &self.action, &p.tags).await?;
        let current = fx.select(|state| item_tags(state, id)).await?;
        let (removed, added): (Vec<TagId>, Vec<TagId>) =
            tags.iter().copied().partition(|t| current.contains(t));

        let (add, remove) = (added.clone(), removed.clone());
        fx.transaction(move |conn| {
            let pairs: Vec<(ItemId, TagId)> = add.iter().map(|t| (id, *t)).collect();
            tag::set(conn, &pairs)?;
            tag::remove(conn, &[id], &remove)
        })
        .await?;

        if !added.is_empty() {
            fx.emit(Transition::ItemTagsInsert { id, tags: added }).await?;
        }
        if !removed.is_empty() {
            fx.emit(Transition::ItemTagsRemove { id, tags: removed }).await?;
        }

        let refs = tags.iter().map(|t| TagRef::Id(*t)).collect();
        Outcome::done(Completion::new(Output::Unit).undo(Action::toggle_tags(id, refs)))
    }
}

command!(ClearTags);

#[async_trait]
impl Command for ClearTags {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let id = self.action.item()?;
        let cleared: Vec<TagId> = fx
            .select(|state| item_tags(state, id))
            .await?
            .into_iter()
            .collect();

        fx.transaction(move |conn| tag::clear(conn, id)).await?;
        fx.emit(Transition::ItemTagsRemove {
            id,
            tags: cleared.clone(),
        })
        .await?;

        let mut done = Completion::new(Output::Unit);
        if !cleared.is_empty() {
            let refs = cleared.into_iter().map(TagRef::Id).collect();
            done = done.undo(Action::toggle_tags(id, refs));
        }
        Outcome::done(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::interpreter::testing::Fixture;
    use crate::command::ActionMeta;
    use crate::store::testing::*;

    /// Items `a` (tagged t1) and `b` (untagged), tags t1 and t2.
    async fn tagged() -> (Fixture, ItemId, ItemId, TagId, TagId) {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        let (b, _) = seed_item(&store, &["/2.jpg"]).await;
        let t1 = seed_tag(&store, "t1").await;
        let t2 = seed_tag(&store, "t2").await;
        store
            .seq(move |conn| tag::set(conn, &[(a, t1)]))
            .await
            .unwrap();
        store.close().await.unwrap();
        (Fixture::open(dir).await, a, b, t1, t2)
    }

    fn tags_of(fx: &Fixture, id: ItemId) -> BTreeSet<TagId> {
        fx.state().items[&id].tags.clone()
    }

    #[tokio::test]
    async fn test_add_tags_undo_keeps_preexisting_tags() {
        let (fx, a, b, t1, t2) = tagged().await;

        let done = fx
            .execute(Action::add_tags(vec![a, b], vec![TagRef::Id(t1), TagRef::Id(t2)]))
            .await;
        assert_eq!(tags_of(&fx, a), BTreeSet::from([t1, t2]));
        assert_eq!(tags_of(&fx, b), BTreeSet::from([t1, t2]));

        // The inverse only lists what changed
        let undo = done.completion().unwrap().undo.clone().unwrap();
        assert_eq!(
            undo.payload,
            Payload::TagWork(vec![
                ItemTags { id: a, tags: vec![t2] },
                ItemTags { id: b, tags: vec![t1, t2] },
            ])
        );

        fx.interpreter.undo().await.unwrap();
        assert_eq!(tags_of(&fx, a), BTreeSet::from([t1]));
        assert!(tags_of(&fx, b).is_empty());
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_add_tags_round_trip() {
        let (fx, a, b, t1, t2) = tagged().await;

        fx.execute(Action::add_tags(vec![a, b], vec![TagRef::Id(t1), TagRef::Id(t2)]))
            .await;
        let after = fx.model();

        fx.interpreter.undo().await.unwrap();
        fx.interpreter.redo().await.unwrap();
        assert_eq!(fx.model(), after);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_remove_tags_round_trip() {
        let (fx, a, b, t1, _) = tagged().await;

        fx.execute(Action::remove_tags(vec![a, b], vec![TagRef::Id(t1)]))
            .await;
        let after = fx.model();
        assert!(tags_of(&fx, a).is_empty());

        fx.interpreter.undo().await.unwrap();
        assert_eq!(tags_of(&fx, a), BTreeSet::from([t1]));
        assert!(tags_of(&fx, b).is_empty());

        fx.interpreter.redo().await.unwrap();
        assert_eq!(fx.model(), after);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_tag_names_need_resolve() {
        let (fx, a, _, _, t2) = tagged().await;
        let by_name = Action::add_tags(vec![a], vec![TagRef::Name("t2".into())]);

        let result = fx.interpreter.execute(by_name.clone()).await;
        assert!(matches!(result, Err(ArchiveError::InvalidPayload { .. })));

        let resolved = by_name.with_meta(ActionMeta {
            resolve: true,
            ..ActionMeta::default()
        });
        fx.execute(resolved).await;
        assert!(tags_of(&fx, a).contains(&t2));
    }

    #[tokio::test]
    async fn test_unknown_tag_names_are_skipped() {
        let (fx, a, _, t1, t2) = tagged().await;
        let action = Action::add_tags(
            vec![a],
            vec![TagRef::Name("t2".into()), TagRef::Name("nosuch".into())],
        )
        .with_meta(ActionMeta {
            resolve: true,
            ..ActionMeta::default()
        });

        fx.execute(action).await;

        assert_eq!(tags_of(&fx, a), BTreeSet::from([t1, t2]));
        assert_eq!(fx.state().tags.len(), 2);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_add_tags_to_missing_item_fails() {
        let (fx, a, _, _, t2) = tagged().await;
        let before = fx.model();

        let result = fx
            .interpreter
            .execute(Action::add_tags(vec![a, 4242], vec![TagRef::Id(t2)]))
            .await;

        assert!(matches!(result, Err(ArchiveError::NotFound { id: 4242, .. })));
        assert_eq!(fx.model(), before);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_toggle_is_its_own_inverse() {
        let (fx, a, _, t1, t2) = tagged().await;

        fx.execute(Action::toggle_tags(a, vec![TagRef::Id(t1), TagRef::Id(t2)]))
            .await;
        assert_eq!(tags_of(&fx, a), BTreeSet::from([t2]));

        fx.interpreter.undo().await.unwrap();
        assert_eq!(tags_of(&fx, a), BTreeSet::from([t1]));
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_clear_tags_undo() {
        let (fx, a, _, t1, _) = tagged().await;

        fx.execute(Action::clear_tags(a)).await;
        assert!(tags_of(&fx, a).is_empty());

        fx.interpreter.undo().await.unwrap();
        assert_eq!(tags_of(&fx, a), BTreeSet::from([t1]));
        fx.assert_consistent().await;
    }
}
