//! Item lifecycle and restructuring commands.
//!
//! Every command here changes the file in a single transaction and only
//! emits transitions once that transaction has committed, so a failure
//! leaves both the file and the projection as they were.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::command::{
    Action, ActionKind, Command, Completion, Effects, ExplodePayload, HistoryDelta, HistoryFilter,
    ItemTemplate, Outcome, Output, Payload, SplitPayload,
};
use crate::error::{ArchiveError, Result};
use crate::state::{Item, ItemId, Metadata, PhotoId, State, Transition};
use crate::store::{item, metadata, photo};

/// How many of `ids` are in the projection with the given deleted flag.
fn count(state: &State, ids: &[ItemId], deleted: bool) -> usize {
    ids.iter()
        .filter(|id| state.items.get(id).is_some_and(|item| item.deleted == deleted))
        .count()
}

fn load_data(conn: &rusqlite::Connection, items: &[Item]) -> Result<BTreeMap<ItemId, Metadata>> {
    items
        .iter()
        .map(|item| Ok((item.id, metadata::load(conn, item.id)?)))
        .collect()
}

command!(Delete);

#[async_trait]
impl Command for Delete {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let ids = self.action.ids()?.to_vec();
        let live = fx.select(|state| count(state, &ids, false)).await?;

        let rows = ids.clone();
        fx.transaction(move |conn| item::delete(conn, &rows)).await?;
        fx.emit_indexed(Transition::ItemsDeleted {
            ids: ids.clone(),
            deleted: true,
        })
        .await?;

        Outcome::done(
            Completion::new(Output::Ids(ids.clone()))
                .undo(Action::restore(ids))
                .delta(HistoryDelta::dec(live)),
        )
    }
}

command!(Restore);

#[async_trait]
impl Command for Restore {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let ids = self.action.ids()?.to_vec();
        let trashed = fx.select(|state| count(state, &ids, true)).await?;

        let rows = ids.clone();
        fx.transaction(move |conn| item::restore(conn, &rows)).await?;
        fx.emit_indexed(Transition::ItemsDeleted {
            ids: ids.clone(),
            deleted: false,
        })
        .await?;

        Outcome::done(
            Completion::new(Output::Ids(ids.clone()))
                .undo(Action::delete(ids))
                .delta(HistoryDelta::inc(trashed)),
        )
    }
}

command!(TemplateChange);

#[async_trait]
impl Command for TemplateChange {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let changes = self.action.templates()?.to_vec();
        let ids: Vec<ItemId> = changes.iter().map(|c| c.id).collect();

        let rows = changes.clone();
        let previous = fx
            .transaction(move |conn| {
                rows.iter()
                    .map(|c| -> Result<ItemTemplate> {
                        Ok(ItemTemplate {
                            id: c.id,
                            template: item::set_template(conn, c.id, &c.template)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        fx.emit(Transition::ItemsTemplate(
            changes.into_iter().map(|c| (c.id, c.template)).collect(),
        ))
        .await?;

        Outcome::done(
            Completion::new(Output::Ids(ids))
                .undo(Action::new(ActionKind::TemplateChange, Payload::Templates(previous))),
        )
    }
}

command!(Destroy);

impl Destroy {
    async fn destroy(&self, fx: &Effects, ids: Vec<ItemId>) -> Result<Outcome> {
        let live = fx.select(|state| count(state, &ids, false)).await?;

        let destroyed = fx
            .transaction(move |conn| {
                if ids.is_empty() {
                    item::prune(conn)
                } else {
                    item::destroy(conn, &ids)
                }
            })
            .await?;

        let mut owners = destroyed.items.clone();
        owners.extend(destroyed.photos.iter().copied());
        fx.emit(Transition::PhotosRemove(destroyed.photos.clone())).await?;
        fx.emit(Transition::ItemsRemove(destroyed.items.clone())).await?;
        fx.emit(Transition::MetadataRemove(owners)).await?;

        info!(items = destroyed.items.len(), photos = destroyed.photos.len(), "items destroyed");
        Outcome::done(
            Completion::new(Output::Ids(destroyed.items)).delta(HistoryDelta::dec(live)),
        )
    }
}

#[async_trait]
impl Command for Destroy {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let ids = self.action.ids()?.to_vec();

        if !fx.confirm("item.destroy").await? {
            debug!("destroy cancelled");
            return Ok(Outcome::Cancelled);
        }

        let result = self.destroy(fx, ids).await;

        // Destroyed rows may be the target of any recorded inverse
        let dropped = fx.drop_history(HistoryFilter::All);
        debug!(dropped, "history dropped");

        result
    }
}

command!(Load);

#[async_trait]
impl Command for Load {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let ids = self.action.ids()?.to_vec();

        let (items, data) = fx
            .seq(move |conn| {
                let items = item::load(conn, &ids)?;
                let data = load_data(conn, &items)?;
                Ok((items, data))
            })
            .await?;

        fx.emit(Transition::ItemsInsert(items.clone())).await?;
        for (id, data) in data {
            fx.emit(Transition::MetadataReplace { id, data }).await?;
        }

        Outcome::done(Completion::new(Output::Items(items)))
    }
}

command!(Merge);

#[async_trait]
impl Command for Merge {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let ids = self.action.ids()?;
        let Some((&primary, absorbed)) = ids.split_first() else {
            return Err(ArchiveError::InvalidPayload {
                kind: ActionKind::Merge,
                reason: "no items to merge".into(),
            });
        };
        let mut seen = BTreeSet::from([primary]);
        if let Some(id) = absorbed.iter().find(|id| !seen.insert(**id)) {
            return Err(ArchiveError::InvalidPayload {
                kind: ActionKind::Merge,
                reason: format!("item {} listed more than once", id),
            });
        }
        let absorbed = absorbed.to_vec();

        let (before, merged) = fx
            .transaction(move |conn| {
                let before = item::load_one(conn, primary)?;
                let merged = item::merge(conn, primary, &absorbed)?;
                Ok((before, merged))
            })
            .await?;

        let removed: Vec<ItemId> = merged.items.iter().map(|i| i.id).collect();
        let moves: Vec<(PhotoId, ItemId)> = merged.photos.iter().map(|p| (*p, primary)).collect();

        fx.all([
            fx.emit(Transition::PhotosMove(moves)),
            fx.emit(Transition::ItemTagsInsert {
                id: primary,
                tags: merged.tags.clone(),
            }),
            fx.emit(Transition::ItemsRemove(removed.clone())),
            fx.emit(Transition::MetadataRemove(removed)),
        ])
        .await?;
        fx.emit(Transition::Select(vec![primary])).await?;

        let item = fx.select(|state| state.items.get(&primary).cloned()).await?;
        let live = merged.items.iter().filter(|i| !i.deleted).count();

        info!(primary, absorbed = merged.items.len(), "items merged");
        Outcome::done(
            Completion::new(item.map_or(Output::Unit, Output::Item))
                .undo(Action::split(SplitPayload {
                    item: before,
                    items: merged.items,
                    data: merged.data,
                    primary_data: merged.primary_data,
                    tags: merged.tags,
                }))
                .delta(HistoryDelta::dec(live)),
        )
    }
}

command!(Split);

#[async_trait]
impl Command for Split {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let payload = self.action.split_payload()?.clone();
        let primary = payload.item.id;

        let spec = payload.clone();
        let items = fx
            .transaction(move |conn| {
                item::split(
                    conn,
                    primary,
                    &spec.items,
                    &spec.data,
                    &spec.primary_data,
                    &spec.tags,
                    &spec.item.photos,
                )
            })
            .await?;

        let moves: Vec<(PhotoId, ItemId)> = payload
            .items
            .iter()
            .flat_map(|item| item.photos.iter().map(move |p| (*p, item.id)))
            .collect();
        let ids: Vec<ItemId> = payload.items.iter().map(|i| i.id).collect();

        fx.emit(Transition::ItemsInsert(items.clone())).await?;
        fx.emit(Transition::PhotosMove(moves)).await?;
        for id in &ids {
            let data = payload.data.get(id).cloned().unwrap_or_default();
            fx.emit(Transition::MetadataReplace { id: *id, data }).await?;
        }
        fx.emit(Transition::MetadataReplace {
            id: primary,
            data: payload.primary_data.clone(),
        })
        .await?;
        fx.emit(Transition::Select(ids.clone())).await?;

        let live = payload.items.iter().filter(|i| !i.deleted).count();
        let mut merge = vec![primary];
        merge.extend(ids);

        info!(primary, items = payload.items.len(), "item split");
        Outcome::done(
            Completion::new(Output::Items(items))
                .undo(Action::merge(merge))
                .delta(HistoryDelta::inc(live)),
        )
    }
}

command!(Explode);

#[async_trait]
impl Command for Explode {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let payload = self.action.explode_payload()?.clone();
        let id = payload.id;

        let source = fx
            .select(|state| state.items.get(&id).cloned())
            .await?
            .ok_or_else(|| ArchiveError::item_not_found(id))?;

        let photos = payload
            .photos
            .clone()
            .unwrap_or_else(|| source.photos.iter().skip(1).copied().collect());
        if photos.is_empty() {
            debug!(id, "nothing to explode");
            return Outcome::done(Completion::new(Output::Items(Vec::new())));
        }

        let (targets, reattach) = (photos.clone(), payload.items.clone());
        let (items, data) = fx
            .transaction(move |conn| {
                let items = match &reattach {
                    Some(ids) => item::reattach(conn, id, &targets, ids)?,
                    None => item::explode(conn, id, &targets)?,
                };
                let data = load_data(conn, &items)?;
                Ok((items, data))
            })
            .await?;

        let moves: Vec<(PhotoId, ItemId)> = items
            .iter()
            .flat_map(|item| item.photos.iter().map(move |p| (*p, item.id)))
            .collect();
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();

        fx.emit(Transition::ItemsInsert(items.clone())).await?;
        fx.emit(Transition::PhotosMove(moves)).await?;
        for (id, data) in data {
            fx.emit(Transition::MetadataReplace { id, data }).await?;
        }

        info!(id, items = ids.len(), "item exploded");
        let redo = Action::new(
            ActionKind::Explode,
            Payload::Explode(ExplodePayload {
                id,
                photos: Some(photos),
                items: Some(ids.clone()),
            }),
        );
        Outcome::done(
            Completion::new(Output::Items(items))
                .undo(Action::implode(source, ids.clone()))
                .redo(redo)
                .delta(HistoryDelta::inc(ids.len())),
        )
    }
}

command!(Implode);

#[async_trait]
impl Command for Implode {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let payload = self.action.implode_payload()?.clone();
        let id = payload.item.id;
        let live = fx
            .select(|state| count(state, &payload.items, false))
            .await?;

        let (order, absorbed) = (payload.item.photos.clone(), payload.items.clone());
        let (moves, photos) = fx
            .transaction(move |conn| {
                let mut moves = Vec::new();
                for item in &absorbed {
                    moves.extend(photo::owned_by(conn, *item)?.into_iter().map(|p| (p, id)));
                }
                let photos = item::implode(conn, id, &order, &absorbed)?;
                Ok((moves, photos))
            })
            .await?;

        fx.emit(Transition::PhotosMove(moves)).await?;
        fx.emit(Transition::ItemPhotos { id, photos }).await?;
        fx.emit(Transition::ItemsDeleted {
            ids: payload.items.clone(),
            deleted: true,
        })
        .await?;
        fx.emit(Transition::Select(vec![id])).await?;

        info!(id, items = payload.items.len(), "items imploded");
        Outcome::done(Completion::new(Output::Ids(vec![id])).delta(HistoryDelta::dec(live)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::interpreter::testing::Fixture;
    use crate::command::TagRef;
    use crate::host::testing::Recorder;
    use crate::state::Value;
    use crate::store::{tag, testing::*};

    /// Two items, `a` owning two photos tagged t1 and `b` owning one photo
    /// tagged t2 with a title.
    async fn pair() -> (Fixture, ItemId, ItemId, Vec<PhotoId>, Vec<PhotoId>, i64, i64) {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, pa) = seed_item(&store, &["/10.jpg", "/11.jpg"]).await;
        let (b, pb) = seed_item(&store, &["/12.jpg"]).await;
        let t1 = seed_tag(&store, "t1").await;
        let t2 = seed_tag(&store, "t2").await;
        store
            .transaction(move |conn| {
                tag::set(conn, &[(a, t1), (b, t2)])?;
                let mut data = Metadata::new();
                data.insert("title".into(), Value::text("Letter"));
                metadata::insert(conn, b, &data)
            })
            .await
            .unwrap();
        store.close().await.unwrap();

        (Fixture::open(dir).await, a, b, pa, pb, t1, t2)
    }

    fn photo_ids(state: &State) -> BTreeSet<PhotoId> {
        state.photos.keys().copied().collect()
    }

    #[tokio::test]
    async fn test_merge_and_split_back() {
        let (fx, a, b, pa, pb, t1, t2) = pair().await;

        let outcome = fx.execute(Action::merge(vec![a, b])).await;
        let done = outcome.completion().unwrap().clone();

        let state = fx.state();
        let mut all = pa.clone();
        all.extend(pb.iter().copied());
        assert_eq!(state.items[&a].photos, all);
        assert_eq!(state.items[&a].tags, BTreeSet::from([t1, t2]));
        assert!(!state.items.contains_key(&b));
        assert_eq!(state.selection, vec![a]);
        assert_eq!(state.project.items, 1);
        fx.assert_consistent().await;

        // Split using the captured inverse
        let split = done.undo.unwrap();
        assert_eq!(split.kind, ActionKind::Split);
        fx.execute(split).await;

        let state = fx.state();
        assert_eq!(state.items[&a].photos, pa);
        assert_eq!(state.items[&a].tags, BTreeSet::from([t1]));
        assert_eq!(state.items[&b].photos, pb);
        assert_eq!(state.items[&b].tags, BTreeSet::from([t2]));
        assert_eq!(state.metadata[&b]["title"].text, "Letter");
        assert_eq!(state.project.items, 2);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_template_change_round_trip() {
        let (fx, a, b, ..) = pair().await;
        let initial = fx.model();

        fx.execute(Action::change_template(vec![a], "letter")).await;
        assert_eq!(fx.state().items[&a].template, "letter");
        assert_eq!(fx.state().items[&b].template, "generic");
        fx.assert_consistent().await;

        // Undo restores each item's own previous template
        fx.execute(Action::change_template(vec![a, b], "photo")).await;
        fx.interpreter.undo().await.unwrap().unwrap();
        assert_eq!(fx.state().items[&a].template, "letter");
        assert_eq!(fx.state().items[&b].template, "generic");

        fx.interpreter.redo().await.unwrap().unwrap();
        assert_eq!(fx.state().items[&a].template, "photo");
        assert_eq!(fx.state().items[&b].template, "photo");
        fx.assert_consistent().await;

        fx.interpreter.undo().await.unwrap().unwrap();
        fx.interpreter.undo().await.unwrap().unwrap();
        assert_eq!(fx.model(), initial);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_template_change_missing_item_changes_nothing() {
        let (fx, a, ..) = pair().await;
        let initial = fx.model();

        let result = fx
            .interpreter
            .execute(Action::change_template(vec![a, 4242], "letter"))
            .await;

        assert!(matches!(result, Err(ArchiveError::NotFound { id: 4242, .. })));
        assert_eq!(fx.model(), initial);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_merge_rejects_repeated_items() {
        let (fx, a, b, ..) = pair().await;
        let initial = fx.model();

        for ids in [vec![a, b, b], vec![a, b, a]] {
            let result = fx.interpreter.execute(Action::merge(ids)).await;
            assert!(matches!(
                result,
                Err(ArchiveError::InvalidPayload { kind: ActionKind::Merge, .. })
            ));
        }

        assert_eq!(fx.model(), initial);
        assert_eq!(fx.state().project.items, 2);
        assert!(!fx.interpreter.history().lock().can_undo());
        assert_eq!(fx.recorder.failures.lock().len(), 2);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_merge_undo_redo_round_trip() {
        let (fx, a, b, ..) = pair().await;
        let initial = fx.model();

        fx.execute(Action::merge(vec![a, b])).await;
        let merged = fx.model();

        fx.interpreter.undo().await.unwrap().unwrap();
        assert_eq!(fx.model(), initial);
        fx.assert_consistent().await;

        fx.interpreter.redo().await.unwrap().unwrap();
        assert_eq!(fx.model(), merged);
        fx.assert_consistent().await;

        // The redone merge can be undone again
        fx.interpreter.undo().await.unwrap().unwrap();
        assert_eq!(fx.model(), initial);
    }

    #[tokio::test]
    async fn test_split_undo_redo_round_trip() {
        let (fx, a, b, ..) = pair().await;
        let done = fx.execute(Action::merge(vec![a, b])).await;
        let split = done.completion().unwrap().undo.clone().unwrap();

        fx.execute(split).await;
        let after = fx.model();

        fx.interpreter.undo().await.unwrap().unwrap();
        assert!(!fx.state().items.contains_key(&b));
        fx.assert_consistent().await;

        fx.interpreter.redo().await.unwrap().unwrap();
        assert_eq!(fx.model(), after);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_restructuring_conserves_photos() {
        let (fx, a, b, ..) = pair().await;
        let photos = photo_ids(&fx.state());

        fx.execute(Action::merge(vec![a, b])).await;
        fx.execute(Action::explode(a, None)).await;
        fx.interpreter.undo().await.unwrap();
        fx.interpreter.redo().await.unwrap();
        fx.interpreter.undo().await.unwrap();
        fx.interpreter.undo().await.unwrap();

        let state = fx.state();
        assert_eq!(photo_ids(&state), photos);
        state.check_ownership().unwrap();
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_explode_and_implode_reuse_identities() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, photos) = seed_item(&store, &["/1.jpg", "/2.jpg", "/3.jpg"]).await;
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        let done = fx.execute(Action::explode(a, None)).await;
        let Output::Items(items) = &done.completion().unwrap().value else {
            panic!("explode returned no items");
        };
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        assert_eq!(items[0].photos, vec![photos[1]]);
        assert_eq!(items[1].photos, vec![photos[2]]);
        assert_eq!(fx.state().items[&a].photos, vec![photos[0]]);
        assert_eq!(fx.state().project.items, 3);
        let exploded = fx.model();
        fx.assert_consistent().await;

        fx.interpreter.undo().await.unwrap();
        let state = fx.state();
        assert_eq!(state.items[&a].photos, photos);
        assert!(ids.iter().all(|id| state.items[id].deleted));
        assert_eq!(state.project.items, 1);
        fx.assert_consistent().await;

        fx.interpreter.redo().await.unwrap();
        assert_eq!(fx.model(), exploded);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_explode_failure_leaves_relation_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg", "/2.jpg", "/3.jpg"]).await;
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        // Let the first duplicate through and fail on the second
        fx.session
            .store()
            .seq(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER fail_second_dup BEFORE INSERT ON item
                     WHEN (SELECT COUNT(*) FROM item) >= 2
                     BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let before = ownership(fx.session.store()).await;
        let model = fx.model();

        let result = fx.interpreter.execute(Action::explode(a, None)).await;
        assert!(matches!(result, Err(ArchiveError::Sqlite(_))));

        assert_eq!(ownership(fx.session.store()).await, before);
        assert_eq!(fx.model(), model);
        assert!(!fx.interpreter.history().lock().can_undo());
        fx.assert_consistent().await;

        let failures = fx.recorder.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, ActionKind::Explode);
        assert_eq!(failures[0].targets, vec![a]);
    }

    #[tokio::test]
    async fn test_delete_restore_counts() {
        let (fx, a, b, ..) = pair().await;

        fx.execute(Action::delete(vec![a, b])).await;
        assert_eq!(fx.state().project.items, 0);
        assert!(fx.recorder.refreshed.lock().contains(&b));

        // Deleting trashed items again does not count twice
        fx.execute(Action::delete(vec![a])).await;
        assert_eq!(fx.state().project.items, 0);

        fx.execute(Action::restore(vec![a])).await;
        assert_eq!(fx.state().project.items, 1);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_destroy_drops_history() {
        let (fx, a, b, _, _, t1, _) = pair().await;
        fx.execute(Action::add_tags(vec![b], vec![TagRef::Id(t1)])).await;
        fx.execute(Action::delete(vec![a])).await;
        assert!(fx.interpreter.history().lock().can_undo());

        let done = fx.execute(Action::destroy(vec![])).await;
        assert_eq!(done.completion().unwrap().value, Output::Ids(vec![a]));

        let state = fx.state();
        assert!(!state.items.contains_key(&a));
        assert!(state.items.contains_key(&b));
        assert_eq!(state.project.items, 1);
        assert!(!fx.interpreter.history().lock().can_undo());
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_destroy_cancelled_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        store.close().await.unwrap();
        let recorder = Recorder {
            refuse: true,
            ..Recorder::default()
        };
        let fx = Fixture::with_recorder(dir, recorder).await;
        fx.execute(Action::delete(vec![a])).await;

        let outcome = fx.execute(Action::destroy(vec![a])).await;

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(fx.state().items.contains_key(&a));
        assert!(fx.interpreter.history().lock().can_undo());
    }

    #[tokio::test]
    async fn test_load_refreshes_projection() {
        let (fx, a, ..) = pair().await;
        fx.session
            .store()
            .seq(move |conn| {
                let mut data = Metadata::new();
                data.insert("title".into(), Value::text("Changed"));
                metadata::insert(conn, a, &data)
            })
            .await
            .unwrap();

        fx.execute(Action::load(vec![a, 999])).await;
        assert_eq!(fx.state().metadata[&a]["title"].text, "Changed");
        fx.assert_consistent().await;
    }
}
