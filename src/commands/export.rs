//! Export items as JSON grouped by template.

use async_trait::async_trait;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use tracing::info;

use crate::command::{Command, Completion, Effects, Outcome, Output};
use crate::error::{ArchiveError, Result};
use crate::state::{ItemId, State};

pub const CLIPBOARD: &str = ":clipboard:";
pub const PLUGIN: &str = ":plugin:";

/// Build the export document for `ids` (the selection if empty).
pub fn document(state: &State, ids: &[ItemId]) -> Json {
    let ids = if ids.is_empty() { &state.selection[..] } else { ids };
    let mut groups: BTreeMap<&str, Vec<Json>> = BTreeMap::new();

    for item in ids.iter().filter_map(|id| state.items.get(id)) {
        let photos: Vec<Json> = item
            .photos
            .iter()
            .filter_map(|id| state.photos.get(id))
            .map(|photo| {
                json!({
                    "id": photo.id,
                    "path": photo.path,
                    "metadata": state.metadata.get(&photo.id).cloned().unwrap_or_default(),
                })
            })
            .collect();
        let tags: Vec<&str> = item
            .tags
            .iter()
            .filter_map(|id| state.tags.get(id))
            .map(|tag| tag.name.as_str())
            .collect();

        groups.entry(item.template.as_str()).or_default().push(json!({
            "id": item.id,
            "metadata": state.metadata.get(&item.id).cloned().unwrap_or_default(),
            "tags": tags,
            "photos": photos,
        }));
    }

    Json::Array(
        groups
            .into_iter()
            .map(|(template, items)| json!({ "template": template, "items": items }))
            .collect(),
    )
}

command!(Export);

#[async_trait]
impl Command for Export {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let ids = self.action.ids()?;
        let meta = &self.action.meta;

        let target = match (&meta.plugin, &meta.target) {
            (Some(_), _) => PLUGIN.to_string(),
            (None, Some(target)) => target.clone(),
            (None, None) => match fx.save_path().await? {
                Some(path) => path.to_string_lossy().into_owned(),
                None => return Ok(Outcome::Cancelled),
            },
        };

        let data = fx.select(|state| document(state, ids)).await?;
        let text = serde_json::to_string_pretty(&data)?;

        match target.as_str() {
            CLIPBOARD => fx.invoke(fx.host().clipboard.write_text(&text)).await?,
            PLUGIN => {
                let plugin = meta.plugin.as_deref().ok_or_else(|| ArchiveError::InvalidPayload {
                    kind: self.action.kind,
                    reason: "export to a plugin needs meta.plugin".into(),
                })?;
                fx.invoke(fx.host().plugins.export(plugin, &data)).await?
            }
            path => {
                let write = async {
                    tokio::fs::write(path, &text)
                        .await
                        .map_err(ArchiveError::from)
                };
                fx.invoke(write).await?
            }
        }

        info!(%target, "items exported");
        Outcome::done(Completion::new(Output::Export(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::interpreter::testing::Fixture;
    use crate::command::Action;
    use crate::host::testing::Recorder;
    use crate::store::{tag, testing::*};

    #[tokio::test]
    async fn test_export_to_clipboard() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        let t = seed_tag(&store, "letters").await;
        store.seq(move |conn| tag::set(conn, &[(a, t)])).await.unwrap();
        store.close().await.unwrap();
        let fx = Fixture::open(dir).await;

        let done = fx
            .execute(Action::export(vec![a], Some(CLIPBOARD.into())))
            .await;

        let Output::Export(data) = &done.completion().unwrap().value else {
            panic!("no export document");
        };
        assert_eq!(data[0]["template"], "generic");
        assert_eq!(data[0]["items"][0]["tags"], json!(["letters"]));
        assert_eq!(data[0]["items"][0]["photos"][0]["path"], "/1.jpg");

        let copied = fx.recorder.clipboard.lock().clone().unwrap();
        assert_eq!(serde_json::from_str::<Json>(&copied).unwrap(), *data);
        assert!(!fx.interpreter.history().lock().can_undo());
    }

    #[tokio::test]
    async fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        store.close().await.unwrap();
        let out = dir.path().join("export.json");
        let fx = Fixture::open(dir).await;

        fx.execute(Action::export(vec![a], Some(out.to_string_lossy().into())))
            .await;

        let written: Json = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(written[0]["items"][0]["id"], a);
    }

    #[tokio::test]
    async fn test_dismissed_dialog_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch(&dir).await;
        let (a, _) = seed_item(&store, &["/1.jpg"]).await;
        store.close().await.unwrap();
        let fx = Fixture::with_recorder(dir, Recorder::default()).await;

        let outcome = fx.execute(Action::export(vec![a], None)).await;
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[test]
    fn test_document_falls_back_to_selection() {
        let mut state = State::default();
        state.items.insert(1, crate::state::Item::new(1, "generic"));
        state.items.insert(2, crate::state::Item::new(2, "letter"));
        state.selection = vec![2];

        let data = document(&state, &[]);
        assert_eq!(data.as_array().unwrap().len(), 1);
        assert_eq!(data[0]["template"], "letter");
    }
}
