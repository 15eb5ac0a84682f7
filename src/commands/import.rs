//! Import photo files as new items.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::command::{Action, Command, Completion, Effects, HistoryDelta, Outcome, Output};
use crate::config::Config;
use crate::error::Result;
use crate::state::{Item, ItemId, Photo, Transition};
use crate::store::{item, photo};

/// Expand `roots` into the importable files below them, in walk order.
///
/// Runs on the blocking pool; unreadable entries are skipped.
pub async fn collect_files(roots: Vec<PathBuf>, config: Config) -> Result<Vec<PathBuf>> {
    let files = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();

        for root in &roots {
            // Walk the directory tree recursively
            for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable path");
                        continue;
                    }
                };

                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match path.extension() {
                    Some(ext) if config.is_importable(&ext.to_string_lossy()) => {
                        files.push(path.to_path_buf())
                    }
                    _ => debug!(path = %path.display(), "not an importable file"),
                }
            }
        }

        files
    })
    .await?;

    Ok(files)
}

command!(Import);

#[async_trait]
impl Command for Import {
    async fn exec(&self, fx: &Effects) -> Result<Outcome> {
        let roots = self.action.files()?.to_vec();
        let template = fx.config().template.clone();

        let files = fx.invoke(collect_files(roots, fx.config().clone())).await?;
        let found = files.len();

        let created = fx
            .transaction(move |conn| {
                let mut created: Vec<(Item, Photo)> = Vec::new();
                for file in &files {
                    let path = file.to_string_lossy();
                    if photo::path_exists(conn, &path)? {
                        continue;
                    }
                    let id = item::create(conn, &template)?;
                    let photo = photo::create(conn, id, &path)?;

                    let mut item = Item::new(id, template.clone());
                    item.photos.push(photo.id);
                    created.push((item, photo));
                }
                Ok(created)
            })
            .await?;

        let ids: Vec<ItemId> = created.iter().map(|(item, _)| item.id).collect();
        let (items, photos): (Vec<Item>, Vec<Photo>) = created.into_iter().unzip();
        info!(imported = ids.len(), skipped = found - ids.len(), "import complete");

        if ids.is_empty() {
            return Outcome::done(Completion::new(Output::Ids(ids)));
        }

        fx.emit(Transition::ItemsInsert(items)).await?;
        fx.emit(Transition::PhotosInsert(photos)).await?;
        fx.emit(Transition::Select(ids.clone())).await?;

        Outcome::done(
            Completion::new(Output::Ids(ids.clone()))
                .undo(Action::delete(ids.clone()))
                .redo(Action::restore(ids.clone()))
                .delta(HistoryDelta::inc(ids.len())),
        )
    }
}
