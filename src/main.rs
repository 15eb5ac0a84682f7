use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use photo_archive::command::{ActionMeta, Output, TagRef};
use photo_archive::{
    logging, Action, ArchiveError, Config, Coordinator, Host, Interpreter, Outcome, ProjectEvent,
    Registry, Result, Session, Store,
};

/// Headless driver for photo archive projects
#[derive(Parser, Debug)]
#[command(name = "photo-archive", version, about)]
struct Cli {
    /// Project file, relative to the data directory unless a path is given
    #[arg(short, long, global = true, default_value = "archive.tpy")]
    project: String,

    /// Data directory (overrides PHOTO_ARCHIVE_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Default log filter (overrides PHOTO_ARCHIVE_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a new project file
    Init {
        /// Project name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Import photo files or folders, one item per photo
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List items
    List {
        /// Include items in the trash
        #[arg(long)]
        deleted: bool,
    },
    /// Merge items into the first one
    Merge {
        #[arg(required = true, num_args = 2..)]
        ids: Vec<i64>,
    },
    /// Give photos of an item their own items
    Explode {
        id: i64,
        /// Photos to split off (default: all but the first)
        #[arg(long)]
        photos: Vec<i64>,
    },
    /// Add (or remove) tags by name
    Tag {
        id: i64,
        #[arg(required = true)]
        tags: Vec<String>,
        #[arg(long)]
        remove: bool,
    },
    /// Change the template of items
    Template {
        template: String,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Rename the project
    Rename { name: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(home) = &cli.home {
        config.home = home.clone();
    }
    if let Some(level) = &cli.log {
        config.log_level = level.clone();
    }
    logging::init(&config.log_level);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "photo-archive failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let file = config.project_path(&cli.project);

    if let Cmd::Init { name } = &cli.command {
        let name = name.clone().unwrap_or_else(|| {
            file.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled".to_string())
        });
        Store::create(&file, name).await?.close().await?;
        println!("Created {}", file.display());
        return Ok(());
    }

    let host = Host::headless();
    let coordinator = Coordinator::spawn(host.clone());
    let mut events = coordinator.subscribe();
    coordinator.open(&file)?;
    let session = opened(&mut events).await?;

    let interpreter = Interpreter::new(
        Arc::new(Registry::standard()?),
        session.clone(),
        host,
        Arc::new(config),
    );

    let result = execute(&interpreter, &mut events, cli.command).await;
    coordinator.shutdown().await?;
    result
}

/// Wait for the coordinator to report the project open.
async fn opened(events: &mut broadcast::Receiver<ProjectEvent>) -> Result<Session> {
    loop {
        match events.recv().await {
            Ok(ProjectEvent::Opened(session)) => return Ok(session),
            Ok(ProjectEvent::Closed { .. }) | Err(_) => return Err(ArchiveError::ProjectClosed),
            Ok(ProjectEvent::Saved { .. } | ProjectEvent::SaveFailed { .. }) => continue,
        }
    }
}

async fn execute(
    interpreter: &Interpreter,
    events: &mut broadcast::Receiver<ProjectEvent>,
    command: Cmd,
) -> Result<()> {
    let action = match command {
        Cmd::Init { .. } => return Ok(()),
        Cmd::List { deleted } => {
            list(interpreter.session(), deleted);
            return Ok(());
        }
        Cmd::Rename { name } => {
            interpreter.execute(Action::save_project(name)).await?;
            return saved(events).await;
        }
        Cmd::Import { paths } => Action::import(paths),
        Cmd::Merge { ids } => Action::merge(ids),
        Cmd::Template { template, ids } => Action::change_template(ids, template),
        Cmd::Explode { id, photos } => {
            Action::explode(id, (!photos.is_empty()).then_some(photos))
        }
        Cmd::Tag { id, tags, remove } => {
            let tags = tags.into_iter().map(TagRef::Name).collect();
            let action = if remove {
                Action::remove_tags(vec![id], tags)
            } else {
                Action::add_tags(vec![id], tags)
            };
            action.with_meta(ActionMeta {
                resolve: true,
                ..ActionMeta::default()
            })
        }
    };

    let kind = action.kind;
    match interpreter.execute(action).await? {
        Outcome::Completed(done) => {
            match &done.value {
                Output::Ids(ids) => println!("{:?}: {} item(s) {:?}", kind, ids.len(), ids),
                Output::Item(item) => println!(
                    "{:?}: item {} with photos {:?}",
                    kind, item.id, item.photos
                ),
                Output::Items(items) => {
                    let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
                    println!("{:?}: items {:?}", kind, ids);
                }
                Output::TagWork(work) if work.is_empty() => warn!("no tags changed"),
                other => info!(?other, "done"),
            }
            info!(items = interpreter.session().project().items, "project updated");
        }
        Outcome::Cancelled => println!("Cancelled"),
        Outcome::Forwarded => {}
    }
    Ok(())
}

/// Wait for a forwarded project update to be written.
async fn saved(events: &mut broadcast::Receiver<ProjectEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(ProjectEvent::Saved { name, .. }) => {
                println!("Renamed project to {}", name);
                return Ok(());
            }
            Ok(ProjectEvent::SaveFailed { message, .. }) => {
                return Err(ArchiveError::Collaborator(message))
            }
            Ok(ProjectEvent::Closed { .. }) | Err(_) => return Err(ArchiveError::ProjectClosed),
            Ok(ProjectEvent::Opened(_)) => continue,
        }
    }
}

fn list(session: &Session, deleted: bool) {
    let state = session.snapshot();
    println!("{} ({} items)", state.project.name, state.project.items);

    for item in state.items.values().filter(|item| deleted || !item.deleted) {
        let tags: Vec<&str> = item
            .tags
            .iter()
            .filter_map(|id| state.tags.get(id))
            .map(|tag| tag.name.as_str())
            .collect();
        println!(
            "{:>6}  {} photo(s)  [{}]{}",
            item.id,
            item.photos.len(),
            tags.join(", "),
            if item.deleted { "  (deleted)" } else { "" }
        );
    }
}
