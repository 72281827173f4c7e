//! otmdb-admin library - moderator console
//!
//! Command-line access to a catalogue database: initialize it, inspect tags,
//! videos and registration requests, moderate pending requests, and print
//! the registration timeline.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use otmdb_common::config::{resolve_root_folder, RootFolder, TomlConfig, ROOT_FOLDER_ENV};
use otmdb_common::db::{get_schema_version, init_database};
use otmdb_common::pagination::{ConnectionArgs, SortOrder};
use otmdb_core::registration::SourceAdapter;
use otmdb_core::timeline::{TimelineEntry, TimelineWindow};
use otmdb_core::{OperationError, Otmdb, UserId, VideoSourceKind};
use tracing::info;
use uuid::Uuid;

pub mod logging;
mod render;

/// Moderator console for the OTMDB catalogue
#[derive(Parser, Debug)]
#[command(name = "otmdb-admin")]
#[command(about = "Moderator console for the OTMDB catalogue")]
#[command(version)]
pub struct Cli {
    /// Root folder holding the database
    #[arg(short, long, global = true)]
    pub root_folder: Option<String>,

    /// Acting user for moderation commands
    #[arg(short, long, global = true, env = "OTMDB_USER")]
    pub user: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or upgrade the database
    Init,

    /// Inspect a tag
    Tag {
        id: Uuid,
        /// Number of recent events to show
        #[arg(long, default_value = "10")]
        events: u32,
    },

    /// Inspect a video
    Video { id: Uuid },

    /// Registration requests
    #[command(subcommand)]
    Requests(RequestsCommand),

    /// Accept a pending registration request
    Accept {
        id: Uuid,
        #[arg(long)]
        note: Option<String>,
    },

    /// Reject a pending registration request
    Reject {
        id: Uuid,
        #[arg(long)]
        note: Option<String>,
    },

    /// Print registration activity, newest first
    Timeline {
        /// Only entries from the last N hours
        #[arg(long)]
        hours: Option<i64>,
        #[arg(long, default_value = "20")]
        limit: u32,
        /// Resume after this cursor
        #[arg(long, conflicts_with = "all")]
        after: Option<String>,
        /// Print the whole window
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum RequestsCommand {
    /// List pending requests of one source
    Pending {
        #[arg(long, default_value = "NICOVIDEO", value_parser = parse_source)]
        source: VideoSourceKind,
        #[arg(long, default_value = "20")]
        limit: u32,
        #[arg(long)]
        after: Option<String>,
    },

    /// Show one request with its intents and disposition
    Show { id: Uuid },
}

fn parse_source(raw: &str) -> std::result::Result<VideoSourceKind, String> {
    raw.parse().map_err(|e: otmdb_common::Error| e.to_string())
}

/// Turn an operation error into a console error
///
/// Internal failures were already logged with their cause; only the code
/// is shown.
fn operation_failed<E: OperationError>(e: E) -> anyhow::Error {
    if e.is_internal() {
        anyhow!("{}", e.code())
    } else {
        anyhow!("{}: {}", e.code(), e)
    }
}

impl Cli {
    /// Resolve the database path: CLI, then env, then TOML, then OS default
    pub fn database_path(&self, config: &TomlConfig) -> Result<PathBuf> {
        let root = resolve_root_folder(self.root_folder.as_deref(), ROOT_FOLDER_ENV, Some(config));
        let root = RootFolder::new(root, config.database_file());
        root.ensure_directory_exists()
            .with_context(|| format!("Failed to create root folder {}", root.path().display()))?;
        Ok(root.database_path())
    }

    fn actor(&self) -> Result<UserId> {
        let raw = self
            .user
            .as_deref()
            .ok_or_else(|| anyhow!("--user (or OTMDB_USER) is required for this command"))?;
        Ok(UserId::new(raw)?)
    }
}

/// Execute one console command, writing its output to `out`
pub async fn run(cli: &Cli, config: &TomlConfig, out: &mut dyn Write) -> Result<()> {
    let db_path = cli.database_path(config)?;
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    if let Command::Init = cli.command {
        let version = get_schema_version(&pool).await?;
        info!(path = %db_path.display(), version = version, "Database ready");
        writeln!(out, "database: {}", db_path.display())?;
        writeln!(out, "schema version: {version}")?;
        return Ok(());
    }

    let otmdb = Otmdb::open(pool).await.context("Failed to load runtime settings")?;

    match &cli.command {
        Command::Init => {}

        Command::Tag { id, events } => {
            let tag = otmdb
                .get_tag(*id)
                .await
                .map_err(operation_failed)?
                .ok_or_else(|| anyhow!("tag {id} not found"))?;
            let tag_type = otmdb.tag_type(*id).await.map_err(operation_failed)?;
            let explicit = otmdb.tags().explicit_parent_of(*id).await?;
            let history = otmdb.tag_events(*id, Some(*events), 0).await.map_err(operation_failed)?;
            if cli.json {
                render::json(
                    out,
                    &serde_json::json!({
                        "tag": tag,
                        "type": tag_type,
                        "explicit_parent": explicit,
                        "events": history,
                    }),
                )?;
            } else {
                render::tag(out, &tag, &tag_type, explicit.as_ref(), &history)?;
            }
        }

        Command::Video { id } => {
            let detail = otmdb
                .get_video(*id)
                .await
                .map_err(operation_failed)?
                .ok_or_else(|| anyhow!("video {id} not found"))?;
            if cli.json {
                render::json(out, &detail)?;
            } else {
                render::video(out, &detail)?;
            }
        }

        Command::Requests(RequestsCommand::Pending { source, limit, after }) => {
            let mut args = ConnectionArgs::first(*limit);
            args.after = after.clone();
            let page = otmdb
                .find_registration_requests(*source, Some(false), SortOrder::Asc, &args)
                .await
                .map_err(operation_failed)?;
            if cli.json {
                render::json(out, &page)?;
            } else {
                render::pending(out, &page)?;
            }
        }

        Command::Requests(RequestsCommand::Show { id }) => {
            let detail = otmdb
                .get_registration_request(*id)
                .await
                .map_err(operation_failed)?
                .ok_or_else(|| anyhow!("registration request {id} not found"))?;
            if cli.json {
                render::json(out, &detail)?;
            } else {
                let url = watch_url(&otmdb, detail.request.source, &detail.request.source_id);
                render::request(out, &detail, &url)?;
            }
        }

        Command::Accept { id, note } => {
            let actor = cli.actor()?;
            let source = request_source(&otmdb, *id).await?;
            let accepted = otmdb
                .accept_registration(source, *id, note.as_deref(), &actor)
                .await
                .map_err(operation_failed)?;
            if cli.json {
                render::json(out, &accepted)?;
            } else {
                writeln!(
                    out,
                    "accepted {} as video {} ({} tags, {} semitags)",
                    id,
                    accepted.video.id,
                    accepted.video_tags.len(),
                    accepted.semitags.len()
                )?;
            }
        }

        Command::Reject { id, note } => {
            let actor = cli.actor()?;
            let source = request_source(&otmdb, *id).await?;
            let rejected = otmdb
                .reject_registration(source, *id, note.as_deref(), &actor)
                .await
                .map_err(operation_failed)?;
            if cli.json {
                render::json(out, &rejected)?;
            } else {
                writeln!(out, "rejected {id}")?;
            }
        }

        Command::Timeline {
            hours,
            limit,
            after,
            all,
        } => {
            let window = match hours {
                Some(h) if *h <= 0 => bail!("--hours must be positive"),
                Some(h) => {
                    let since = chrono::Duration::try_hours(*h)
                        .and_then(|span| chrono::Utc::now().checked_sub_signed(span))
                        .ok_or_else(|| anyhow!("--hours {h} is too large"))?;
                    TimelineWindow {
                        since: Some(since),
                        until: None,
                    }
                }
                None => TimelineWindow::default(),
            };

            if *all {
                let mut stream = Box::pin(otmdb.timeline_stream(window, None));
                let mut entries: Vec<TimelineEntry> = Vec::new();
                while let Some(entry) = stream.next().await {
                    entries.push(entry?);
                }
                if cli.json {
                    render::json(out, &entries)?;
                } else {
                    render::timeline(out, &entries, None)?;
                }
            } else {
                let page = otmdb
                    .timeline(window, after.as_deref(), *limit)
                    .await
                    .map_err(operation_failed)?;
                if cli.json {
                    render::json(out, &page)?;
                } else {
                    render::timeline(out, &page.entries, page.next_cursor.as_deref())?;
                }
            }
        }
    }

    Ok(())
}

async fn request_source(otmdb: &Otmdb, id: Uuid) -> Result<VideoSourceKind> {
    let detail = otmdb
        .get_registration_request(id)
        .await
        .map_err(operation_failed)?
        .ok_or_else(|| anyhow!("registration request {id} not found"))?;
    Ok(detail.request.source)
}

fn watch_url(otmdb: &Otmdb, source: VideoSourceKind, source_id: &str) -> String {
    match source {
        VideoSourceKind::Nicovideo => otmdb.nicovideo().adapter().watch_url(source_id),
        VideoSourceKind::Youtube => otmdb.youtube().adapter().watch_url(source_id),
        VideoSourceKind::Soundcloud => otmdb.soundcloud().adapter().watch_url(source_id),
        VideoSourceKind::Bilibili => otmdb.bilibili().adapter().watch_url(source_id),
    }
}
