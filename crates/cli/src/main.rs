//! FOSDEM CLI - Command-line access to the local schedule store

mod logging;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use fosdem_core::domain::{tracks_by_day, Event, EventId, Schedule, Track};
use fosdem_core::port::{SystemTimeProvider, TimeProvider};
use fosdem_core::{NotificationHub, StoreConfig};
use fosdem_infra_sqlite::{schema, FavoritesService, PersistenceService, ScheduleService, ServiceState};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::info;

const DEFAULT_DB_PATH: &str = "~/.fosdem/schedule.db";

#[derive(Parser)]
#[command(name = "fosdem")]
#[command(about = "FOSDEM schedule store CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file
    #[arg(long, env = "FOSDEM_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db: String,

    /// Use a throwaway in-memory store instead of the database file
    #[arg(long)]
    memory: bool,

    /// Reader connections for concurrent queries
    #[arg(long, env = "FOSDEM_READER_CONNECTIONS")]
    readers: Option<u32>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the store, apply pending migrations and show its state
    Status,

    /// Replace the stored schedule with a JSON schedule file
    Import {
        /// Path to the schedule JSON (`{"tracks": [...], "events": [...]}`)
        file: PathBuf,
    },

    /// List tracks grouped by day
    Tracks,

    /// List events
    Events {
        /// Only events of this track
        #[arg(short, long)]
        track: Option<String>,

        /// Only these event ids, in this order
        #[arg(long, value_delimiter = ',', conflicts_with = "track")]
        ids: Vec<EventId>,
    },

    /// Search titles, descriptions, tracks and speakers
    Search {
        query: String,
    },

    /// Events running right now (or at --at)
    Live {
        /// RFC 3339 instant, e.g. 2025-02-01T10:15:00Z
        #[arg(long)]
        at: Option<String>,
    },

    /// Manage favorites
    Favorite {
        #[command(subcommand)]
        command: FavoriteCommands,
    },
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Mark a track as favorite
    AddTrack { name: String },
    /// Unmark a favorite track
    RemoveTrack { name: String },
    /// Mark an event as favorite
    AddEvent { id: EventId },
    /// Unmark a favorite event
    RemoveEvent { id: EventId },
    /// List favorite tracks and events
    List,
}

#[derive(Tabled)]
struct TrackLine {
    day: i64,
    track: String,
    #[tabled(rename = "★")]
    favorite: String,
}

#[derive(Tabled)]
struct EventLine {
    id: EventId,
    #[tabled(rename = "date (UTC)")]
    date: String,
    start: String,
    min: i64,
    room: String,
    track: String,
    title: String,
    speakers: String,
}

impl From<&Event> for EventLine {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            date: event.date.format("%a %Y-%m-%d %H:%M").to_string(),
            start: event.start.format("%H:%M").to_string(),
            min: event.duration_minutes,
            room: event.room.clone(),
            track: event.track.clone(),
            title: event.title.clone(),
            speakers: event.formatted_people(),
        }
    }
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::from_env();
        config.db_path = if self.memory {
            None
        } else {
            Some(PathBuf::from(shellexpand::tilde(&self.db).into_owned()))
        };
        if let Some(readers) = self.readers.filter(|n| *n > 0) {
            config.reader_connections = readers;
        }
        config
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    let at = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid RFC 3339 instant: {value}"))?;
    Ok(at.with_timezone(&Utc))
}

fn print_events(events: &[Event]) {
    if events.is_empty() {
        println!("{}", "No events".yellow());
        return;
    }
    let lines: Vec<EventLine> = events.iter().map(EventLine::from).collect();
    println!("{}", Table::new(lines));
}

fn print_tracks(tracks: &[Track], favorites: &HashSet<String>) {
    if tracks.is_empty() {
        println!("{}", "No tracks; run `fosdem import <file>` first".yellow());
        return;
    }
    let lines: Vec<TrackLine> = tracks_by_day(tracks)
        .into_iter()
        .flatten()
        .map(|track| TrackLine {
            day: track.day,
            favorite: if favorites.contains(&track.name) { "★".to_string() } else { String::new() },
            track: track.name,
        })
        .collect();
    println!("{}", Table::new(lines));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let config = cli.store_config();
    if let Some(path) = &config.db_path {
        ensure_parent_dir(path)?;
    }

    let registry = schema::migrations().context("Invalid migration registry")?;
    let persistence = Arc::new(PersistenceService::open(&config, &registry).await);
    info!(state = %persistence.state(), "Store opened");

    if let Some(err) = persistence.open_error() {
        println!("  {} {}", "Status:".bold(), ServiceState::Failed.to_string().red());
        println!("  {} {}", "Error:".bold(), err);
        bail!("Cannot open schedule store");
    }

    let hub = NotificationHub::new();
    let schedule = ScheduleService::new(persistence.clone(), hub.clone());
    let favorites = FavoritesService::new(persistence.clone(), hub, Arc::new(SystemTimeProvider));

    let outcome = run(cli.command, &persistence, &schedule, &favorites).await;
    persistence.close().await;
    outcome
}

async fn run(
    command: Commands,
    persistence: &PersistenceService,
    schedule: &ScheduleService,
    favorites: &FavoritesService,
) -> Result<()> {
    match command {
        Commands::Status => {
            let report = persistence.migration_report();
            println!("{}", "Schedule Store".cyan().bold());
            println!();
            println!("  {} {}", "Status:".bold(), persistence.state().to_string().green());
            println!("  {} {}", "Schema version:".bold(), report.current_version);
            if report.applied.is_empty() {
                println!("  {} none (up to date)", "Applied now:".bold());
            } else {
                let applied: Vec<String> = report.applied.iter().map(|v| format!("{v:03}")).collect();
                println!("  {} {}", "Applied now:".bold(), applied.join(", "));
            }
            println!("  {} {}", "Tracks:".bold(), schedule.tracks().await?.len());
            println!("  {} {}", "Favorite tracks:".bold(), favorites.track_names().await?.len());
            println!("  {} {}", "Favorite events:".bold(), favorites.event_ids().await?.len());
        }

        Commands::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let feed: Schedule = serde_json::from_str(&raw).context("Invalid schedule JSON")?;

            let summary = schedule.import(feed).await?;
            println!("{}", "✓ Schedule imported".green().bold());
            println!("  {} tracks, {} events", summary.tracks, summary.events);
        }

        Commands::Tracks => {
            let tracks = schedule.tracks().await?;
            let starred: HashSet<String> = favorites.track_names().await?.into_iter().collect();
            print_tracks(&tracks, &starred);
        }

        Commands::Events { track, ids } => {
            let events = match track {
                Some(track) => schedule.events_for_track(track).await?,
                None if !ids.is_empty() => schedule.events(ids).await?,
                None => bail!("Pass --track <NAME> or --ids <ID,...>"),
            };
            print_events(&events);
        }

        Commands::Search { query } => {
            if query.trim().chars().count() < fosdem_infra_sqlite::operations::MIN_SEARCH_LENGTH {
                println!(
                    "{}",
                    format!(
                        "Queries need at least {} characters",
                        fosdem_infra_sqlite::operations::MIN_SEARCH_LENGTH
                    )
                    .yellow()
                );
                return Ok(());
            }
            print_events(&schedule.search(query).await?);
        }

        Commands::Live { at } => {
            let at = match at {
                Some(value) => parse_instant(&value)?,
                None => SystemTimeProvider.now(),
            };
            println!("{}", format!("Live at {}", at.format("%Y-%m-%d %H:%M UTC")).cyan().bold());
            print_events(&schedule.live_at(at).await?);
        }

        Commands::Favorite { command } => match command {
            FavoriteCommands::AddTrack { name } => {
                favorites.add_track(name.clone()).await?;
                println!("{}", format!("✓ Track {name} added to favorites").green().bold());
            }
            FavoriteCommands::RemoveTrack { name } => {
                favorites.remove_track(name.clone()).await?;
                println!("{}", format!("✓ Track {name} removed from favorites").green().bold());
            }
            FavoriteCommands::AddEvent { id } => {
                favorites.add_event(id).await?;
                println!("{}", format!("✓ Event {id} added to favorites").green().bold());
            }
            FavoriteCommands::RemoveEvent { id } => {
                favorites.remove_event(id).await?;
                println!("{}", format!("✓ Event {id} removed from favorites").green().bold());
            }
            FavoriteCommands::List => {
                println!("{}", "Favorite tracks".cyan().bold());
                for name in favorites.track_names().await? {
                    println!("  ★ {name}");
                }
                println!();
                println!("{}", "Favorite events".cyan().bold());
                print_events(&favorites.events().await?);
            }
        },
    }

    Ok(())
}
