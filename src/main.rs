//! # pawtrack CLI (`paw`)
//!
//! The `paw` binary manages pets and their care records locally and pushes
//! queued changes to the remote record service.
//!
//! ## Usage
//!
//! ```bash
//! paw --config ./config/paw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `paw init` | Create the SQLite database and run schema migrations |
//! | `paw pet add\|list\|update\|rm` | Manage pets |
//! | `paw event add\|list\|rm` | Manage events |
//! | `paw contact add\|list\|rm` | Manage contacts |
//! | `paw care add\|list\|rm` | Manage care items |
//! | `paw event-type add\|list` | Manage event types |
//! | `paw toggle <pet> <care-item> [date]` | Mark or unmark a care item for a day |
//! | `paw sync` | Drain the queue once |
//! | `paw watch` | Drain periodically until Ctrl-C |
//! | `paw status` | Pending and failed operation counts |
//! | `paw queue` | List queued operations |
//! | `paw retry` | Re-arm operations that stopped retrying |
//!
//! ## Examples
//!
//! ```bash
//! paw pet add "Fido" --species dog --config ./config/paw.toml
//! paw care add "Heartworm pill" --pet <pet-id>
//! paw toggle <pet-id> <care-id> 2024-03-05
//! paw sync
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::{Map, Value};

use pawtrack::config::{self, Config};
use pawtrack::engine::SyncEngine;
use pawtrack::models::{CareItem, Contact, Event, EventStatus, EventType, Pet, Record};
use pawtrack::queue::SyncQueue;
use pawtrack::services::ToggleOutcome;
use pawtrack::{logging, migrate, status};

/// pawtrack: a local-first pet care tracker.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/paw.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "paw",
    about = "pawtrack — a local-first pet care tracker with offline sync",
    version,
    long_about = "pawtrack stores pets, events, contacts, care items and daily tracking stamps \
    in a local SQLite database. Every change is queued and pushed to the remote record service \
    by `paw sync`, so the tool works the same with or without a network."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/paw.toml")]
    config: PathBuf,

    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage pets.
    Pet {
        #[command(subcommand)]
        action: PetAction,
    },

    /// Manage events (vet visits, walks, grooming…).
    Event {
        #[command(subcommand)]
        action: EventAction,
    },

    /// Manage contacts (vets, sitters, groomers).
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },

    /// Manage recurring care items.
    Care {
        #[command(subcommand)]
        action: CareAction,
    },

    /// Manage event categories.
    EventType {
        #[command(subcommand)]
        action: EventTypeAction,
    },

    /// Mark a care item done for a pet on a day, or unmark it if already
    /// marked.
    Toggle {
        pet_id: String,
        care_item_id: String,
        /// Day (YYYY-MM-DD). Defaults to today.
        date: Option<NaiveDate>,
    },

    /// Push queued changes to the remote service once.
    Sync,

    /// Push queued changes periodically until interrupted.
    ///
    /// Uses `[sync].interval_secs` from the configuration.
    Watch,

    /// Show local record counts and queue state.
    Status,

    /// List queued operations in the order they will be applied.
    Queue,

    /// Re-arm operations that stopped retrying after repeated failures.
    Retry,

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum PetAction {
    Add {
        name: String,
        #[command(flatten)]
        fields: PetFields,
    },
    List,
    /// Change fields of an existing pet. Only given flags are changed.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        fields: PetFields,
    },
    Rm {
        id: String,
    },
}

#[derive(clap::Args)]
struct PetFields {
    #[arg(long)]
    species: Option<String>,
    #[arg(long)]
    breed: Option<String>,
    /// Birth date (YYYY-MM-DD).
    #[arg(long)]
    birth_date: Option<NaiveDate>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum EventAction {
    Add {
        title: String,
        /// Pet id; repeat for several pets.
        #[arg(long = "pet")]
        pet_ids: Vec<String>,
        #[arg(long = "type")]
        event_type_id: Option<String>,
        #[arg(long = "care-item")]
        care_item_id: Option<String>,
        /// scheduled, completed or cancelled.
        #[arg(long, default_value = "scheduled")]
        status: EventStatus,
        /// Start time (RFC 3339, e.g. 2024-03-05T09:30:00Z).
        #[arg(long = "at")]
        starts_at: Option<DateTime<Utc>>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    List {
        /// Only events involving this pet.
        #[arg(long)]
        pet: Option<String>,
    },
    Rm {
        id: String,
    },
}

#[derive(Subcommand)]
enum ContactAction {
    Add {
        name: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long = "pet")]
        pet_ids: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    List {
        #[arg(long)]
        pet: Option<String>,
    },
    Rm {
        id: String,
    },
}

#[derive(Subcommand)]
enum CareAction {
    Add {
        name: String,
        #[arg(long = "pet")]
        pet_ids: Vec<String>,
        /// Free text, e.g. "daily" or "monthly".
        #[arg(long)]
        frequency: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    List,
    Rm {
        id: String,
    },
}

#[derive(Subcommand)]
enum EventTypeAction {
    Add {
        name: String,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    List,
}

impl PetFields {
    /// Only the flags that were given, as a patch object.
    fn into_patch(self, name: Option<String>) -> Value {
        let mut patch = Map::new();
        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                patch.insert(key.to_string(), value);
            }
        };
        set("name", name.map(Value::String));
        set("species", self.species.map(Value::String));
        set("breed", self.breed.map(Value::String));
        set("birth_date", self.birth_date.map(|d| Value::String(d.to_string())));
        set("color", self.color.map(Value::String));
        set("notes", self.notes.map(Value::String));
        Value::Object(patch)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "paw", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = SyncEngine::open(&cfg)
        .await
        .with_context(|| format!("Failed to open database {}", cfg.db.path.display()))?;

    match cli.command {
        Commands::Init | Commands::Completions { .. } => {
            // Handled above
        }
        Commands::Pet { action } => run_pet(&engine, action).await?,
        Commands::Event { action } => run_event(&engine, action).await?,
        Commands::Contact { action } => run_contact(&engine, action).await?,
        Commands::Care { action } => run_care(&engine, action).await?,
        Commands::EventType { action } => run_event_type(&engine, action).await?,
        Commands::Toggle {
            pet_id,
            care_item_id,
            date,
        } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            match engine.stamps.toggle(&pet_id, &care_item_id, date).await? {
                ToggleOutcome::Created(stamp) => println!("Marked {} ({})", date, stamp.id()),
                ToggleOutcome::Removed => println!("Unmarked {}", date),
            }
        }
        Commands::Sync => run_sync(&engine).await?,
        Commands::Watch => run_watch(&engine, &cfg).await?,
        Commands::Status => status::run_status(&engine, &cfg.db.path).await?,
        Commands::Queue => status::run_queue(&engine).await?,
        Commands::Retry => {
            let rearmed = engine.queue.retry_failed().await?;
            println!("Re-armed {} operation(s).", rearmed);
        }
    }

    Ok(())
}

async fn run_pet(engine: &SyncEngine, action: PetAction) -> Result<()> {
    match action {
        PetAction::Add { name, fields } => {
            let pet = engine
                .pets
                .create(Pet {
                    name,
                    species: fields.species,
                    breed: fields.breed,
                    birth_date: fields.birth_date,
                    color: fields.color,
                    notes: fields.notes,
                })
                .await?;
            println!("Added pet {} ({})", pet.name, pet.id());
        }
        PetAction::List => {
            for pet in engine.pets.get_all().await? {
                println!(
                    "{}  {:<20} {:<10} {}",
                    pet.id(),
                    pet.name,
                    pet.species.as_deref().unwrap_or("-"),
                    sync_marker(&pet)
                );
            }
        }
        PetAction::Update { id, name, fields } => {
            let pet = engine.pets.update(&id, fields.into_patch(name)).await?;
            println!("Updated pet {} ({})", pet.name, pet.id());
        }
        PetAction::Rm { id } => report_removed(engine.pets.delete(&id).await?, "pet", &id),
    }
    Ok(())
}

async fn run_event(engine: &SyncEngine, action: EventAction) -> Result<()> {
    match action {
        EventAction::Add {
            title,
            pet_ids,
            event_type_id,
            care_item_id,
            status,
            starts_at,
            tags,
            notes,
        } => {
            let event = engine
                .events
                .create(Event {
                    title,
                    pet_ids,
                    event_type_id,
                    care_item_id,
                    status,
                    starts_at,
                    tags,
                    notes,
                })
                .await?;
            println!("Added event {} ({})", event.title, event.id());
        }
        EventAction::List { pet } => {
            let events = match pet {
                Some(pet_id) => engine.events.for_pet(&pet_id).await?,
                None => engine.events.get_all().await?,
            };
            for event in events {
                let when = event
                    .starts_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<16} {:<24} {:?}  {}",
                    event.id(),
                    when,
                    event.title,
                    event.status,
                    sync_marker(&event)
                );
            }
        }
        EventAction::Rm { id } => report_removed(engine.events.delete(&id).await?, "event", &id),
    }
    Ok(())
}

async fn run_contact(engine: &SyncEngine, action: ContactAction) -> Result<()> {
    match action {
        ContactAction::Add {
            name,
            role,
            phone,
            email,
            pet_ids,
            notes,
        } => {
            let contact = engine
                .contacts
                .create(Contact {
                    name,
                    role,
                    phone,
                    email,
                    pet_ids,
                    notes,
                })
                .await?;
            println!("Added contact {} ({})", contact.name, contact.id());
        }
        ContactAction::List { pet } => {
            let contacts = match pet {
                Some(pet_id) => engine.contacts.for_pet(&pet_id).await?,
                None => engine.contacts.get_all().await?,
            };
            for contact in contacts {
                println!(
                    "{}  {:<20} {:<12} {}",
                    contact.id(),
                    contact.name,
                    contact.role.as_deref().unwrap_or("-"),
                    sync_marker(&contact)
                );
            }
        }
        ContactAction::Rm { id } => {
            report_removed(engine.contacts.delete(&id).await?, "contact", &id)
        }
    }
    Ok(())
}

async fn run_care(engine: &SyncEngine, action: CareAction) -> Result<()> {
    match action {
        CareAction::Add {
            name,
            pet_ids,
            frequency,
            notes,
        } => {
            let item = engine
                .care_items
                .create(CareItem {
                    name,
                    pet_ids,
                    frequency,
                    notes,
                })
                .await?;
            println!("Added care item {} ({})", item.name, item.id());
        }
        CareAction::List => {
            for item in engine.care_items.get_all().await? {
                println!(
                    "{}  {:<24} {:<10} {}",
                    item.id(),
                    item.name,
                    item.frequency.as_deref().unwrap_or("-"),
                    sync_marker(&item)
                );
            }
        }
        CareAction::Rm { id } => {
            report_removed(engine.care_items.delete(&id).await?, "care item", &id)
        }
    }
    Ok(())
}

async fn run_event_type(engine: &SyncEngine, action: EventTypeAction) -> Result<()> {
    match action {
        EventTypeAction::Add { name, icon, color } => {
            let event_type = engine
                .event_types
                .create(EventType { name, icon, color })
                .await?;
            println!("Added event type {} ({})", event_type.name, event_type.id());
        }
        EventTypeAction::List => {
            for event_type in engine.event_types.get_all().await? {
                println!(
                    "{}  {} {}  {}",
                    event_type.id(),
                    event_type.icon.as_deref().unwrap_or(" "),
                    event_type.name,
                    sync_marker(&event_type)
                );
            }
        }
    }
    Ok(())
}

async fn run_sync(engine: &SyncEngine) -> Result<()> {
    let report = engine.processor.drain().await?;
    println!(
        "Sync complete: {} applied, {} failed, {} skipped",
        report.applied, report.failed, report.skipped
    );
    if report.dead_lettered > 0 {
        println!(
            "{} operation(s) stopped retrying; see `paw queue`.",
            report.dead_lettered
        );
    }
    Ok(())
}

async fn run_watch(engine: &SyncEngine, cfg: &Config) -> Result<()> {
    let trigger = engine.trigger();
    let cancel = trigger.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    println!(
        "Syncing every {}s. Press Ctrl-C to stop.",
        cfg.sync.interval_secs
    );
    trigger.run().await;
    println!("Stopped. {} operation(s) pending.", engine.pending_count().await?);
    Ok(())
}

fn sync_marker<T>(record: &Record<T>) -> &'static str {
    if record.meta.synced {
        "synced"
    } else {
        "pending"
    }
}

fn report_removed(removed: bool, what: &str, id: &str) {
    if removed {
        println!("Removed {} {}", what, id);
    } else {
        println!("No {} with id {}", what, id);
    }
}
