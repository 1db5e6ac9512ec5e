use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use homeboard_api::{BookmarkManager, JournalManager, Manager, TaskManager};
use homeboard_core::{
    BookmarkPatch, BookmarkPayload, DayKey, EntityPayload, JournalPatch, JournalPayload,
    MutationOutcome, Record, RecordId, Selector, TaskPatch, TaskPayload, TimeOfDay,
};
use homeboard_gateway::Gateway;
use serde_json::Value;
use time::OffsetDateTime;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "hb")]
#[command(about = "Homeboard CLI")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    #[arg(long, default_value = "./cache")]
    cache: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    Bookmark {
        #[command(subcommand)]
        command: BookmarkCommand,
    },
    Journal {
        #[command(subcommand)]
        command: JournalCommand,
    },
}

#[derive(Debug, Subcommand)]
enum TaskCommand {
    Add(TaskAddArgs),
    List(TaskListArgs),
    Done(TaskRefArgs),
    Edit(TaskEditArgs),
    Remove(TaskRefArgs),
}

#[derive(Debug, Args)]
struct TaskAddArgs {
    #[arg(long)]
    text: String,
    /// Day bucket, `YYYY-MM-DD`; defaults to today.
    #[arg(long)]
    day: Option<String>,
}

#[derive(Debug, Args)]
struct TaskListArgs {
    #[arg(long)]
    day: Option<String>,
    #[arg(long)]
    search: Option<String>,
}

#[derive(Debug, Args)]
struct TaskRefArgs {
    #[arg(long)]
    day: String,
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct TaskEditArgs {
    #[arg(long)]
    day: String,
    #[arg(long)]
    id: String,
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    completed: Option<bool>,
}

#[derive(Debug, Subcommand)]
enum BookmarkCommand {
    Add(BookmarkAddArgs),
    List(BookmarkListArgs),
    Edit(BookmarkEditArgs),
    Remove(BookmarkRemoveArgs),
}

#[derive(Debug, Args)]
struct BookmarkAddArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    url: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    desc: Option<String>,
}

#[derive(Debug, Args)]
struct BookmarkListArgs {
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    search: Option<String>,
}

#[derive(Debug, Args)]
struct BookmarkEditArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    desc: Option<String>,
}

#[derive(Debug, Args)]
struct BookmarkRemoveArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Subcommand)]
enum JournalCommand {
    Add(JournalAddArgs),
    List(JournalListArgs),
    Edit(JournalEditArgs),
    Remove(JournalRefArgs),
}

#[derive(Debug, Args)]
struct JournalAddArgs {
    #[arg(long)]
    content: String,
    /// Day bucket, `YYYY-MM-DD`; defaults to today.
    #[arg(long)]
    day: Option<String>,
    /// Time of day, `HH:MM`; defaults to now.
    #[arg(long)]
    time: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Debug, Args)]
struct JournalListArgs {
    #[arg(long)]
    tag: Option<String>,
    #[arg(long)]
    search: Option<String>,
}

#[derive(Debug, Args)]
struct JournalEditArgs {
    #[arg(long)]
    id: String,
    /// Target day; a day different from the record's current bucket moves the
    /// entry there (the moved record gets a fresh id).
    #[arg(long)]
    day: Option<String>,
    #[arg(long)]
    content: Option<String>,
    /// Replacement tag set; repeat to give several.
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    time: Option<String>,
    #[arg(long, default_value_t = false)]
    clear_time: bool,
}

#[derive(Debug, Args)]
struct JournalRefArgs {
    #[arg(long)]
    day: String,
    #[arg(long)]
    id: String,
}

struct Connection {
    server: String,
    cache: PathBuf,
}

impl Connection {
    fn manager<P: EntityPayload>(&self) -> Result<Manager<P>> {
        let gateway = Gateway::over_http(&self.server, &self.cache)?;
        let mut manager = Manager::new(gateway);
        manager.load();
        Ok(manager)
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let connection = Connection { server: cli.server, cache: cli.cache };
    match cli.command {
        Command::Task { command } => run_task(&connection, command),
        Command::Bookmark { command } => run_bookmark(&connection, command),
        Command::Journal { command } => run_journal(&connection, command),
    }
}

fn parse_day(value: &str) -> Result<DayKey> {
    value.parse().with_context(|| format!("invalid day key: {value}"))
}

fn parse_time(value: &str) -> Result<TimeOfDay> {
    value.parse().with_context(|| format!("invalid time of day: {value}"))
}

fn parse_id(value: &str) -> Result<RecordId> {
    value.parse().with_context(|| format!("invalid record id: {value}"))
}

fn today() -> DayKey {
    DayKey(OffsetDateTime::now_utc().date())
}

fn now_time() -> TimeOfDay {
    TimeOfDay(OffsetDateTime::now_utc().time())
}

fn run_task(connection: &Connection, command: TaskCommand) -> Result<()> {
    let mut manager: TaskManager = connection.manager()?;
    match command {
        TaskCommand::Add(args) => {
            let day = match args.day.as_deref() {
                Some(raw) => parse_day(raw)?,
                None => today(),
            };
            let payload = TaskPayload { text: args.text, completed: false };
            let record = manager.create(Some(day), payload)?;
            emit_json(serde_json::json!({
                "day": day.to_string(),
                "record": serde_json::to_value(&record)?,
                "durability": manager.last_save(),
            }))
        }
        TaskCommand::List(args) => {
            if let Some(search) = args.search.as_deref() {
                manager.set_query(search);
            }
            let buckets: Vec<_> = match args.day.as_deref() {
                Some(raw) => {
                    let day = parse_day(raw)?;
                    manager.view().buckets.iter().filter(|bucket| bucket.day == Some(day)).collect()
                }
                None => manager.view().buckets.iter().collect(),
            };
            emit_json(serde_json::json!({
                "source": manager.load_source(),
                "buckets": serde_json::to_value(&buckets)?,
            }))
        }
        TaskCommand::Done(args) => {
            let outcome = manager.toggle(parse_day(&args.day)?, parse_id(&args.id)?)?;
            emit_mutation(&manager, outcome)
        }
        TaskCommand::Edit(args) => {
            let patch = TaskPatch { text: args.text, completed: args.completed };
            let outcome = manager.update(Some(parse_day(&args.day)?), parse_id(&args.id)?, patch)?;
            emit_mutation(&manager, outcome)
        }
        TaskCommand::Remove(args) => {
            let outcome = manager.delete(Some(parse_day(&args.day)?), parse_id(&args.id)?)?;
            emit_mutation(&manager, outcome)
        }
    }
}

fn run_bookmark(connection: &Connection, command: BookmarkCommand) -> Result<()> {
    let mut manager: BookmarkManager = connection.manager()?;
    match command {
        BookmarkCommand::Add(args) => {
            let payload = BookmarkPayload {
                title: args.title,
                url: args.url,
                category: args.category,
                desc: args.desc.unwrap_or_default(),
            };
            let record = manager.create(None, payload)?;
            emit_json(serde_json::json!({
                "record": serde_json::to_value(&record)?,
                "durability": manager.last_save(),
            }))
        }
        BookmarkCommand::List(args) => {
            if let Some(category) = args.category {
                manager.set_selector(Selector::Category(category));
            }
            if let Some(search) = args.search.as_deref() {
                manager.set_query(search);
            }
            let bookmarks: &[Record<BookmarkPayload>] = manager
                .view()
                .buckets
                .first()
                .map_or(&[], |bucket| bucket.records.as_slice());
            emit_json(serde_json::json!({
                "source": manager.load_source(),
                "bookmarks": serde_json::to_value(bookmarks)?,
            }))
        }
        BookmarkCommand::Edit(args) => {
            let patch = BookmarkPatch {
                title: args.title,
                url: args.url,
                category: args.category,
                desc: args.desc,
            };
            let outcome = manager.update(None, parse_id(&args.id)?, patch)?;
            emit_mutation(&manager, outcome)
        }
        BookmarkCommand::Remove(args) => {
            let outcome = manager.delete(None, parse_id(&args.id)?)?;
            emit_mutation(&manager, outcome)
        }
    }
}

fn run_journal(connection: &Connection, command: JournalCommand) -> Result<()> {
    let mut manager: JournalManager = connection.manager()?;
    match command {
        JournalCommand::Add(args) => {
            let day = match args.day.as_deref() {
                Some(raw) => parse_day(raw)?,
                None => today(),
            };
            let time = match args.time.as_deref() {
                Some(raw) => parse_time(raw)?,
                None => now_time(),
            };
            let payload =
                JournalPayload { content: args.content, tags: args.tags, time: Some(time) };
            let record = manager.create(Some(day), payload)?;
            emit_json(serde_json::json!({
                "day": day.to_string(),
                "record": serde_json::to_value(&record)?,
                "durability": manager.last_save(),
            }))
        }
        JournalCommand::List(args) => {
            if let Some(tag) = args.tag {
                manager.set_selector(Selector::Category(tag));
            }
            if let Some(search) = args.search.as_deref() {
                manager.set_query(search);
            }
            emit_json(serde_json::json!({
                "source": manager.load_source(),
                "months": month_grouped(&manager)?,
            }))
        }
        JournalCommand::Edit(args) => run_journal_edit(&mut manager, args),
        JournalCommand::Remove(args) => {
            let outcome = manager.delete(Some(parse_day(&args.day)?), parse_id(&args.id)?)?;
            emit_mutation(&manager, outcome)
        }
    }
}

fn run_journal_edit(manager: &mut JournalManager, args: JournalEditArgs) -> Result<()> {
    let id = parse_id(&args.id)?;
    let Some(current_day) = manager.collection().day_of(id) else {
        return emit_json(serde_json::json!({ "outcome": MutationOutcome::NotFound }));
    };

    let time = if args.clear_time {
        Some(None)
    } else {
        match args.time.as_deref() {
            Some(raw) => Some(Some(parse_time(raw)?)),
            None => None,
        }
    };
    let tags = if args.tags.is_empty() { None } else { Some(args.tags) };
    let patch = JournalPatch { content: args.content, tags, time };
    let outcome = manager.update(Some(current_day), id, patch)?;

    if let Some(raw) = args.day.as_deref() {
        let target = parse_day(raw)?;
        if target != current_day && outcome.applied() {
            let payload = manager
                .collection()
                .get(Some(current_day), id)
                .map(|record| record.payload.clone());
            if let Some(payload) = payload {
                let moved = manager.move_day(current_day, target, id, payload)?;
                return emit_json(serde_json::json!({
                    "outcome": outcome,
                    "moved_to": target.to_string(),
                    "record": serde_json::to_value(&moved)?,
                    "durability": manager.last_save(),
                }));
            }
        }
    }

    emit_json(serde_json::json!({
        "outcome": outcome,
        "durability": manager.last_save(),
    }))
}

/// Day buckets rolled up under their `YYYY-MM` month for presentation.
fn month_grouped(manager: &JournalManager) -> Result<Value> {
    let mut months = serde_json::Map::new();
    for bucket in &manager.view().buckets {
        let Some(day) = bucket.day else { continue };
        let day_key = day.to_string();
        let month_key = day_key.chars().take(7).collect::<String>();
        let entry = months
            .entry(month_key)
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = entry {
            map.insert(day_key, serde_json::to_value(&bucket.records)?);
        }
    }
    Ok(Value::Object(months))
}

fn emit_mutation<P: EntityPayload>(manager: &Manager<P>, outcome: MutationOutcome) -> Result<()> {
    emit_json(serde_json::json!({
        "outcome": outcome,
        "durability": manager.last_save(),
    }))
}
