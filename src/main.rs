use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr as _;
use std::sync::Arc;
use tracing::info;

use taskd::config::{ConfigWatcher, TaskdConfig};
use taskd::dispatch::{self, WorkerCounters};
use taskd::recurrence::{EndCondition, Frequency, RecurrenceRule};
use taskd::reminders::{scanner, ReminderScheduler};
use taskd::storage::fmt_ts;
use taskd::tasks::{CreateTask, Priority};
use taskd::AppContext;

#[derive(Parser)]
#[command(
    name = "taskd",
    about = "taskd — recurring-task and reminder scheduling daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Data directory for the SQLite database and config.toml
    #[arg(long, env = "TASKD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKD_LOG")]
    log: Option<String>,

    /// Broker gateway base URL, e.g. http://localhost:8480.
    /// Unset = no broker; events are logged locally (degraded publish).
    #[arg(long, env = "TASKD_BROKER_URL")]
    broker_url: Option<String>,

    /// Base port for the health/metrics endpoint (default: 8420).
    /// The notifier and recurring workers bind base+1 and base+2 so all
    /// three processes can share one host.
    #[arg(long, env = "TASKD_HEALTH_PORT")]
    health_port: Option<u16>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TASKD_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduling daemon (default when no subcommand given).
    ///
    /// Hosts the task/reminder store, the due-reminder scanner, and the
    /// health endpoint.
    Serve,
    /// Run the notification dispatcher worker.
    ///
    /// Consumes reminder-due events from the "reminders" topic, performs the
    /// (stubbed) delivery, and confirms it by marking reminders sent.
    /// Requires a configured broker gateway.
    Notifier,
    /// Run the recurring-task event observer worker.
    ///
    /// Watches the "task-events" topic for completion toggles and spawned
    /// successors. Observation only — successor creation happens in the
    /// daemon. Requires a configured broker gateway.
    Recurring,
    /// Manage tasks (the scheduling hooks: create, complete, delete, list).
    ///
    /// Examples:
    ///   taskd task add "Water the plants" --every weekly
    ///   taskd task complete 3f2a…
    ///   taskd task list --json
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Manage reminders.
    ///
    /// Examples:
    ///   taskd remind add 3f2a… --at 2026-08-09T08:00:00Z
    ///   taskd remind due
    Remind {
        #[command(subcommand)]
        action: RemindAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a task, optionally recurring.
    Add {
        title: String,
        /// Owning user identifier
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long)]
        description: Option<String>,
        /// low | medium | high
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Repeatable: --tag work --tag home
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Due date (RFC 3339, or YYYY-MM-DD for midnight UTC)
        #[arg(long)]
        due: Option<String>,
        /// Recurrence frequency: daily | weekly | monthly | yearly
        #[arg(long)]
        every: Option<String>,
        /// Recurrence interval (with --every)
        #[arg(long, default_value_t = 1)]
        interval: u32,
        /// Stop the series after N occurrences (with --every)
        #[arg(long)]
        count: Option<u32>,
        /// Stop the series on this date (with --every)
        #[arg(long)]
        until: Option<String>,
    },
    /// Toggle a task's completion. Completing a recurring task spawns its
    /// successor.
    Complete { id: String },
    /// Delete a task and cancel all of its reminders.
    Delete { id: String },
    /// List a user's tasks.
    List {
        #[arg(long, default_value = "local")]
        user: String,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RemindAction {
    /// Schedule a reminder for a task.
    Add {
        task_id: String,
        /// When to remind (RFC 3339, or YYYY-MM-DD for midnight UTC)
        #[arg(long)]
        at: String,
    },
    /// List a task's reminders.
    List { task_id: String },
    /// List all currently due, unsent reminders.
    Due,
    /// Delete a reminder.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TaskdConfig::new(
        args.data_dir.clone(),
        args.log.clone(),
        args.broker_url.clone(),
        args.health_port,
    );

    let _log_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    match args.command {
        None | Some(Command::Serve) => run_serve(config).await,
        Some(Command::Notifier) => run_notifier(config).await,
        Some(Command::Recurring) => run_recurring(config).await,
        Some(Command::Task { action }) => run_task_action(config, action).await,
        Some(Command::Remind { action }) => run_remind_action(config, action).await,
    }
}

// ─── Processes ────────────────────────────────────────────────────────────────

async fn run_serve(config: TaskdConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "taskd starting");
    let ctx = AppContext::init(config).await?;

    let watcher = ConfigWatcher::start(&ctx.config.data_dir);
    let hot = watcher.as_ref().map(|w| w.hot.clone());

    let counters = Arc::new(WorkerCounters::new());

    tokio::spawn(scanner::run_reminder_scanner(
        ctx.storage.clone(),
        ctx.publisher.clone(),
        counters.clone(),
        ctx.config.reminders.clone(),
        hot,
    ));

    let health_port = ctx.config.health_port;
    let health_counters = counters.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatch::http::start_health_server(health_counters, "serve", health_port).await
        {
            tracing::warn!(err = %e, "health endpoint failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received — stopping");
    Ok(())
}

async fn run_notifier(config: TaskdConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "notification dispatcher starting");
    let health_port = config.health_port + 1;
    let consumer = dispatch::notifier::reminders_consumer(&config.broker)?;
    let ctx = AppContext::init(config).await?;
    let scheduler = Arc::new(ReminderScheduler::new(
        ctx.storage.clone(),
        ctx.publisher.clone(),
    ));

    let counters = Arc::new(WorkerCounters::new());
    let health_counters = counters.clone();
    tokio::spawn(async move {
        if let Err(e) =
            dispatch::http::start_health_server(health_counters, "notifier", health_port).await
        {
            tracing::warn!(err = %e, "health endpoint failed");
        }
    });

    tokio::select! {
        result = dispatch::notifier::run_notifier(consumer, scheduler, counters) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received — stopping");
            Ok(())
        }
    }
}

async fn run_recurring(config: TaskdConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "recurring task event handler starting");
    let consumer = dispatch::recurring::task_events_consumer(&config.broker)?;

    let counters = Arc::new(WorkerCounters::new());
    let health_counters = counters.clone();
    let health_port = config.health_port + 2;
    tokio::spawn(async move {
        if let Err(e) =
            dispatch::http::start_health_server(health_counters, "recurring", health_port).await
        {
            tracing::warn!(err = %e, "health endpoint failed");
        }
    });

    tokio::select! {
        result = dispatch::recurring::run_recurring_observer(consumer, counters) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received — stopping");
            Ok(())
        }
    }
}

// ─── CLI actions ──────────────────────────────────────────────────────────────

async fn run_task_action(config: TaskdConfig, action: TaskAction) -> Result<()> {
    let ctx = AppContext::init(config).await?;
    let service = ctx.task_service();

    match action {
        TaskAction::Add {
            title,
            user,
            description,
            priority,
            tags,
            due,
            every,
            interval,
            count,
            until,
        } => {
            let priority = Priority::from_str(&priority).map_err(|e| anyhow::anyhow!(e))?;
            let due_date = due.as_deref().map(parse_when).transpose()?;

            let recurrence_rule = match every {
                Some(freq) => {
                    let frequency = Frequency::from_str(&freq)?;
                    let end_condition = match (count, until) {
                        (Some(n), _) => EndCondition::AfterCount(n),
                        (None, Some(date)) => EndCondition::OnDate(fmt_ts(parse_when(&date)?)),
                        (None, None) => EndCondition::Never,
                    };
                    Some(RecurrenceRule {
                        frequency,
                        interval,
                        enabled: true,
                        end_condition,
                    })
                }
                None => None,
            };

            let task = service
                .create_task(CreateTask {
                    user_id: user,
                    title,
                    description,
                    priority,
                    tags,
                    due_date,
                    recurrence_rule,
                })
                .await?;
            println!("created task {} ({})", task.id, task.title);
        }
        TaskAction::Complete { id } => {
            let (task, successor) = service.toggle_completion(&id).await?;
            if task.is_completed {
                println!("completed task {}", task.id);
            } else {
                println!("reopened task {}", task.id);
            }
            if let Some(next) = successor {
                println!(
                    "spawned successor {} due {}",
                    next.id,
                    next.due_date.as_deref().unwrap_or("-")
                );
            }
        }
        TaskAction::Delete { id } => {
            let reminders_removed = service.delete_task(&id).await?;
            println!("deleted task {id} ({reminders_removed} reminders cancelled)");
        }
        TaskAction::List { user, json } => {
            let rows = service.list_tasks(&user).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for task in rows {
                    println!(
                        "{}  [{}] {}  due={}  {}",
                        task.id,
                        if task.is_completed { "x" } else { " " },
                        task.title,
                        task.due_date.as_deref().unwrap_or("-"),
                        if task.recurrence_rule.is_some() { "(recurring)" } else { "" },
                    );
                }
            }
        }
    }

    Ok(())
}

async fn run_remind_action(config: TaskdConfig, action: RemindAction) -> Result<()> {
    let ctx = AppContext::init(config).await?;
    let scheduler = ctx.reminder_scheduler();

    match action {
        RemindAction::Add { task_id, at } => {
            let remind_at = parse_when(&at)?;
            let reminder = scheduler.create_reminder(&task_id, remind_at).await?;
            println!("created reminder {} at {}", reminder.id, reminder.remind_at);
        }
        RemindAction::List { task_id } => {
            for r in scheduler.reminders_for_task(&task_id).await? {
                println!(
                    "{}  at={}  sent={}",
                    r.id,
                    r.remind_at,
                    if r.sent { "yes" } else { "no" }
                );
            }
        }
        RemindAction::Due => {
            for r in scheduler.due_reminders(Utc::now(), 100).await? {
                println!("{}  task={}  at={}", r.id, r.task_id, r.remind_at);
            }
        }
        RemindAction::Delete { id } => {
            scheduler.delete_reminder(&id).await?;
            println!("deleted reminder {id}");
        }
    }

    Ok(())
}

/// Parse a user-supplied timestamp: RFC 3339, or a bare date taken as
/// midnight UTC.
fn parse_when(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("'{raw}' is not RFC 3339 or YYYY-MM-DD"))?;
    let naive = date
        .and_hms_opt(0, 0, 0)
        .context("midnight is always valid")?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators like Loki/Elasticsearch).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("taskd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
