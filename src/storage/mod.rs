use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

use crate::recurrence::RecurrenceRule;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// Current instant as the canonical stored timestamp format.
///
/// All timestamp columns hold RFC 3339 UTC with fixed microsecond precision
/// and a `Z` suffix, so SQL string comparison orders them chronologically.
pub fn now_ts() -> String {
    fmt_ts(Utc::now())
}

/// Format a timestamp in the canonical stored format.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back to UTC.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TaskRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    /// One of "low" | "medium" | "high".
    pub priority: String,
    /// JSON array of tag strings, e.g. `["work","errand"]`.
    pub tags: String,
    pub is_completed: bool,
    pub completed_at: Option<String>,
    pub due_date: Option<String>,
    /// Recurrence rule JSON. NULL for one-shot tasks.
    pub recurrence_rule: Option<String>,
    pub reminder_sent: bool,
    /// Root task id of a recurring series, carried onto every successor.
    /// NULL for tasks that never had a rule.
    pub series_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    /// Decode the stored recurrence rule. `None` for one-shot tasks or when
    /// the stored JSON no longer parses (rules are validated at the write
    /// boundary, so that only guards corrupt data).
    pub fn rule(&self) -> Option<RecurrenceRule> {
        let raw = self.recurrence_rule.as_deref()?;
        serde_json::from_str(raw).ok()
    }

    pub fn tags_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }

    pub fn due_date_utc(&self) -> Option<DateTime<Utc>> {
        self.due_date.as_deref().and_then(parse_ts)
    }

    pub fn completed_at_utc(&self) -> Option<DateTime<Utc>> {
        self.completed_at.as_deref().and_then(parse_ts)
    }

    /// Series identity for the spawn ledger: the explicit series root when
    /// present, else this task itself (it is the root).
    pub fn series_key(&self) -> &str {
        self.series_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ReminderRow {
    pub id: String,
    pub task_id: String,
    pub remind_at: String,
    pub sent: bool,
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ReminderRow {
    pub fn remind_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_ts(&self.remind_at)
    }
}

/// A due reminder joined with its owning task's user — what the scanner
/// needs to build a `reminder_triggered` envelope.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueReminderRow {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub remind_at: String,
}

/// Fields supplied by callers when creating a task; ids and timestamps are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence_rule: Option<RecurrenceRule>,
    pub series_id: Option<String>,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("taskd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions as _;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests). Runs migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Borrow the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        // Idempotent DDL — safe to run on every startup.
        let stmts = [
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                tags TEXT NOT NULL DEFAULT '[]',
                is_completed INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT,
                due_date TEXT,
                recurrence_rule TEXT,
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                series_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks (user_id, created_at)",
            "CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                remind_at TEXT NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders (sent, remind_at)",
            "CREATE INDEX IF NOT EXISTS idx_reminders_task ON reminders (task_id)",
            "CREATE TABLE IF NOT EXISTS recurrence_spawns (
                key TEXT PRIMARY KEY,
                series_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                spawned_task_id TEXT NOT NULL,
                next_date TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_spawns_series ON recurrence_spawns (series_id)",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .context("run schema migration")?;
        }
        Ok(())
    }

    // ─── Tasks ───────────────────────────────────────────────────────────────

    pub async fn insert_task(&self, new: &NewTask) -> Result<TaskRow> {
        let id = Uuid::new_v4().to_string();
        self.insert_task_with_id(&id, new, &self.pool).await?;
        self.get_task(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task not found after insert"))
    }

    async fn insert_task_with_id<'e, E>(&self, id: &str, new: &NewTask, executor: E) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let now = now_ts();
        let tags = serde_json::to_string(&new.tags).unwrap_or_else(|_| "[]".to_string());
        let rule = new
            .recurrence_rule
            .as_ref()
            .map(|r| serde_json::to_string(r).unwrap_or_default());
        sqlx::query(
            "INSERT INTO tasks (id, user_id, title, description, priority, tags,
                                is_completed, completed_at, due_date, recurrence_rule,
                                reminder_sent, series_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, NULL, ?, ?, 0, ?, ?, ?)",
        )
        .bind(id)
        .bind(&new.user_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.priority)
        .bind(&tags)
        .bind(new.due_date.map(fmt_ts))
        .bind(&rule)
        .bind(&new.series_id)
        .bind(&now)
        .bind(&now)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_tasks_for_user(&self, user_id: &str) -> Result<Vec<TaskRow>> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT * FROM tasks WHERE user_id = ? ORDER BY created_at DESC")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await
    }

    /// Flip the completion flag. Returns the updated row, or `None` when the
    /// task does not exist.
    pub async fn set_task_completion(
        &self,
        id: &str,
        completed: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Option<TaskRow>> {
        let rows = sqlx::query(
            "UPDATE tasks SET is_completed = ?, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(completed)
        .bind(completed_at.map(fmt_ts))
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows == 0 {
            return Ok(None);
        }
        self.get_task(id).await
    }

    /// Delete a task and all of its reminders in one transaction, so no
    /// reminder can outlive (or fire for) a deleted task. Returns the number
    /// of reminders removed, or `None` when the task does not exist.
    pub async fn delete_task_with_reminders(&self, id: &str) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await?;

        let reminders_removed = sqlx::query("DELETE FROM reminders WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let task_removed = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if task_removed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(reminders_removed))
    }

    // ─── Reminders ───────────────────────────────────────────────────────────

    pub async fn insert_reminder(
        &self,
        task_id: &str,
        remind_at: DateTime<Utc>,
    ) -> Result<ReminderRow> {
        let id = Uuid::new_v4().to_string();
        let now = now_ts();
        sqlx::query(
            "INSERT INTO reminders (id, task_id, remind_at, sent, sent_at, created_at, updated_at)
             VALUES (?, ?, ?, 0, NULL, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(fmt_ts(remind_at))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_reminder(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("reminder not found after insert"))
    }

    pub async fn get_reminder(&self, id: &str) -> Result<Option<ReminderRow>> {
        Ok(sqlx::query_as("SELECT * FROM reminders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Unsent reminders due at or before `as_of`, earliest first, capped at
    /// `limit` so a bounded dispatcher drains the most urgent first.
    pub async fn due_reminders(
        &self,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReminderRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM reminders
                 WHERE sent = 0 AND remind_at <= ?
                 ORDER BY remind_at ASC
                 LIMIT ?",
            )
            .bind(fmt_ts(as_of))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Due reminders joined with the owning task's user, for event envelopes.
    /// Reminders whose task has vanished are excluded by the join.
    pub async fn due_reminders_with_owner(
        &self,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueReminderRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT r.id, r.task_id, t.user_id, r.remind_at
                 FROM reminders r
                 JOIN tasks t ON t.id = r.task_id
                 WHERE r.sent = 0 AND r.remind_at <= ?
                 ORDER BY r.remind_at ASC
                 LIMIT ?",
            )
            .bind(fmt_ts(as_of))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn reminders_for_task(&self, task_id: &str) -> Result<Vec<ReminderRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM reminders WHERE task_id = ? ORDER BY remind_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn overdue_reminders(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM reminders
             WHERE sent = 0 AND remind_at < ?
             ORDER BY remind_at ASC",
        )
        .bind(fmt_ts(now))
        .fetch_all(&self.pool)
        .await?)
    }

    /// Transition a reminder to sent. Returns the number of rows that
    /// actually transitioned (0 when already sent or missing) — the guard
    /// `sent = 0` makes the false→true transition happen exactly once.
    pub async fn mark_reminder_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<u64> {
        Ok(sqlx::query(
            "UPDATE reminders SET sent = 1, sent_at = ?, updated_at = ? WHERE id = ? AND sent = 0",
        )
        .bind(fmt_ts(sent_at))
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected())
    }

    pub async fn delete_reminder(&self, id: &str) -> Result<bool> {
        Ok(sqlx::query("DELETE FROM reminders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0)
    }

    /// Bulk-remove every reminder for a task in a single statement (atomic).
    /// Returns the exact count removed.
    pub async fn delete_reminders_for_task(&self, task_id: &str) -> Result<u64> {
        Ok(sqlx::query("DELETE FROM reminders WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    // ─── Recurrence spawn ledger ─────────────────────────────────────────────

    /// Atomically record a spawn-ledger entry and create the successor task.
    ///
    /// The ledger key is UNIQUE: if this occurrence was already spawned (a
    /// retried completion notification), the transaction is abandoned and
    /// `None` is returned — no duplicate successor, no event.
    pub async fn create_spawned_task(
        &self,
        key: &str,
        series_id: &str,
        source_task_id: &str,
        next_date: DateTime<Utc>,
        new: &NewTask,
    ) -> Result<Option<TaskRow>> {
        let spawned_id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT OR IGNORE INTO recurrence_spawns
                 (key, series_id, task_id, spawned_task_id, next_date, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(series_id)
        .bind(source_task_id)
        .bind(&spawned_id)
        .bind(fmt_ts(next_date))
        .bind(now_ts())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        self.insert_task_with_id(&spawned_id, new, &mut *tx).await?;
        tx.commit().await?;

        self.get_task(&spawned_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("spawned task not found after insert"))
            .map(Some)
    }

    /// Number of successors already spawned for a series.
    pub async fn spawn_count(&self, series_id: &str) -> Result<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM recurrence_spawns WHERE series_id = ?")
                .bind(series_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u32)
    }
}
