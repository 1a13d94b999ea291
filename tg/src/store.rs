//! GraphStore - project-scoped SQLite store for items, dependency edges and sessions
//!
//! Every multi-statement mutation runs inside a single transaction. Single-row
//! writes verify the affected row count so a write to an unknown ID surfaces as
//! `StoreError::NotFound` instead of silently succeeding.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::item::{EpicOptions, Item, ItemStatus, ItemType, PRIORITY_MEDIUM, TaskOptions, generate_id};
use crate::schema;
use crate::session::{Session, SessionStatus};

/// How long a writer waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ITEM_COLUMNS: &str = "id, project, type, title, description, status, priority, parent_id, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, arch_doc, iteration, total_cost, status, checkpoint_path, started_at, updated_at";

/// Durable store of epics, tasks and dependency edges for one project
pub struct GraphStore {
    conn: Mutex<Connection>,
    project: String,
}

impl GraphStore {
    /// Open (or create) a store on disk and apply migrations
    pub fn open(path: impl AsRef<Path>, project: impl Into<String>) -> StoreResult<Self> {
        let path = path.as_ref();
        let project = project.into();
        debug!(path = %path.display(), %project, "GraphStore::open: called");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, project)
    }

    /// Open a private in-memory store (tests and dry runs)
    pub fn open_in_memory(project: impl Into<String>) -> StoreResult<Self> {
        let project = project.into();
        debug!(%project, "GraphStore::open_in_memory: called");
        Self::init(Connection::open_in_memory()?, project)
    }

    fn init(mut conn: Connection, project: String) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::run_migrations(&mut conn)?;
        info!(%project, "GraphStore opened");
        Ok(Self {
            conn: Mutex::new(conn),
            project,
        })
    }

    /// Project this store is scoped to
    pub fn project(&self) -> &str {
        &self.project
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // === Item creation ===

    /// Create an epic and return its ID
    pub fn create_epic(&self, title: &str, options: EpicOptions) -> StoreResult<String> {
        debug!(%title, "create_epic: called");
        let title = validate_title(title)?;
        let id = generate_id(ItemType::Epic);
        let now = Utc::now().to_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO items (id, project, type, title, description, status, priority, parent_id, created_at, updated_at)
             VALUES (?1, ?2, 'epic', ?3, ?4, 'open', ?5, NULL, ?6, ?6)",
            params![
                id,
                self.project,
                title,
                options.description,
                options.priority.unwrap_or(PRIORITY_MEDIUM),
                now
            ],
        )?;

        info!(epic_id = %id, %title, "Created epic");
        Ok(id)
    }

    /// Create a task, its parent link and its dependency edges in one transaction
    ///
    /// The parent (if any) must be an existing epic of this project and every
    /// dependency target must already exist. Nothing is written if any check fails.
    pub fn create_task(&self, title: &str, options: TaskOptions) -> StoreResult<String> {
        debug!(%title, parent_id = ?options.parent_id, deps = options.depends_on.len(), "create_task: called");
        let title = validate_title(title)?;
        let id = generate_id(ItemType::Task);
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(parent_id) = &options.parent_id {
            let parent_type: Option<String> = tx
                .query_row(
                    "SELECT type FROM items WHERE id = ?1 AND project = ?2",
                    params![parent_id, self.project],
                    |row| row.get(0),
                )
                .optional()?;
            match parent_type.as_deref() {
                Some("epic") => {}
                Some(_) => return Err(StoreError::InvalidParent(parent_id.clone())),
                None => return Err(StoreError::NotFound(format!("parent epic {}", parent_id))),
            }
        }

        tx.execute(
            "INSERT INTO items (id, project, type, title, description, status, priority, parent_id, created_at, updated_at)
             VALUES (?1, ?2, 'task', ?3, ?4, 'open', ?5, ?6, ?7, ?7)",
            params![
                id,
                self.project,
                title,
                options.description,
                options.priority.unwrap_or(PRIORITY_MEDIUM),
                options.parent_id,
                now
            ],
        )?;

        for dep in &options.depends_on {
            insert_dependency(&tx, &self.project, &id, dep)?;
        }

        tx.commit()?;
        info!(task_id = %id, %title, deps = options.depends_on.len(), "Created task");
        Ok(id)
    }

    /// Add a dependency edge between two existing items
    pub fn add_dependency(&self, item_id: &str, depends_on_id: &str) -> StoreResult<()> {
        debug!(%item_id, %depends_on_id, "add_dependency: called");
        if item_id == depends_on_id {
            return Err(StoreError::Validation(format!("{} cannot depend on itself", item_id)));
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !item_exists(&tx, &self.project, item_id)? {
            return Err(StoreError::NotFound(format!("item {}", item_id)));
        }
        insert_dependency(&tx, &self.project, item_id, depends_on_id)?;
        tx.commit()?;
        Ok(())
    }

    /// IDs this item depends on, in insertion order
    pub fn dependencies(&self, item_id: &str) -> StoreResult<Vec<String>> {
        debug!(%item_id, "dependencies: called");
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT depends_on_id FROM dependencies WHERE item_id = ?1 ORDER BY rowid")?;
        let deps = stmt
            .query_map(params![item_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    // === Item reads ===

    /// Get an item by ID
    pub fn get_item(&self, id: &str) -> StoreResult<Option<Item>> {
        debug!(%id, "get_item: called");
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM items WHERE id = ?1 AND project = ?2", ITEM_COLUMNS);
        let item = conn
            .query_row(&sql, params![id, self.project], row_to_item)
            .optional()?;
        Ok(item)
    }

    /// Get an item by ID, returning `NotFound` if absent
    pub fn get_item_required(&self, id: &str) -> StoreResult<Item> {
        self.get_item(id)?
            .ok_or_else(|| StoreError::NotFound(format!("item {}", id)))
    }

    /// Child tasks of an epic in creation order
    pub fn list_tasks(&self, epic_id: &str) -> StoreResult<Vec<Item>> {
        debug!(%epic_id, "list_tasks: called");
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM items WHERE project = ?1 AND type = 'task' AND parent_id = ?2 ORDER BY rowid",
            ITEM_COLUMNS
        );
        query_items(&conn, &sql, params![self.project, epic_id])
    }

    /// Tasks that are open and whose dependencies are all done
    pub fn ready_tasks(&self, epic_id: Option<&str>) -> StoreResult<Vec<Item>> {
        debug!(?epic_id, "ready_tasks: called");
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM items i
             WHERE i.project = ?1 AND i.type = 'task' AND i.status = 'open'
               AND (?2 IS NULL OR i.parent_id = ?2)
               AND NOT EXISTS (
                   SELECT 1 FROM dependencies d
                   JOIN items dep ON dep.id = d.depends_on_id
                   WHERE d.item_id = i.id AND dep.status != 'done'
               )
             ORDER BY i.priority, i.rowid",
            prefixed_item_columns("i")
        );
        query_items(&conn, &sql, params![self.project, epic_id])
    }

    /// Tasks that are neither done nor canceled
    pub fn incomplete_tasks(&self, epic_id: Option<&str>) -> StoreResult<Vec<Item>> {
        debug!(?epic_id, "incomplete_tasks: called");
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM items
             WHERE project = ?1 AND type = 'task' AND status NOT IN ('done', 'canceled')
               AND (?2 IS NULL OR parent_id = ?2)
             ORDER BY priority, rowid",
            ITEM_COLUMNS
        );
        query_items(&conn, &sql, params![self.project, epic_id])
    }

    /// Epics still open or in progress, oldest first
    pub fn active_epics(&self) -> StoreResult<Vec<Item>> {
        debug!("active_epics: called");
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM items
             WHERE project = ?1 AND type = 'epic' AND status IN ('open', 'in_progress')
             ORDER BY rowid",
            ITEM_COLUMNS
        );
        query_items(&conn, &sql, params![self.project])
    }

    // === Status ===

    /// Move an item to a new status following the item state machine
    pub fn update_status(&self, id: &str, status: ItemStatus) -> StoreResult<()> {
        debug!(%id, %status, "update_status: called");
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = current_status(&tx, &self.project, id)?;
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current.to_string(),
                to: status.to_string(),
            });
        }

        write_status(&tx, &self.project, id, status)?;
        tx.commit()?;
        debug!(%id, from = %current, to = %status, "update_status: applied");
        Ok(())
    }

    /// Parse a raw status value and apply it; unknown values are rejected, never coerced
    pub fn update_status_str(&self, id: &str, status: &str) -> StoreResult<()> {
        let status: ItemStatus = status.parse()?;
        self.update_status(id, status)
    }

    /// Explicitly reopen an item from any state
    pub fn reopen(&self, id: &str) -> StoreResult<()> {
        debug!(%id, "reopen: called");
        let conn = self.lock()?;
        write_status(&conn, &self.project, id, ItemStatus::Open)
    }

    /// Delete an item; its edges and child tasks go with it
    pub fn delete_item(&self, id: &str) -> StoreResult<()> {
        debug!(%id, "delete_item: called");
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM items WHERE id = ?1 AND project = ?2",
            params![id, self.project],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("item {}", id)));
        }
        Ok(())
    }

    // === Derived epic progress ===

    /// Count (completed, total) child tasks of an epic
    pub fn compute_epic_progress(&self, epic_id: &str) -> StoreResult<(u32, u32)> {
        debug!(%epic_id, "compute_epic_progress: called");
        let conn = self.lock()?;
        epic_progress(&conn, &self.project, epic_id)
    }

    /// Mark the epic done when every child task is done
    ///
    /// Returns true iff the epic has at least one child and all children are
    /// done. An epic with no children is never auto-completed.
    pub fn update_epic_status_if_complete(&self, epic_id: &str) -> StoreResult<bool> {
        debug!(%epic_id, "update_epic_status_if_complete: called");
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item_type: Option<String> = tx
            .query_row(
                "SELECT type FROM items WHERE id = ?1 AND project = ?2",
                params![epic_id, self.project],
                |row| row.get(0),
            )
            .optional()?;
        if item_type.as_deref() != Some("epic") {
            return Err(StoreError::NotFound(format!("epic {}", epic_id)));
        }

        let (completed, total) = epic_progress(&tx, &self.project, epic_id)?;
        if total == 0 || completed != total {
            debug!(%epic_id, completed, total, "update_epic_status_if_complete: not complete");
            return Ok(false);
        }

        write_status(&tx, &self.project, epic_id, ItemStatus::Done)?;
        tx.commit()?;
        info!(%epic_id, total, "Epic complete");
        Ok(true)
    }

    /// Cancel an epic that newer work replaces, along with its unfinished tasks
    ///
    /// Like auto-completion this writes a derived status directly. Done and
    /// canceled children keep their status; a done epic is left alone and
    /// `Ok(false)` is returned.
    pub fn cancel_epic(&self, epic_id: &str) -> StoreResult<bool> {
        debug!(%epic_id, "cancel_epic: called");
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item_type: Option<String> = tx
            .query_row(
                "SELECT type FROM items WHERE id = ?1 AND project = ?2",
                params![epic_id, self.project],
                |row| row.get(0),
            )
            .optional()?;
        if item_type.as_deref() != Some("epic") {
            return Err(StoreError::NotFound(format!("epic {}", epic_id)));
        }
        if current_status(&tx, &self.project, epic_id)?.is_finished() {
            return Ok(false);
        }

        let tasks = tx.execute(
            "UPDATE items SET status = 'canceled', updated_at = ?1
             WHERE project = ?2 AND type = 'task' AND parent_id = ?3 AND status NOT IN ('done', 'canceled')",
            params![Utc::now().to_rfc3339(), self.project, epic_id],
        )?;
        write_status(&tx, &self.project, epic_id, ItemStatus::Canceled)?;
        tx.commit()?;
        info!(%epic_id, tasks, "Epic canceled");
        Ok(true)
    }

    // === Session ledger ===

    /// Start a new session for an architecture document
    pub fn create_session(&self, arch_doc: &str, checkpoint_path: Option<&str>) -> StoreResult<Session> {
        debug!(%arch_doc, ?checkpoint_path, "create_session: called");
        if arch_doc.trim().is_empty() {
            return Err(StoreError::Validation("arch_doc must not be empty".to_string()));
        }
        let now = Utc::now();
        let session = Session {
            id: format!("session-{}", uuid::Uuid::now_v7().simple()),
            arch_doc: arch_doc.to_string(),
            iteration: 0,
            total_cost: 0.0,
            status: SessionStatus::Running,
            checkpoint_path: checkpoint_path.map(str::to_string),
            started_at: now,
            updated_at: now,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (id, arch_doc, iteration, total_cost, status, checkpoint_path, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                session.id,
                session.arch_doc,
                session.iteration,
                session.total_cost,
                session.status.as_str(),
                session.checkpoint_path,
                now.to_rfc3339()
            ],
        )?;
        info!(session_id = %session.id, %arch_doc, "Created session");
        Ok(session)
    }

    /// Record the last completed iteration and cumulative cost
    pub fn update_session_progress(&self, id: &str, iteration: u32, total_cost: f64) -> StoreResult<()> {
        debug!(%id, iteration, total_cost, "update_session_progress: called");
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE sessions SET iteration = ?1, total_cost = ?2, updated_at = ?3 WHERE id = ?4",
            params![iteration, total_cost, Utc::now().to_rfc3339(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("session {}", id)));
        }
        Ok(())
    }

    pub fn set_session_status(&self, id: &str, status: SessionStatus) -> StoreResult<()> {
        debug!(%id, %status, "set_session_status: called");
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("session {}", id)));
        }
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        debug!(%id, "get_session: called");
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        let session = conn.query_row(&sql, params![id], row_to_session).optional()?;
        Ok(session)
    }

    /// Most recent running or stopped session for a document
    pub fn latest_active_session(&self, arch_doc: &str) -> StoreResult<Option<Session>> {
        debug!(%arch_doc, "latest_active_session: called");
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM sessions
             WHERE arch_doc = ?1 AND status IN ('running', 'stopped')
             ORDER BY started_at DESC, rowid DESC
             LIMIT 1",
            SESSION_COLUMNS
        );
        let session = conn.query_row(&sql, params![arch_doc], row_to_session).optional()?;
        Ok(session)
    }
}

fn validate_title(title: &str) -> StoreResult<&str> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        debug!("validate_title: empty title rejected");
        return Err(StoreError::Validation("title must not be empty".to_string()));
    }
    Ok(trimmed)
}

fn prefixed_item_columns(alias: &str) -> String {
    ITEM_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn item_exists(conn: &Connection, project: &str, id: &str) -> StoreResult<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM items WHERE id = ?1 AND project = ?2",
            params![id, project],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

fn insert_dependency(conn: &Connection, project: &str, item_id: &str, depends_on_id: &str) -> StoreResult<()> {
    if !item_exists(conn, project, depends_on_id)? {
        return Err(StoreError::NotFound(format!("dependency target {}", depends_on_id)));
    }
    conn.execute(
        "INSERT OR IGNORE INTO dependencies (item_id, depends_on_id) VALUES (?1, ?2)",
        params![item_id, depends_on_id],
    )?;
    Ok(())
}

fn current_status(conn: &Connection, project: &str, id: &str) -> StoreResult<ItemStatus> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM items WHERE id = ?1 AND project = ?2",
            params![id, project],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => raw.parse::<ItemStatus>().map_err(|_| StoreError::Corrupt(format!("status '{}' on {}", raw, id))),
        None => Err(StoreError::NotFound(format!("item {}", id))),
    }
}

fn write_status(conn: &Connection, project: &str, id: &str, status: ItemStatus) -> StoreResult<()> {
    let rows = conn.execute(
        "UPDATE items SET status = ?1, updated_at = ?2 WHERE id = ?3 AND project = ?4",
        params![status.as_str(), Utc::now().to_rfc3339(), id, project],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!("item {}", id)));
    }
    Ok(())
}

fn epic_progress(conn: &Connection, project: &str, epic_id: &str) -> StoreResult<(u32, u32)> {
    let (completed, total): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0), COUNT(*)
         FROM items WHERE project = ?1 AND type = 'task' AND parent_id = ?2",
        params![project, epic_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((completed as u32, total as u32))
}

fn query_items(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Item>> {
    let mut stmt = conn.prepare(sql)?;
    let items = stmt.query_map(params, row_to_item)?.collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_datetime(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        project: row.get(1)?,
        item_type: row.get::<_, String>(2)?.parse::<ItemType>().map_err(|e| conversion_error(2, e))?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get::<_, String>(5)?.parse::<ItemStatus>().map_err(|e| conversion_error(5, e))?,
        priority: row.get(6)?,
        parent_id: row.get(7)?,
        created_at: parse_datetime(8, row.get(8)?)?,
        updated_at: parse_datetime(9, row.get(9)?)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        arch_doc: row.get(1)?,
        iteration: row.get(2)?,
        total_cost: row.get(3)?,
        status: row.get::<_, String>(4)?.parse::<SessionStatus>().map_err(|e| conversion_error(4, e))?,
        checkpoint_path: row.get(5)?,
        started_at: parse_datetime(6, row.get(6)?)?,
        updated_at: parse_datetime(7, row.get(7)?)?,
    })
}
