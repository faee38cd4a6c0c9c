use crate::db::{open_db, open_db_readonly, open_in_memory};
use crate::mapper::SessionRecord;
use crate::project::ensure_project;
use crate::SessyncError;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub id: i64,
    pub phase: String,
    pub status: String,
    /// True when this call inserted the row rather than updating it.
    pub created: bool,
}

/// The narrow write surface of the session index.
///
/// Implementations must tolerate concurrent calls for different slugs. Calls
/// for the same slug are not serialized here.
pub trait SessionIndex: Send + Sync {
    fn find_id(&self, slug: &str) -> Result<Option<i64>, SessyncError>;

    /// Create or fully overwrite the row for `record.session_slug`.
    fn upsert(&self, record: &SessionRecord) -> Result<UpsertOutcome, SessyncError>;
}

/// SQLite-backed index. One connection, guarded by a mutex so the handle can
/// cross threads; the lock spans a single statement or transaction.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    pub fn open(db_path: &Path) -> Result<Self, SessyncError> {
        Ok(Self::from_connection(open_db(db_path)?))
    }

    /// Read-only handle for lookups. Fails if the database does not exist yet.
    pub fn open_readonly(db_path: &Path) -> Result<Self, SessyncError> {
        Ok(Self::from_connection(open_db_readonly(db_path)?))
    }

    pub fn in_memory() -> Result<Self, SessyncError> {
        Ok(Self::from_connection(open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SessyncError> {
        self.conn
            .lock()
            .map_err(|_| SessyncError::Config("index connection lock poisoned".into()))
    }

    /// Register `working_dir` as a project (idempotent) and return its id.
    pub fn ensure_project(&self, working_dir: &str) -> Result<i64, SessyncError> {
        let conn = self.lock()?;
        ensure_project(&conn, working_dir)
    }

    pub fn get(&self, slug: &str) -> Result<Option<SessionRecord>, SessyncError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, session_slug, title, description, session_type, project_id, status,
                        current_phase, phase_history, working_dir, session_dir, git_branch,
                        git_base_branch, git_worktree, spec_exists, plan_exists, checkpoints_total,
                        checkpoints_completed, checkpoints_completed_list, current_checkpoint,
                        total_input_tokens, total_output_tokens, total_cost, error_message,
                        error_phase, commits, artifacts, metadata, created_at, updated_at,
                        started_at, completed_at
                 FROM sessions WHERE session_slug = ?1",
                params![slug],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<i64, SessyncError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT count(*) FROM sessions", [], |r| r.get(0))?)
    }
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        session_slug: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        session_type: row.get(4)?,
        project_id: row.get(5)?,
        status: row.get(6)?,
        current_phase: row.get(7)?,
        phase_history: json_col(row, 8)?,
        working_dir: row.get(9)?,
        session_dir: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        git_branch: row.get(11)?,
        git_base_branch: row.get(12)?,
        git_worktree: row.get(13)?,
        spec_exists: row.get(14)?,
        plan_exists: row.get(15)?,
        checkpoints_total: row.get(16)?,
        checkpoints_completed: row.get(17)?,
        checkpoints_completed_list: json_col(row, 18)?,
        current_checkpoint: row.get(19)?,
        total_input_tokens: row.get(20)?,
        total_output_tokens: row.get(21)?,
        total_cost: row.get(22)?,
        error_message: row.get(23)?,
        error_phase: row.get(24)?,
        commits: json_col(row, 25)?,
        artifacts: json_col(row, 26)?,
        metadata: json_col(row, 27)?,
        created_at: row.get(28)?,
        updated_at: row.get(29)?,
        started_at: row.get(30)?,
        completed_at: row.get(31)?,
    })
}

/// JSON-encoded columns, serialized before the transaction opens.
struct JsonColumns {
    phase_history: String,
    completed_list: String,
    commits: String,
    artifacts: String,
    metadata: String,
}

impl JsonColumns {
    fn of(record: &SessionRecord) -> Result<Self, SessyncError> {
        Ok(Self {
            phase_history: serde_json::to_string(&record.phase_history)?,
            completed_list: serde_json::to_string(&record.checkpoints_completed_list)?,
            commits: serde_json::to_string(&record.commits)?,
            artifacts: serde_json::to_string(&record.artifacts)?,
            metadata: serde_json::to_string(&record.metadata)?,
        })
    }
}

impl SessionIndex for SqliteIndex {
    fn find_id(&self, slug: &str) -> Result<Option<i64>, SessyncError> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM sessions WHERE session_slug = ?1",
                params![slug],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn upsert(&self, record: &SessionRecord) -> Result<UpsertOutcome, SessyncError> {
        let json = JsonColumns::of(record)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM sessions WHERE session_slug = ?1",
                params![record.session_slug],
                |r| r.get(0),
            )
            .optional()?;

        let (id, created) = match existing {
            Some(id) => {
                // Token/cost counters and error fields belong to other writers.
                tx.execute(
                    "UPDATE sessions SET
                        title = ?2, description = ?3, session_type = ?4,
                        project_id = COALESCE(?5, project_id),
                        status = ?6, current_phase = ?7, phase_history = ?8,
                        working_dir = ?9, session_dir = ?10,
                        git_branch = ?11, git_base_branch = ?12, git_worktree = ?13,
                        spec_exists = ?14, plan_exists = ?15,
                        checkpoints_total = ?16, checkpoints_completed = ?17,
                        checkpoints_completed_list = ?18, current_checkpoint = ?19,
                        commits = ?20, artifacts = ?21, metadata = ?22,
                        started_at = ?23, completed_at = ?24,
                        updated_at = unixepoch('now')
                     WHERE id = ?1",
                    params![
                        id,
                        record.title,
                        record.description,
                        record.session_type,
                        record.project_id,
                        record.status,
                        record.current_phase,
                        json.phase_history,
                        record.working_dir,
                        record.session_dir,
                        record.git_branch,
                        record.git_base_branch,
                        record.git_worktree,
                        record.spec_exists,
                        record.plan_exists,
                        record.checkpoints_total,
                        record.checkpoints_completed,
                        json.completed_list,
                        record.current_checkpoint,
                        json.commits,
                        json.artifacts,
                        json.metadata,
                        record.started_at,
                        record.completed_at,
                    ],
                )?;
                (id, false)
            }
            None => {
                tx.execute(
                    "INSERT INTO sessions (
                        session_slug, title, description, session_type, project_id,
                        status, current_phase, phase_history, working_dir, session_dir,
                        git_branch, git_base_branch, git_worktree, spec_exists, plan_exists,
                        checkpoints_total, checkpoints_completed, checkpoints_completed_list,
                        current_checkpoint, commits, artifacts, metadata, started_at, completed_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                               ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                    params![
                        record.session_slug,
                        record.title,
                        record.description,
                        record.session_type,
                        record.project_id,
                        record.status,
                        record.current_phase,
                        json.phase_history,
                        record.working_dir,
                        record.session_dir,
                        record.git_branch,
                        record.git_base_branch,
                        record.git_worktree,
                        record.spec_exists,
                        record.plan_exists,
                        record.checkpoints_total,
                        record.checkpoints_completed,
                        json.completed_list,
                        record.current_checkpoint,
                        json.commits,
                        json.artifacts,
                        json.metadata,
                        record.started_at,
                        record.completed_at,
                    ],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        tx.commit()?;

        Ok(UpsertOutcome {
            id,
            phase: record.current_phase.clone(),
            status: record.status.clone(),
            created,
        })
    }
}
