use rusqlite_migration::{M, Migrations};
use std::sync::LazyLock;

pub static MIGRATIONS: LazyLock<Migrations<'static>> = LazyLock::new(|| {
    Migrations::new(vec![
        M::up(
            "
CREATE TABLE projects (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    working_dir TEXT NOT NULL UNIQUE,
    created_at  INTEGER NOT NULL DEFAULT (unixepoch('now'))
);

CREATE TABLE sessions (
    id                  INTEGER PRIMARY KEY,
    session_slug        TEXT NOT NULL UNIQUE,
    title               TEXT,
    description         TEXT,
    session_type        TEXT NOT NULL DEFAULT 'full',
    project_id          INTEGER REFERENCES projects(id),
    status              TEXT NOT NULL DEFAULT 'active',
    current_phase       TEXT NOT NULL DEFAULT 'spec',
    phase_history       TEXT NOT NULL DEFAULT '{}',
    working_dir         TEXT NOT NULL,
    session_dir         TEXT,
    git_branch          TEXT,
    git_base_branch     TEXT,
    git_worktree        TEXT,
    spec_exists         INTEGER NOT NULL DEFAULT 0,
    plan_exists         INTEGER NOT NULL DEFAULT 0,
    checkpoints_total   INTEGER NOT NULL DEFAULT 0,
    checkpoints_completed INTEGER NOT NULL DEFAULT 0,
    checkpoints_completed_list TEXT NOT NULL DEFAULT '[]',
    current_checkpoint  INTEGER,
    total_input_tokens  INTEGER NOT NULL DEFAULT 0,
    total_output_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost          REAL NOT NULL DEFAULT 0.0,
    error_message       TEXT,
    error_phase         TEXT,
    commits             TEXT NOT NULL DEFAULT '[]',
    artifacts           TEXT NOT NULL DEFAULT '{}',
    metadata            TEXT NOT NULL DEFAULT '{}',
    created_at          INTEGER NOT NULL DEFAULT (unixepoch('now')),
    updated_at          INTEGER NOT NULL DEFAULT (unixepoch('now')),
    started_at          TEXT,
    completed_at        TEXT
);

CREATE INDEX idx_sessions_project ON sessions(project_id);
CREATE INDEX idx_sessions_status ON sessions(status);
CREATE INDEX idx_sessions_phase ON sessions(current_phase);
",
        ),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_valid() {
        assert!(MIGRATIONS.validate().is_ok());
    }

    #[test]
    fn migrations_apply_to_memory_db() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        MIGRATIONS.to_latest(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"projects".into()));
        assert!(tables.contains(&"sessions".into()));
    }

    #[test]
    fn slug_is_unique() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        MIGRATIONS.to_latest(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO sessions (session_slug, working_dir) VALUES ('a', '/w')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO sessions (session_slug, working_dir) VALUES ('a', '/w')",
            [],
        );
        assert!(dup.is_err());
    }
}
