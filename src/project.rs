use crate::SessyncError;
use rusqlite::{Connection, OptionalExtension, params};

/// Derive a project name from a working directory path.
/// Strips common prefixes (~/workspace, ~/dev, ~/src, ~/projects).
pub fn derive_project(cwd: &str) -> String {
    if cwd.is_empty() {
        return "unknown".into();
    }

    let home = std::env::var("HOME").unwrap_or_default();
    let rel = if !home.is_empty() {
        match cwd.strip_prefix(&home) {
            Some("") | Some("/") => return "home".into(),
            Some(rest) => rest.strip_prefix('/').unwrap_or(rest),
            None => {
                // Not under $HOME, use the last path component
                return cwd
                    .rsplit('/')
                    .find(|s| !s.is_empty())
                    .unwrap_or("unknown")
                    .into();
            }
        }
    } else {
        cwd
    };

    let skip = ["workspace", "dev", "src", "projects"];
    let mut last_part = "";
    for part in rel.split('/').filter(|p| !p.is_empty()) {
        last_part = part;
        if !skip.contains(&part) {
            return part.into();
        }
    }

    if last_part.is_empty() {
        "unknown".into()
    } else {
        last_part.into()
    }
}

/// Return the project id for `working_dir`, registering it on first sight.
pub fn ensure_project(conn: &Connection, working_dir: &str) -> Result<i64, SessyncError> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM projects WHERE working_dir = ?1",
            params![working_dir],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO projects (name, working_dir) VALUES (?1, ?2)",
        params![derive_project(working_dir), working_dir],
    )?;
    let id = conn.last_insert_rowid();
    log::info!("registered project {id} for {working_dir}");
    Ok(id)
}
