//! Filesystem → index synchronization, one session at a time or a whole
//! project at once. The filesystem is authoritative; nothing here writes to it.

use crate::config::SessionLayout;
use crate::index::SessionIndex;
use crate::mapper::{SessionContext, map};
use crate::state::StateDocument;
use crate::SessyncError;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const REASON_NOT_FOUND: &str = "state document not found";
pub const REASON_MALFORMED: &str = "invalid state document";
pub const REASON_UNEXPECTED: &str = "unexpected error";

#[derive(Debug)]
pub enum SyncError {
    /// Session directory or its state document is missing.
    NotFound { slug: String, path: PathBuf },
    /// State document exists but does not decode.
    MalformedState { slug: String, detail: String },
    Unexpected { slug: String, detail: String },
}

impl SyncError {
    fn unexpected(slug: &str, e: impl std::fmt::Display) -> Self {
        SyncError::Unexpected {
            slug: slug.to_string(),
            detail: e.to_string(),
        }
    }

    pub fn slug(&self) -> &str {
        match self {
            SyncError::NotFound { slug, .. }
            | SyncError::MalformedState { slug, .. }
            | SyncError::Unexpected { slug, .. } => slug,
        }
    }

    /// Short machine-checkable code.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::NotFound { .. } => "not_found",
            SyncError::MalformedState { .. } => "malformed_state",
            SyncError::Unexpected { .. } => "unexpected",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::NotFound { .. } => REASON_NOT_FOUND,
            SyncError::MalformedState { .. } => REASON_MALFORMED,
            SyncError::Unexpected { .. } => REASON_UNEXPECTED,
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotFound { slug, path } => {
                write!(f, "session {slug}: not found at {}", path.display())
            }
            SyncError::MalformedState { slug, detail } => {
                write!(f, "session {slug}: invalid state document: {detail}")
            }
            SyncError::Unexpected { slug, detail } => write!(f, "session {slug}: {detail}"),
        }
    }
}

impl std::error::Error for SyncError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub session_slug: String,
    pub id: i64,
    pub current_phase: String,
    pub status: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub session_slug: String,
    pub code: &'static str,
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&SyncError> for SyncFailure {
    fn from(e: &SyncError) -> Self {
        let (details, path) = match e {
            SyncError::NotFound { path, .. } => (None, Some(path.display().to_string())),
            SyncError::MalformedState { detail, .. } | SyncError::Unexpected { detail, .. } => {
                (Some(detail.clone()), None)
            }
        };
        SyncFailure {
            session_slug: e.slug().to_string(),
            code: e.code(),
            error: e.reason(),
            details,
            path,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub synced: Vec<SyncOutcome>,
    pub failed: Vec<SyncFailure>,
    pub total: usize,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Read, decode, map and upsert a single session.
pub fn sync_one(
    index: &dyn SessionIndex,
    layout: &SessionLayout,
    working_dir: &Path,
    slug: &str,
    project_id: Option<i64>,
) -> Result<SyncOutcome, SyncError> {
    let session_dir = layout.session_dir(working_dir, slug);
    if !session_dir.is_dir() {
        return Err(SyncError::NotFound {
            slug: slug.to_string(),
            path: session_dir,
        });
    }

    let state_path = layout.state_path(&session_dir);
    let bytes = match std::fs::read(&state_path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::NotFound {
                slug: slug.to_string(),
                path: state_path,
            });
        }
        Err(e) => return Err(SyncError::unexpected(slug, SessyncError::Io(e))),
    };

    let doc = StateDocument::parse(&bytes).map_err(|e| SyncError::MalformedState {
        slug: slug.to_string(),
        detail: e.to_string(),
    })?;

    let spec_exists = session_dir.join(&layout.spec_file).exists();
    let plan_exists = session_dir.join(&layout.plan_file).exists();

    let existing_id = index
        .find_id(slug)
        .map_err(|e| SyncError::unexpected(slug, e))?;

    let working_dir_str = working_dir.to_string_lossy();
    let session_dir_str = session_dir.to_string_lossy();
    let record = map(
        &doc,
        &SessionContext {
            slug,
            working_dir: &working_dir_str,
            session_dir: &session_dir_str,
            project_id,
            spec_exists,
            plan_exists,
            existing_id,
        },
    );

    let out = index
        .upsert(&record)
        .map_err(|e| SyncError::unexpected(slug, e))?;

    log::debug!(
        "synced session {slug} (id={}, phase={}, status={}, legacy={})",
        out.id,
        out.phase,
        out.status,
        doc.is_legacy()
    );

    Ok(SyncOutcome {
        session_slug: slug.to_string(),
        id: out.id,
        current_phase: out.phase,
        status: out.status,
        created: out.created,
    })
}

/// Immediate subdirectories of the sessions root as `(slug, path)`, sorted by
/// slug. A missing root yields an empty list.
pub fn list_session_dirs(
    layout: &SessionLayout,
    working_dir: &Path,
) -> Result<Vec<(String, PathBuf)>, SessyncError> {
    let root = layout.sessions_root(working_dir);
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(&root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => dirs.push((name.to_string(), path.clone())),
            None => log::warn!("skipping non-UTF-8 session dir {}", path.display()),
        }
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

/// Sync every session under a project. One session failing never stops the
/// others; each outcome lands in the report.
pub fn sync_project(
    index: &dyn SessionIndex,
    layout: &SessionLayout,
    working_dir: &Path,
    project_id: Option<i64>,
) -> Result<BatchReport, SessyncError> {
    let mut report = BatchReport::default();

    for (slug, dir) in list_session_dirs(layout, working_dir)? {
        let state_path = layout.state_path(&dir);
        if !state_path.exists() {
            report.failed.push(SyncFailure::from(&SyncError::NotFound {
                slug,
                path: state_path,
            }));
            continue;
        }

        match sync_one(index, layout, working_dir, &slug, project_id) {
            Ok(out) => report.synced.push(out),
            Err(e) => {
                log::warn!("{e}");
                report.failed.push(SyncFailure::from(&e));
            }
        }
    }

    report.total = report.synced.len() + report.failed.len();
    log::info!(
        "batch sync of {}: {} synced, {} failed",
        working_dir.display(),
        report.synced.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SqliteIndex;
    use std::fs;

    fn write_session(wd: &Path, slug: &str, state: &str) -> PathBuf {
        let dir = SessionLayout::default().session_dir(wd, slug);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("state.json"), state).unwrap();
        dir
    }

    #[test]
    fn demo_scenario_then_resync() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();

        let dir = write_session(
            tmp.path(),
            "demo-1",
            r#"{"status": "build", "build_progress": {"checkpoints_total": 4, "checkpoints_completed": [1, 2]}}"#,
        );
        let first = sync_one(&index, &layout, tmp.path(), "demo-1", None).unwrap();
        assert!(first.created);
        assert_eq!(first.status, "build");

        let stored = index.get("demo-1").unwrap().unwrap();
        assert_eq!(stored.checkpoints_total, 4);
        assert_eq!(stored.checkpoints_completed, 2);
        assert_eq!(stored.current_phase, "spec");

        fs::write(
            dir.join("state.json"),
            r#"{"status": "build", "build_progress": {"checkpoints_total": 4, "checkpoints_completed": [1, 2, 3]}}"#,
        )
        .unwrap();
        let second = sync_one(&index, &layout, tmp.path(), "demo-1", None).unwrap();
        assert_eq!(second.id, first.id);
        assert!(!second.created);
        assert_eq!(index.get("demo-1").unwrap().unwrap().checkpoints_completed, 3);
    }

    #[test]
    fn resync_unchanged_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();
        write_session(
            tmp.path(),
            "same",
            r#"{"topic": "x", "build_progress": {"checkpoints_total": 1}, "note": "n"}"#,
        );

        sync_one(&index, &layout, tmp.path(), "same", None).unwrap();
        let mut a = index.get("same").unwrap().unwrap();
        sync_one(&index, &layout, tmp.path(), "same", None).unwrap();
        let mut b = index.get("same").unwrap().unwrap();

        assert_eq!(index.count().unwrap(), 1);
        // updated_at is engine-owned and moves with the wall clock
        a.updated_at = None;
        b.updated_at = None;
        assert_eq!(a, b);
    }

    #[test]
    fn artifact_probes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();
        let dir = write_session(tmp.path(), "art", "{}");
        fs::write(dir.join("spec.md"), "# spec").unwrap();

        sync_one(&index, &layout, tmp.path(), "art", None).unwrap();
        let r = index.get("art").unwrap().unwrap();
        assert!(r.spec_exists);
        assert!(!r.plan_exists);
        assert_eq!(r.session_dir, dir.to_string_lossy());

        fs::write(dir.join("plan.json"), "{}").unwrap();
        sync_one(&index, &layout, tmp.path(), "art", None).unwrap();
        assert!(index.get("art").unwrap().unwrap().plan_exists);
    }

    #[test]
    fn missing_dir_and_missing_state_are_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();

        let err = sync_one(&index, &layout, tmp.path(), "ghost", None).unwrap_err();
        assert_eq!(err.code(), "not_found");

        fs::create_dir_all(layout.session_dir(tmp.path(), "empty")).unwrap();
        let err = sync_one(&index, &layout, tmp.path(), "empty", None).unwrap_err();
        assert!(matches!(err, SyncError::NotFound { ref path, .. } if path.ends_with("state.json")));
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn malformed_state_reported_with_detail() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();
        write_session(tmp.path(), "bad", "{not json");

        let err = sync_one(&index, &layout, tmp.path(), "bad", None).unwrap_err();
        let SyncError::MalformedState { detail, .. } = &err else {
            panic!("expected malformed, got {err}");
        };
        assert!(!detail.is_empty());
        assert_eq!(err.reason(), REASON_MALFORMED);
    }

    #[test]
    fn malformed_resync_keeps_previous_record() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();
        let dir = write_session(tmp.path(), "keep", r#"{"topic": "good"}"#);
        sync_one(&index, &layout, tmp.path(), "keep", None).unwrap();

        fs::write(dir.join("state.json"), "[]").unwrap();
        assert!(sync_one(&index, &layout, tmp.path(), "keep", None).is_err());
        assert_eq!(
            index.get("keep").unwrap().unwrap().title.as_deref(),
            Some("good")
        );
    }

    #[test]
    fn batch_isolates_failures() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();
        write_session(tmp.path(), "a-ok", r#"{"topic": "a"}"#);
        write_session(tmp.path(), "b-bad", "{{{{");
        write_session(tmp.path(), "c-ok", r#"{"build_progress": {}}"#);
        fs::create_dir_all(layout.session_dir(tmp.path(), "d-empty")).unwrap();
        fs::write(layout.sessions_root(tmp.path()).join("README.md"), "not a session").unwrap();

        let report = sync_project(&index, &layout, tmp.path(), None).unwrap();
        assert_eq!(report.total, 4);
        let synced: Vec<_> = report.synced.iter().map(|s| s.session_slug.as_str()).collect();
        assert_eq!(synced, vec!["a-ok", "c-ok"]);

        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].session_slug, "b-bad");
        assert_eq!(report.failed[0].code, "malformed_state");
        assert!(report.failed[0].details.is_some());
        assert_eq!(report.failed[1].session_slug, "d-empty");
        assert_eq!(report.failed[1].error, REASON_NOT_FOUND);
        assert!(report.failed[1].path.is_some());
        assert!(!report.is_clean());
    }

    #[test]
    fn batch_links_project() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = SessionLayout::default();
        let index = SqliteIndex::in_memory().unwrap();
        let pid = index.ensure_project(&tmp.path().to_string_lossy()).unwrap();
        write_session(tmp.path(), "s1", "{}");

        let report = sync_project(&index, &layout, tmp.path(), Some(pid)).unwrap();
        assert!(report.is_clean());
        assert_eq!(index.get("s1").unwrap().unwrap().project_id, Some(pid));
    }

    #[test]
    fn batch_without_sessions_root_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = SqliteIndex::in_memory().unwrap();
        let report = sync_project(&index, &SessionLayout::default(), tmp.path(), None).unwrap();
        assert_eq!(report.total, 0);
        assert!(report.synced.is_empty());
    }

    #[test]
    fn failure_serializes_compactly() {
        let f = SyncFailure::from(&SyncError::MalformedState {
            slug: "x".into(),
            detail: "EOF".into(),
        });
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["code"], "malformed_state");
        assert_eq!(v["error"], REASON_MALFORMED);
        assert!(v.get("path").is_none());
    }
}
