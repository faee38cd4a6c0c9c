use crate::state::{
    CurrentState, GitContext, LegacyState, Overflow, Progress, RawCommit, StateDocument,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Phases that carry `{phase}_started_at` / `{phase}_completed_at` history.
const HISTORY_PHASES: [&str; 4] = ["spec", "plan", "build", "docs"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: Option<String>,
    pub message: Option<String>,
    pub checkpoint: Option<i64>,
    pub created_at: Option<String>,
}

/// Canonical index row for one session. Everything except `id`, the token/cost
/// counters, the error fields and `created_at`/`updated_at` derives from the
/// state document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub id: Option<i64>,
    pub session_slug: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub session_type: String,
    pub project_id: Option<i64>,
    pub status: String,
    pub current_phase: String,
    pub phase_history: Map<String, Value>,
    pub working_dir: String,
    pub session_dir: String,
    pub git_branch: Option<String>,
    pub git_base_branch: Option<String>,
    pub git_worktree: Option<String>,
    pub spec_exists: bool,
    pub plan_exists: bool,
    pub checkpoints_total: i64,
    pub checkpoints_completed: i64,
    pub checkpoints_completed_list: Vec<i64>,
    pub current_checkpoint: Option<i64>,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost: f64,
    pub error_message: Option<String>,
    pub error_phase: Option<String>,
    pub commits: Vec<Commit>,
    pub artifacts: BTreeMap<String, String>,
    pub metadata: Overflow,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// Everything the mapper needs that does not come from the document itself.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext<'a> {
    pub slug: &'a str,
    pub working_dir: &'a str,
    pub session_dir: &'a str,
    pub project_id: Option<i64>,
    pub spec_exists: bool,
    pub plan_exists: bool,
    pub existing_id: Option<i64>,
}

/// Document fields after generation-specific normalization.
struct Normalized {
    title: Option<String>,
    description: Option<String>,
    session_type: String,
    current_phase: String,
    status: String,
    phase_history: Map<String, Value>,
    git: GitContext,
    progress: Progress,
    commits: Vec<Commit>,
    artifacts: BTreeMap<String, String>,
    metadata: Overflow,
}

pub fn default_artifacts() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("spec".into(), "spec.md".into()),
        ("plan".into(), "plan.json".into()),
        ("plan_readable".into(), "plan.md".into()),
    ])
}

fn session_type(session_type: &Option<String>, granularity: &Option<String>) -> String {
    session_type
        .clone()
        .or_else(|| granularity.clone())
        .unwrap_or_else(|| "full".into())
}

fn commits_from(raw: &Option<Vec<RawCommit>>, legacy: bool) -> Vec<Commit> {
    raw.iter()
        .flatten()
        .map(|c| Commit {
            sha: c.sha.clone(),
            message: c.message.clone(),
            checkpoint: if legacy {
                c.checkpoint_id.or(c.checkpoint)
            } else {
                c.checkpoint.or(c.checkpoint_id)
            },
            created_at: c.created_at.clone(),
        })
        .collect()
}

fn normalize_current(s: &CurrentState) -> Normalized {
    Normalized {
        title: s.topic.clone(),
        description: s.description.clone(),
        session_type: session_type(&s.session_type, &s.granularity),
        current_phase: s.current_phase.clone().unwrap_or_else(|| "spec".into()),
        status: s.status.clone().unwrap_or_else(|| "active".into()),
        phase_history: s.phase_history.clone().unwrap_or_default(),
        git: s.git.clone().unwrap_or_default(),
        progress: s.build_progress.clone().unwrap_or_default(),
        commits: commits_from(&s.commits, false),
        artifacts: s.artifacts.clone().unwrap_or_else(default_artifacts),
        metadata: s.extra.clone(),
    }
}

fn normalize_legacy(s: &LegacyState) -> Normalized {
    let phases = s.phases.clone().unwrap_or_default();
    // v1 had no top-level status; a build still in progress reads as "active"
    let status = s.status.clone().unwrap_or_else(|| "active".into());

    let current_phase = s.current_phase.clone().unwrap_or_else(|| {
        phases
            .ordered()
            .iter()
            .rev()
            .find(|(_, p)| p.and_then(|p| p.status.as_deref()) == Some("in_progress"))
            .map(|(name, _)| (*name).to_string())
            .unwrap_or_else(|| "spec".into())
    });

    let mut phase_history = Map::new();
    for (name, phase) in phases.ordered() {
        let started = phase.and_then(|p| p.started_at.clone());
        // spec and plan are "finalized"; build is "completed"
        let completed = phase.and_then(|p| {
            if name == "build" {
                p.completed_at.clone()
            } else {
                p.finalized_at.clone()
            }
        });
        phase_history.insert(format!("{name}_started_at"), started.map_or(Value::Null, Value::String));
        phase_history.insert(
            format!("{name}_completed_at"),
            completed.map_or(Value::Null, Value::String),
        );
    }
    phase_history.insert("docs_started_at".into(), Value::Null);
    phase_history.insert("docs_completed_at".into(), Value::Null);

    Normalized {
        title: s.topic.clone(),
        description: s.description.clone(),
        session_type: session_type(&s.session_type, &s.granularity),
        current_phase,
        status,
        phase_history,
        git: s.git.clone().unwrap_or_default(),
        progress: s.plan_state.clone().unwrap_or_default(),
        commits: commits_from(&s.commits, true),
        artifacts: s.artifacts.clone().unwrap_or_else(default_artifacts),
        metadata: s.extra.clone(),
    }
}

fn history_timestamp(history: &Map<String, Value>, phase: &str, edge: &str) -> Option<String> {
    history
        .get(&format!("{phase}_{edge}_at"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// First recorded phase start, in workflow order.
fn started_at(history: &Map<String, Value>) -> Option<String> {
    HISTORY_PHASES
        .iter()
        .find_map(|p| history_timestamp(history, p, "started"))
}

/// Last recorded phase completion, but only once the session is finished.
fn completed_at(history: &Map<String, Value>, phase: &str, status: &str) -> Option<String> {
    if phase != "complete" && status != "complete" {
        return None;
    }
    HISTORY_PHASES
        .iter()
        .rev()
        .find_map(|p| history_timestamp(history, p, "completed"))
}

/// Project a decoded state document onto the canonical index record.
pub fn map(doc: &StateDocument, ctx: &SessionContext<'_>) -> SessionRecord {
    let n = match doc {
        StateDocument::V2(s) => normalize_current(s),
        StateDocument::V1(s) => normalize_legacy(s),
    };

    let completed_list = n.progress.checkpoints_completed.unwrap_or_default();
    let started = started_at(&n.phase_history);
    let completed = completed_at(&n.phase_history, &n.current_phase, &n.status);

    SessionRecord {
        id: ctx.existing_id,
        session_slug: ctx.slug.to_string(),
        title: n.title,
        description: n.description,
        session_type: n.session_type,
        project_id: ctx.project_id,
        status: n.status,
        current_phase: n.current_phase,
        phase_history: n.phase_history,
        working_dir: ctx.working_dir.to_string(),
        session_dir: ctx.session_dir.to_string(),
        git_branch: n.git.branch,
        git_base_branch: n.git.base_branch,
        git_worktree: n.git.worktree,
        spec_exists: ctx.spec_exists,
        plan_exists: ctx.plan_exists,
        checkpoints_total: n.progress.checkpoints_total.unwrap_or(0),
        checkpoints_completed: completed_list.len() as i64,
        checkpoints_completed_list: completed_list,
        current_checkpoint: n.progress.current_checkpoint,
        total_input_tokens: 0,
        total_output_tokens: 0,
        total_cost: 0.0,
        error_message: None,
        error_phase: None,
        commits: n.commits,
        artifacts: n.artifacts,
        metadata: n.metadata,
        created_at: None,
        updated_at: None,
        started_at: started,
        completed_at: completed,
    }
}
