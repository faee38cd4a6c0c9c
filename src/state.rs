//! Typed decode of the on-disk session state document.
//!
//! Two generations of `state.json` are in the wild. Generation is decided once,
//! here, and the rest of the crate only ever sees a [`StateDocument`] variant.
//!
//! - v2 keeps checkpoint progress under `build_progress` and phase timestamps
//!   under `phase_history`.
//! - v1 keeps progress under `plan_state` and per-phase objects under `phases`.
//!
//! Top-level keys a generation does not consume land in `extra` as raw JSON
//! text, exactly as they appeared in the file.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keys whose presence marks a v2 document.
const V2_MARKERS: [&str; 2] = ["build_progress", "phase_history"];

const CURRENT_KEYS: [&str; 11] = [
    "topic",
    "description",
    "current_phase",
    "status",
    "session_type",
    "granularity",
    "phase_history",
    "build_progress",
    "git",
    "commits",
    "artifacts",
];

const LEGACY_KEYS: [&str; 11] = [
    "topic",
    "description",
    "current_phase",
    "status",
    "session_type",
    "granularity",
    "phases",
    "plan_state",
    "git",
    "commits",
    "artifacts",
];

/// Unconsumed top-level entries, values kept as the raw text from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Overflow(BTreeMap<String, Box<RawValue>>);

impl Overflow {
    /// Raw JSON text of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.get())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl PartialEq for Overflow {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|((ka, va), (kb, vb))| ka == kb && va.get() == vb.get())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateDocument {
    V1(LegacyState),
    V2(CurrentState),
}

impl StateDocument {
    /// Parse raw file bytes. Any error here means the document is malformed.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, Box<RawValue>> = serde_json::from_slice(bytes)?;
        let is_v2 = V2_MARKERS.iter().any(|k| raw.contains_key(*k));

        if is_v2 {
            let mut s: CurrentState = serde_json::from_slice(bytes)?;
            s.extra = overflow(raw, &CURRENT_KEYS, s.session_type.is_none());
            Ok(StateDocument::V2(s))
        } else {
            let mut s: LegacyState = serde_json::from_slice(bytes)?;
            s.extra = overflow(raw, &LEGACY_KEYS, s.session_type.is_none());
            Ok(StateDocument::V1(s))
        }
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        Self::parse(&serde_json::to_vec(&value)?)
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, StateDocument::V1(_))
    }
}

/// `granularity` only counts as consumed when it stands in for a missing
/// `session_type`.
fn overflow(
    raw: BTreeMap<String, Box<RawValue>>,
    consumed: &[&str],
    granularity_used: bool,
) -> Overflow {
    Overflow(
        raw.into_iter()
            .filter(|(k, _)| {
                !consumed.contains(&k.as_str()) || (k == "granularity" && !granularity_used)
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Progress {
    pub checkpoints_total: Option<i64>,
    pub checkpoints_completed: Option<Vec<i64>>,
    pub current_checkpoint: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GitContext {
    pub branch: Option<String>,
    pub base_branch: Option<String>,
    pub worktree: Option<String>,
}

/// Commit entry as written by either generation. v1 wrote `checkpoint_id`,
/// v2 writes `checkpoint`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCommit {
    pub sha: Option<String>,
    pub message: Option<String>,
    pub checkpoint: Option<i64>,
    pub checkpoint_id: Option<i64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CurrentState {
    pub topic: Option<String>,
    pub description: Option<String>,
    pub current_phase: Option<String>,
    pub status: Option<String>,
    pub session_type: Option<String>,
    pub granularity: Option<String>,
    pub phase_history: Option<Map<String, Value>>,
    pub build_progress: Option<Progress>,
    pub git: Option<GitContext>,
    pub commits: Option<Vec<RawCommit>>,
    pub artifacts: Option<BTreeMap<String, String>>,
    #[serde(skip)]
    pub extra: Overflow,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyPhase {
    pub status: Option<String>,
    pub started_at: Option<String>,
    pub finalized_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyPhases {
    pub spec: Option<LegacyPhase>,
    pub plan: Option<LegacyPhase>,
    pub build: Option<LegacyPhase>,
}

impl LegacyPhases {
    /// Phases in workflow order, paired with their names.
    pub fn ordered(&self) -> [(&'static str, Option<&LegacyPhase>); 3] {
        [
            ("spec", self.spec.as_ref()),
            ("plan", self.plan.as_ref()),
            ("build", self.build.as_ref()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyState {
    pub topic: Option<String>,
    pub description: Option<String>,
    pub current_phase: Option<String>,
    pub status: Option<String>,
    pub session_type: Option<String>,
    pub granularity: Option<String>,
    pub phases: Option<LegacyPhases>,
    pub plan_state: Option<Progress>,
    pub git: Option<GitContext>,
    pub commits: Option<Vec<RawCommit>>,
    pub artifacts: Option<BTreeMap<String, String>>,
    #[serde(skip)]
    pub extra: Overflow,
}
