use crate::SessyncError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
pub struct SessyncConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub layout: SessionLayout,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Upper bound on sync tasks running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Queued tasks beyond this are dropped (and logged), not buffered.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl PoolConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    256
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Where session artifacts live, relative to a project's working directory.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_spec_file")]
    pub spec_file: String,
    #[serde(default = "default_plan_file")]
    pub plan_file: String,
}

impl Default for SessionLayout {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            state_file: default_state_file(),
            spec_file: default_spec_file(),
            plan_file: default_plan_file(),
        }
    }
}

impl SessionLayout {
    pub fn sessions_root(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(&self.sessions_dir)
    }

    pub fn session_dir(&self, working_dir: &Path, slug: &str) -> PathBuf {
        self.sessions_root(working_dir).join(slug)
    }

    pub fn state_path(&self, session_dir: &Path) -> PathBuf {
        session_dir.join(&self.state_file)
    }
}

fn default_sessions_dir() -> String {
    "agents/sessions".into()
}

fn default_state_file() -> String {
    "state.json".into()
}

fn default_spec_file() -> String {
    "spec.md".into()
}

fn default_plan_file() -> String {
    "plan.json".into()
}

/// Load config from SESSYNC_CONFIG env var, ~/.sessync/config.toml, or defaults.
pub fn load_config() -> Result<SessyncConfig, SessyncError> {
    let path = config_path();
    match path {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(&p)?;
            let config: SessyncConfig = toml::from_str(&content)
                .map_err(|e| SessyncError::Config(format!("{}: {e}", p.display())))?;
            validate_config(&config)?;
            Ok(config)
        }
        _ => Ok(SessyncConfig::default()),
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("SESSYNC_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let home = std::env::var("HOME").ok()?;
    Some(Path::new(&home).join(".sessync").join("config.toml"))
}

fn validate_config(config: &SessyncConfig) -> Result<(), SessyncError> {
    if config.pool.max_concurrent == 0 {
        return Err(SessyncError::Config("pool.max_concurrent must be at least 1".into()));
    }
    if config.pool.queue_capacity == 0 {
        return Err(SessyncError::Config("pool.queue_capacity must be at least 1".into()));
    }
    let layout = &config.layout;
    for (key, value) in [
        ("sessions_dir", &layout.sessions_dir),
        ("state_file", &layout.state_file),
        ("spec_file", &layout.spec_file),
        ("plan_file", &layout.plan_file),
    ] {
        if value.trim().is_empty() {
            return Err(SessyncError::Config(format!("layout.{key} must not be empty")));
        }
    }
    Ok(())
}
