//! Session state writer. The only place that knows about syncing is the
//! optional save hook; without one, saves touch nothing but the filesystem.

use crate::config::SessionLayout;
use crate::dispatch::SaveHook;
use crate::SessyncError;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub struct StateWriter {
    session_dir: PathBuf,
    state_file: String,
    hook: Option<SaveHook>,
}

impl StateWriter {
    pub fn new(session_dir: impl Into<PathBuf>, layout: &SessionLayout) -> Self {
        Self {
            session_dir: session_dir.into(),
            state_file: layout.state_file.clone(),
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: SaveHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.session_dir.join(&self.state_file)
    }

    /// Write `state` atomically (temp file + rename), then fire the hook.
    /// The hook runs only after the rename lands.
    pub fn save(&self, state: &Value) -> Result<PathBuf, SessyncError> {
        std::fs::create_dir_all(&self.session_dir)?;
        let path = self.state_path();
        let tmp = self.session_dir.join(format!(".{}.tmp", self.state_file));

        let body = serde_json::to_vec_pretty(state)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;

        if let Some(hook) = &self.hook {
            hook(&self.session_dir);
        }
        Ok(path)
    }

    /// Read the current state document, `None` if it was never saved.
    pub fn load(&self) -> Result<Option<Value>, SessyncError> {
        match std::fs::read(self.state_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[test]
    fn save_without_hook_writes_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("agents/sessions/s1");
        let writer = StateWriter::new(&dir, &SessionLayout::default());

        assert!(writer.load().unwrap().is_none());
        let path = writer.save(&json!({"topic": "x"})).unwrap();
        assert_eq!(path, dir.join("state.json"));
        assert_eq!(writer.load().unwrap().unwrap()["topic"], "x");
        assert!(!dir.join(".state.json.tmp").exists());
    }

    #[test]
    fn hook_fires_after_each_save_with_session_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("s2");
        let seen: Arc<Mutex<Vec<(PathBuf, bool)>>> = Arc::default();

        let log = seen.clone();
        let hook: SaveHook = Arc::new(move |d: &Path| {
            // the file must already be in place when the hook runs
            log.lock().unwrap().push((d.to_path_buf(), d.join("state.json").exists()));
        });
        let writer = StateWriter::new(&dir, &SessionLayout::default()).with_hook(hook);

        writer.save(&json!({"n": 1})).unwrap();
        writer.save(&json!({"n": 2})).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(d, exists)| d == &dir && *exists));
    }

    #[test]
    fn custom_state_file_name() {
        let tmp = TempDir::new().unwrap();
        let layout = SessionLayout {
            state_file: "session.json".into(),
            ..SessionLayout::default()
        };
        let writer = StateWriter::new(tmp.path(), &layout);
        writer.save(&json!({})).unwrap();
        assert!(tmp.path().join("session.json").exists());
    }
}
