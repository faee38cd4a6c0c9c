//! Save-triggered and project-open triggered dispatch onto the sync pool.
//!
//! Nothing here blocks on the index: triggers only enqueue. Every failure,
//! whether at submission or inside the task, ends in the log.

use crate::config::SessionLayout;
use crate::index::SessionIndex;
use crate::pool::SyncPool;
use crate::sync::{list_session_dirs, sync_one, sync_project};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Invoked by the state writer with the session directory after each save.
pub type SaveHook = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Clone)]
pub struct SyncContext {
    pub pool: SyncPool,
    pub index: Arc<dyn SessionIndex>,
    pub layout: SessionLayout,
    pub working_dir: PathBuf,
    pub project_id: Option<i64>,
}

impl SyncContext {
    /// Enqueue one sync for `slug`. Returns whether the pool accepted it.
    fn submit_sync(&self, working_dir: PathBuf, slug: String, project_id: Option<i64>) -> bool {
        let index = self.index.clone();
        let layout = self.layout.clone();
        let task_slug = slug.clone();
        let submitted = self.pool.submit(slug.clone(), move || {
            sync_one(index.as_ref(), &layout, &working_dir, &task_slug, project_id).map(|_| ())
        });
        match submitted {
            Ok(()) => true,
            Err(e) => {
                log::warn!("sync for session {slug} not queued: {e}");
                false
            }
        }
    }
}

/// Build the hook handed to `StateWriter::with_hook`. Only the final path
/// component is used; the session is always resolved under `ctx.working_dir`.
pub fn make_sync_callback(ctx: SyncContext) -> SaveHook {
    Arc::new(move |session_dir: &Path| {
        let Some(slug) = session_dir.file_name().and_then(|n| n.to_str()) else {
            log::warn!(
                "cannot derive session slug from {}, skipping sync",
                session_dir.display()
            );
            return;
        };
        ctx.submit_sync(ctx.working_dir.clone(), slug.to_string(), ctx.project_id);
    })
}

/// Queue one sync per session directory in the project. Returns how many
/// tasks the pool accepted.
pub fn queue_project_sync(ctx: &SyncContext, project_id: Option<i64>) -> usize {
    let dirs = match list_session_dirs(&ctx.layout, &ctx.working_dir) {
        Ok(d) => d,
        Err(e) => {
            log::warn!(
                "cannot list sessions under {}: {e}",
                ctx.working_dir.display()
            );
            return 0;
        }
    };

    let total = dirs.len();
    let queued = dirs
        .into_iter()
        .filter(|(slug, _)| ctx.submit_sync(ctx.working_dir.clone(), slug.clone(), project_id))
        .count();

    log::info!(
        "queued {queued}/{total} session syncs for {}",
        ctx.working_dir.display()
    );
    queued
}

/// Queue a single task that batch-syncs the whole project and logs the
/// resulting report.
pub fn queue_batch_report(ctx: &SyncContext, project_id: Option<i64>) -> bool {
    let index = ctx.index.clone();
    let layout = ctx.layout.clone();
    let working_dir = ctx.working_dir.clone();
    let label = format!("batch:{}", working_dir.display());

    let submitted = ctx.pool.submit(label.clone(), move || {
        match sync_project(index.as_ref(), &layout, &working_dir, project_id) {
            Ok(report) => {
                for f in &report.failed {
                    log::warn!(
                        "session {} failed to sync: {} ({})",
                        f.session_slug,
                        f.error,
                        f.details.as_deref().unwrap_or("-")
                    );
                }
            }
            Err(e) => log::error!("batch sync of {} failed: {e}", working_dir.display()),
        }
        Ok(())
    });

    match submitted {
        Ok(()) => true,
        Err(e) => {
            log::warn!("{label} not queued: {e}");
            false
        }
    }
}
