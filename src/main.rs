use clap::Parser;
use serde::Serialize;
use sessync::cli::{Cli, Command, ShowArgs, SyncArgs, SyncProjectArgs, TargetArgs};
use sessync::config::{SessyncConfig, load_config};
use sessync::dispatch::{SyncContext, queue_project_sync};
use sessync::index::SqliteIndex;
use sessync::pool::SyncPool;
use sessync::sync::{SyncFailure, sync_one, sync_project};
use sessync::SessyncError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".sessync").join("index.db")
}

fn working_dir(target: &TargetArgs) -> Result<PathBuf, SessyncError> {
    match &target.cwd {
        Some(p) => Ok(p.clone()),
        None => Ok(std::env::current_dir()?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SessyncError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_sync(
    db_path: &Path,
    config: &SessyncConfig,
    args: &SyncArgs,
) -> Result<ExitCode, SessyncError> {
    let wd = working_dir(&args.target)?;
    let index = SqliteIndex::open(db_path)?;
    match sync_one(
        &index,
        &config.layout,
        &wd,
        &args.slug,
        args.target.project_id,
    ) {
        Ok(out) => {
            print_json(&out)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            log::warn!("{e}");
            print_json(&SyncFailure::from(&e))?;
            Ok(ExitCode::from(1))
        }
    }
}

fn handle_sync_project(
    db_path: &Path,
    config: &SessyncConfig,
    args: &SyncProjectArgs,
) -> Result<ExitCode, SessyncError> {
    let wd = working_dir(&args.target)?;
    let index = SqliteIndex::open(db_path)?;

    let project_id = match args.target.project_id {
        Some(id) => Some(id),
        None if args.register => Some(index.ensure_project(&wd.to_string_lossy())?),
        None => None,
    };

    if !args.background {
        let report = sync_project(&index, &config.layout, &wd, project_id)?;
        print_json(&report)?;
        return Ok(ExitCode::SUCCESS);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(SessyncError::Io)?;

    let pool = SyncPool::new(rt.handle(), &config.pool);
    let ctx = SyncContext {
        pool: pool.clone(),
        index: Arc::new(index),
        layout: config.layout.clone(),
        working_dir: wd,
        project_id,
    };
    let queued = queue_project_sync(&ctx, project_id);

    let report = rt.block_on(async {
        pool.idle().await;
        pool.shutdown().await
    });

    print_json(&serde_json::json!({
        "queued": queued,
        "project_id": project_id,
        "cancelled": report.cancelled,
        "abandoned": report.abandoned,
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn handle_show(db_path: &Path, args: &ShowArgs) -> Result<ExitCode, SessyncError> {
    let index = SqliteIndex::open_readonly(db_path)?;
    match index.get(&args.slug)? {
        Some(record) => {
            print_json(&record)?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("sessync: no indexed session {}", args.slug);
            Ok(ExitCode::from(1))
        }
    }
}

fn run() -> Result<ExitCode, SessyncError> {
    let cli = Cli::parse();
    let config = load_config()?;
    let db_path = cli.db.unwrap_or_else(default_db_path);

    match &cli.command {
        Command::Sync(args) => handle_sync(&db_path, &config, args),
        Command::SyncProject(args) => handle_sync_project(&db_path, &config, args),
        Command::Show(args) => handle_show(&db_path, args),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("sessync=info"))
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sessync: {e}");
            ExitCode::from(1)
        }
    }
}
