pub mod cli;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod index;
pub mod mapper;
pub mod pool;
pub mod project;
pub mod schema;
pub mod state;
pub mod sync;
pub mod writer;

#[derive(Debug)]
pub enum SessyncError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(String),
}

impl std::fmt::Display for SessyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessyncError::Database(e) => write!(f, "database: {e}"),
            SessyncError::Io(e) => write!(f, "io: {e}"),
            SessyncError::Json(e) => write!(f, "json: {e}"),
            SessyncError::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for SessyncError {}

impl From<rusqlite::Error> for SessyncError {
    fn from(e: rusqlite::Error) -> Self {
        SessyncError::Database(e)
    }
}

impl From<std::io::Error> for SessyncError {
    fn from(e: std::io::Error) -> Self {
        SessyncError::Io(e)
    }
}

impl From<serde_json::Error> for SessyncError {
    fn from(e: serde_json::Error) -> Self {
        SessyncError::Json(e)
    }
}

impl From<rusqlite_migration::Error> for SessyncError {
    fn from(e: rusqlite_migration::Error) -> Self {
        match e {
            rusqlite_migration::Error::RusqliteError { query: _, err } => {
                SessyncError::Database(err)
            }
            other => SessyncError::Config(format!("migration: {other}")),
        }
    }
}
