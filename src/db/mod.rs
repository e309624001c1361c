use rusqlite::Connection;
use std::path::Path;
use tokio::task;
use crate::error::{Result, WikinetError};

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA busy_timeout = 5000;";

/// Database connection wrapper
#[derive(Debug, Clone)]
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection, creating the parent directory if needed
    pub fn open_connection(&self) -> Result<Connection> {
        open_with_pragmas(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_with_pragmas(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| WikinetError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

fn open_with_pragmas(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path).map_err(WikinetError::Database)?;

    // WAL mode: writers append to the log and readers keep going, so a crash
    // mid-write never leaves a half-written cache row visible.
    conn.execute_batch(PRAGMAS)?;

    Ok(conn)
}

pub mod migrate;
