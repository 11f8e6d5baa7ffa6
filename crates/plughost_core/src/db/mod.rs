//! SQLite storage bootstrap and the extension-facing database boundary.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the host.
//! - Apply schema migrations in deterministic order.
//! - Expose the parameterized query/get/run surface handed to extensions.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Host code must not read/write host tables before migrations succeed.

use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

mod boundary;
pub mod migrations;
mod open;

pub use boundary::{Database, DbFuture, Row, RunResult, SqliteDatabase};
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Connection shared between the database boundary and the settings store.
pub type SharedConnection = Arc<Mutex<Connection>>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    InvalidData(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidData(message) => write!(f, "invalid database data: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Wraps an opened connection for sharing across host services.
pub fn share(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}
