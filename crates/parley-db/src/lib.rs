pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::info;

pub use error::{DbError, Result};
pub use store::{ChatStore, NewMessage};

pub struct Database {
    conn: Mutex<Connection>,
    /// Last timestamp handed out; keeps write stamps strictly increasing.
    clock: Mutex<DateTime<Utc>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&conn)
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Current time at microsecond precision, strictly later than any
    /// timestamp previously returned by this database.
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = Utc::now().trunc_subsecs(6);
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }
}
