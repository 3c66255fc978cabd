//! Injected storage context: connection, write lock and repair bookkeeping.

use super::StoreError;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Inner {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    repairs: AtomicUsize,
}

/// Shared handle to one SQLite database.
///
/// The connection sits behind a mutex; holding the guard is the critical
/// section every store write runs in. Clones share the connection, the lock
/// and the repair counter.
#[derive(Clone)]
pub struct StorageContext {
    inner: Arc<Inner>,
    today: Option<NaiveDate>,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("path", &self.inner.path)
            .field("today", &self.today)
            .finish()
    }
}

impl StorageContext {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        Ok(Self::from_connection(conn, Some(path.to_path_buf())))
    }

    /// Private in-memory database, mainly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?, None))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                conn: Mutex::new(conn),
                repairs: AtomicUsize::new(0),
            }),
            today: None,
        }
    }

    /// Pin "today" instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Number of primary-key rebuilds performed through this context.
    pub fn repairs(&self) -> usize {
        self.inner.repairs.load(Ordering::SeqCst)
    }

    pub(crate) fn record_repair(&self) {
        self.inner.repairs.fetch_add(1, Ordering::SeqCst);
    }

    /// Enter the critical section.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.inner.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` with the raw connection under the lock. Intended for readers
    /// and for tests that need to inspect or damage the schema.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock()?;
        f(&mut conn)
    }
}
