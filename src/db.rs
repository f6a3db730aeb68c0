use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, InterruptHandle, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Todo, TodoInput};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_TODOS: &str =
    "SELECT id, title, description, completed, created_at, updated_at FROM todos";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opening database at {path}: {source}")]
    Init {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("read failed: {0}")]
    Read(#[source] rusqlite::Error),
    #[error("write failed: {0}")]
    Write(#[source] rusqlite::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("closing database: {0}")]
    Close(#[source] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Internal(String),
}

impl StoreError {
    fn read(err: rusqlite::Error) -> Self {
        if is_interrupt(&err) {
            Self::Cancelled
        } else {
            Self::Read(err)
        }
    }

    fn write(err: rusqlite::Error) -> Self {
        if is_interrupt(&err) {
            Self::Cancelled
        } else {
            Self::Write(err)
        }
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}

/// SQLite-backed todo table.
///
/// One connection is shared by every clone of the store. Statements run on
/// the blocking pool, one at a time, and each call is bounded by the store's
/// query timeout.
#[derive(Clone)]
pub struct TodoStore {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    timeout: Duration,
}

impl TodoStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let init_error = |source| StoreError::Init {
            path: path.display().to_string(),
            source,
        };
        let conn = Connection::open(path).map_err(init_error)?;
        let store = Self::init(conn).map_err(init_error)?;
        info!(path = %path.display(), "database ready");
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let init_error = |source| StoreError::Init {
            path: ":memory:".to_string(),
            source,
        };
        let conn = Connection::open_in_memory().map_err(init_error)?;
        Self::init(conn).map_err(init_error)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS todos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                completed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn create(&self, input: TodoInput) -> Result<Todo, StoreError> {
        self.run("create", move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO todos (title, description, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![input.title, input.description, input.completed, now, now],
            )
            .map_err(StoreError::write)?;
            Ok(Todo {
                id: conn.last_insert_rowid(),
                title: input.title,
                description: input.description,
                completed: input.completed,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Todo>, StoreError> {
        self.run("get", move |conn| {
            conn.query_row(
                &format!("{SELECT_TODOS} WHERE id = ?1"),
                params![id],
                todo_from_row,
            )
            .optional()
            .map_err(StoreError::read)
        })
        .await
    }

    /// Overwrites the caller-controlled fields and refreshes `updated_at`.
    ///
    /// A missing id is not an error: nothing is written and the input is
    /// echoed back with fresh timestamps.
    pub async fn update(&self, id: i64, input: TodoInput) -> Result<Todo, StoreError> {
        self.run("update", move |conn| {
            let now = Utc::now();
            let created_at: Option<DateTime<Utc>> = conn
                .query_row(
                    "UPDATE todos
                     SET title = ?1, description = ?2, completed = ?3, updated_at = ?4
                     WHERE id = ?5
                     RETURNING created_at",
                    params![input.title, input.description, input.completed, now, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::write)?;
            if created_at.is_none() {
                debug!(id, "update matched no row");
            }
            Ok(Todo {
                id,
                title: input.title,
                description: input.description,
                completed: input.completed,
                created_at: created_at.unwrap_or(now),
                updated_at: now,
            })
        })
        .await
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.run("delete", move |conn| {
            let deleted = conn
                .execute("DELETE FROM todos WHERE id = ?1", params![id])
                .map_err(StoreError::write)?;
            debug!(id, deleted, "delete");
            Ok(())
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<Todo>, StoreError> {
        self.run("list", |conn| {
            let mut stmt = conn.prepare(SELECT_TODOS).map_err(StoreError::read)?;
            let rows = stmt
                .query_map([], todo_from_row)
                .map_err(StoreError::read)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StoreError::read)
        })
        .await
    }

    /// Releases the connection. If other clones are still alive the
    /// connection closes when the last of them is dropped.
    pub fn close(self) -> Result<(), StoreError> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner().unwrap_or_else(PoisonError::into_inner);
                conn.close().map_err(|(_, err)| StoreError::Close(err))?;
                info!("database closed");
                Ok(())
            }
            Err(_) => {
                warn!("database still in use, deferring close to the last handle");
                Ok(())
            }
        }
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let call = Arc::new(Mutex::new(CallState::default()));
        let mut guard = CancelOnDrop {
            call: Arc::clone(&call),
            interrupt: Arc::clone(&self.interrupt),
            armed: true,
        };

        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Internal("connection lock poisoned".to_string()))?;
            {
                let mut state = call.lock().unwrap_or_else(PoisonError::into_inner);
                if state.cancelled {
                    return Err(StoreError::Cancelled);
                }
                state.running = true;
            }
            let result = f(&conn);
            // Cleared while the connection is still held, so a late interrupt
            // cannot land on the next caller's statement.
            call.lock().unwrap_or_else(PoisonError::into_inner).running = false;
            result
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => {
                guard.armed = false;
                joined.map_err(|err| StoreError::Internal(format!("{op} task failed: {err}")))?
            }
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "store call timed out");
                Err(StoreError::Cancelled)
            }
        }
    }
}

#[derive(Default)]
struct CallState {
    cancelled: bool,
    running: bool,
}

/// Cancels a store call whose caller stopped waiting, either on timeout or
/// because the request future was dropped. A call that has not reached the
/// connection yet is skipped; a running statement is interrupted.
struct CancelOnDrop {
    call: Arc<Mutex<CallState>>,
    interrupt: Arc<InterruptHandle>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.call.lock().unwrap_or_else(PoisonError::into_inner);
        state.cancelled = true;
        if state.running {
            self.interrupt.interrupt();
        }
    }
}

fn todo_from_row(row: &Row<'_>) -> rusqlite::Result<Todo> {
    Ok(Todo {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;
    use tempfile::TempDir;

    fn count_to(n: u64) -> String {
        format!(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < {n}) \
             SELECT count(*) FROM c"
        )
    }

    async fn assert_store_responsive(store: &TodoStore) {
        let patient = store.clone().with_timeout(Duration::from_secs(5));
        let started = Instant::now();
        assert!(patient.list().await.unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    fn setup_store() -> (TempDir, TodoStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = TodoStore::open(temp_dir.path().join("todos.db")).unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, store) = setup_store();
        let input = TodoInput::new("Buy milk")
            .with_description("two litres")
            .completed(true);

        let created = store.create(input).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.created_at, created.updated_at);

        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.title, "Buy milk");
        assert_eq!(fetched.description.as_deref(), Some("two litres"));
        assert!(fetched.completed);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (_dir, store) = setup_store();
        assert!(store.get(999_999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let (_dir, store) = setup_store();
        let a = store.create(TodoInput::new("a")).await.unwrap();
        let b = store.create(TodoInput::new("b")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn update_refreshes_updated_at_and_keeps_created_at() {
        let (_dir, store) = setup_store();
        let created = store.create(TodoInput::new("draft")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;

        let updated = store
            .update(created.id, TodoInput::new("final").completed(true))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);

        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, updated);
        assert_eq!(fetched.title, "final");
        assert!(fetched.completed);
        assert!(fetched.created_at <= fetched.updated_at);
    }

    #[tokio::test]
    async fn update_of_missing_id_succeeds_without_writing() {
        let (_dir, store) = setup_store();
        let echoed = store.update(42, TodoInput::new("ghost")).await.unwrap();
        assert_eq!(echoed.id, 42);
        assert_eq!(echoed.title, "ghost");
        assert!(store.get(42).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = setup_store();
        let created = store.create(TodoInput::new("gone soon")).await.unwrap();

        store.delete(created.id).await.unwrap();
        store.delete(created.id).await.unwrap();
        store.delete(999_999).await.unwrap();
        assert!(store.get(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_tracks_creates_and_deletes() {
        let (_dir, store) = setup_store();
        assert!(store.list().await.unwrap().is_empty());

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.create(TodoInput::new(format!("todo {i}"))).await.unwrap().id);
        }
        assert_eq!(store.list().await.unwrap().len(), 5);

        store.delete(ids[2]).await.unwrap();
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 4);
        assert!(remaining.iter().all(|todo| todo.id != ids[2]));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("todos.db");

        let store = TodoStore::open(&path).unwrap();
        let created = store.create(TodoInput::new("persisted")).await.unwrap();
        store.close().unwrap();

        let store = TodoStore::open(&path).unwrap();
        assert_eq!(store.get(created.id).await.unwrap(), Some(created));
    }

    #[test]
    fn open_fails_on_directory() {
        let temp_dir = TempDir::new().unwrap();
        let err = TodoStore::open(temp_dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::Init { .. }));
    }

    #[tokio::test]
    async fn call_past_deadline_is_cancelled() {
        let store = TodoStore::open_in_memory()
            .unwrap()
            .with_timeout(Duration::from_millis(20));

        let held = store.conn.lock().unwrap();
        let err = store.list().await.unwrap_err();
        drop(held);
        assert!(matches!(err, StoreError::Cancelled));

        // The abandoned call must not leave anything behind.
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn running_statement_is_interrupted_on_timeout() {
        let store = TodoStore::open_in_memory()
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        let sql = count_to(300_000_000);
        let err = store
            .run("count", move |conn| {
                conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                    .map_err(StoreError::read)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));

        assert_store_responsive(&store).await;
    }

    #[tokio::test]
    async fn dropped_caller_interrupts_running_statement() {
        let store = TodoStore::open_in_memory().unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (outcome_tx, outcome_rx) = mpsc::channel();

        let busy = store.clone();
        let sql = count_to(300_000_000);
        let handle = tokio::spawn(async move {
            busy.run("count", move |conn| {
                let _ = started_tx.send(());
                let outcome = conn
                    .query_row(&sql, [], |row| row.get::<_, i64>(0))
                    .map_err(StoreError::read);
                let _ = outcome_tx.send(matches!(outcome, Err(StoreError::Cancelled)));
                outcome
            })
            .await
        });

        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        let interrupted =
            tokio::task::spawn_blocking(move || outcome_rx.recv_timeout(Duration::from_secs(5)))
                .await
                .unwrap()
                .unwrap();
        assert!(interrupted);

        assert_store_responsive(&store).await;
    }

    #[tokio::test]
    async fn finished_call_does_not_interrupt_the_next_one() {
        let store = TodoStore::open_in_memory().unwrap();
        let finished = CancelOnDrop {
            call: Arc::new(Mutex::new(CallState::default())),
            interrupt: Arc::clone(&store.interrupt),
            armed: true,
        };

        let (started_tx, started_rx) = mpsc::channel();
        let busy = store.clone();
        let sql = count_to(3_000_000);
        let handle = tokio::spawn(async move {
            busy.run("count", move |conn| {
                let _ = started_tx.send(());
                conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                    .map_err(StoreError::read)
            })
            .await
        });

        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap()
            .unwrap();
        drop(finished);
        assert_eq!(handle.await.unwrap().unwrap(), 3_000_000);
    }

    #[tokio::test]
    async fn close_with_live_clone_defers() {
        let store = TodoStore::open_in_memory().unwrap();
        let other = store.clone();
        store.close().unwrap();
        assert!(other.list().await.unwrap().is_empty());
        other.close().unwrap();
    }
}
