use crate::error::AppError;
use crate::retry::retry_with_delay;
use crate::schema::Dialect;
use log::{debug, error, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Opens connections to a named database.
pub trait Connector {
    fn dialect(&self) -> Dialect;
    fn connect(&self, database: &str) -> Result<Connection, AppError>;

    /// Whether a new connection sees the data of a lost one.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// One SQLite file per database under `dir`, or private in-memory databases.
#[derive(Clone, Debug, Default)]
pub struct SqliteConnector {
    dir: Option<PathBuf>,
}

impl SqliteConnector {
    pub fn new(dir: Option<PathBuf>) -> Self {
        SqliteConnector { dir }
    }

    pub fn in_memory() -> Self {
        SqliteConnector { dir: None }
    }
}

impl Connector for SqliteConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self, database: &str) -> Result<Connection, AppError> {
        let failed = |source: rusqlite::Error| AppError::DbConnectFailed { database: database.to_string(), source };
        let conn = match &self.dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| AppError::file_access(dir, e))?;
                Connection::open(dir.join(format!("{database}.sqlite3"))).map_err(failed)?
            }
            None => Connection::open_in_memory().map_err(failed)?,
        };
        conn.execute_batch("PRAGMA foreign_keys = ON").map_err(failed)?;
        Ok(conn)
    }

    fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }
}

/// Cached connections per database name plus the transaction nesting of this worker.
pub struct Session {
    connector: Box<dyn Connector>,
    connections: RefCell<HashMap<String, Connection>>,
    depth: Cell<usize>,
    tx_database: RefCell<Option<String>>,
    reconnect_attempts: usize,
    reconnect_delay: Duration,
}

pub(crate) fn query_failed(statement: &str) -> impl FnOnce(rusqlite::Error) -> AppError + '_ {
    move |source| AppError::DbQueryFailed { statement: statement.to_string(), source }
}

impl Session {
    pub fn new(connector: Box<dyn Connector>, reconnect_attempts: usize, reconnect_delay: Duration) -> Self {
        Session {
            connector,
            connections: RefCell::new(HashMap::new()),
            depth: Cell::new(0),
            tx_database: RefCell::new(None),
            reconnect_attempts: reconnect_attempts.max(1),
            reconnect_delay,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.connector.dialect()
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Drops the cached handle; the next call reconnects.
    pub fn disconnect(&self, database: &str) {
        self.connections.borrow_mut().remove(database);
    }

    fn ensure_connected(&self, database: &str) -> Result<(), AppError> {
        if self.connections.borrow().contains_key(database) {
            return Ok(());
        }
        debug!("connecting to {database}");
        let conn = self.connector.connect(database)?;
        self.connections.borrow_mut().insert(database.to_string(), conn);
        Ok(())
    }

    fn run<T>(
        &self,
        database: &str,
        attempts: usize,
        mut op: impl FnMut(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let should_retry = |e: &AppError| {
            if !e.is_connection_lost() {
                return false;
            }
            if !self.connector.is_persistent() && self.connections.borrow().contains_key(database) {
                warn!("lost in-memory database {database}, not reconnecting to an empty one");
                return false;
            }
            true
        };
        retry_with_delay(attempts, self.reconnect_delay, should_retry, |attempt| {
            if attempt > 0 {
                warn!("lost connection to {database}, reconnecting (attempt {})", attempt + 1);
                self.disconnect(database);
            }
            self.ensure_connected(database)?;
            let connections = self.connections.borrow();
            let conn = connections
                .get(database)
                .ok_or_else(|| AppError::RuntimeError(format!("no connection to {database}")))?;
            op(conn)
        })
    }

    /// Runs `op` on the connection of `database`, reconnecting on lost connections
    /// unless a transaction is open.
    pub fn with_conn<T>(&self, database: &str, op: impl FnMut(&Connection) -> Result<T, AppError>) -> Result<T, AppError> {
        let attempts = if self.depth.get() == 0 { self.reconnect_attempts } else { 1 };
        self.run(database, attempts, op)
    }

    pub fn execute(&self, database: &str, sql: &str, params: &[SqlValue]) -> Result<usize, AppError> {
        debug!("{sql}");
        self.with_conn(database, |conn| {
            conn.execute(sql, rusqlite::params_from_iter(params.iter())).map_err(query_failed(sql))
        })
    }

    pub fn execute_batch(&self, database: &str, sql: &str) -> Result<(), AppError> {
        debug!("{sql}");
        self.with_conn(database, |conn| conn.execute_batch(sql).map_err(query_failed(sql)))
    }

    /// Executes an INSERT and returns the rowid it created.
    pub fn insert(&self, database: &str, sql: &str, params: &[SqlValue]) -> Result<i64, AppError> {
        debug!("{sql}");
        self.with_conn(database, |conn| {
            conn.execute(sql, rusqlite::params_from_iter(params.iter())).map_err(query_failed(sql))?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn query<T>(
        &self,
        database: &str,
        sql: &str,
        params: &[SqlValue],
        mut map: impl FnMut(&Row) -> Result<T, AppError>,
    ) -> Result<Vec<T>, AppError> {
        debug!("{sql}");
        self.with_conn(database, |conn| {
            let mut stmt = conn.prepare(sql).map_err(query_failed(sql))?;
            let mut rows = stmt.query(rusqlite::params_from_iter(params.iter())).map_err(query_failed(sql))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(query_failed(sql))? {
                out.push(map(row)?);
            }
            Ok(out)
        })
    }

    /// Runs `f` inside a transaction on `database`. Only the outermost call issues
    /// BEGIN/COMMIT/ROLLBACK; nested calls join it.
    pub fn transaction<T>(&self, database: &str, f: impl FnOnce() -> Result<T, AppError>) -> Result<T, AppError> {
        let depth = self.depth.get();
        if depth > 0 {
            let open = self.tx_database.borrow().clone();
            if open.as_deref() != Some(database) {
                return Err(AppError::InvalidArgument(format!(
                    "cannot nest a transaction on {database} inside one on {}",
                    open.unwrap_or_default()
                )));
            }
            self.depth.set(depth + 1);
            let out = f();
            self.depth.set(depth);
            return out;
        }

        self.execute_batch(database, "BEGIN")?;
        *self.tx_database.borrow_mut() = Some(database.to_string());
        self.depth.set(1);
        let out = f();
        self.depth.set(0);
        self.tx_database.borrow_mut().take();

        let cause = match out {
            Ok(v) => match self.run(database, 1, |conn| conn.execute_batch("COMMIT").map_err(query_failed("COMMIT"))) {
                Ok(()) => return Ok(v),
                Err(e) => e,
            },
            Err(e) => e,
        };
        Err(self.rollback(database, cause))
    }

    fn rollback(&self, database: &str, cause: AppError) -> AppError {
        match self.run(database, 1, |conn| conn.execute_batch("ROLLBACK").map_err(query_failed("ROLLBACK"))) {
            Ok(()) => {
                warn!("transaction on {database} rolled back: {cause}");
                AppError::TransactionFailed(Box::new(cause))
            }
            Err(rollback) => {
                error!("ROLLBACK on {database} failed ({rollback}) after: {cause}");
                AppError::RollbackFailed { cause: Box::new(cause), rollback: Box::new(rollback) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::rc::Rc;

    fn session() -> Session {
        Session::new(Box::new(SqliteConnector::in_memory()), 3, Duration::ZERO)
    }

    fn count(session: &Session) -> i64 {
        session.query("db", "SELECT COUNT(*) FROM t", &[], |row| Ok(row.get::<_, i64>(0).unwrap())).unwrap()[0]
    }

    #[test]
    fn commit_and_rollback() {
        let s = session();
        s.execute_batch("db", "CREATE TABLE t (v INTEGER)").unwrap();
        s.transaction("db", || s.execute("db", "INSERT INTO t VALUES (?)", &[SqlValue::Integer(1)])).unwrap();
        assert_eq!(count(&s), 1);

        let err = s
            .transaction("db", || {
                s.execute("db", "INSERT INTO t VALUES (?)", &[SqlValue::Integer(2)])?;
                s.execute("db", "INSERT INTO missing VALUES (1)", &[])
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert_eq!(err.root_cause().kind(), ErrorKind::DbQueryFailed);
        assert_eq!(count(&s), 1);
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn nested_transactions_join_the_outer_one() {
        let s = session();
        s.execute_batch("db", "CREATE TABLE t (v INTEGER)").unwrap();
        let err = s
            .transaction("db", || {
                s.transaction("db", || {
                    assert_eq!(s.depth(), 2);
                    s.execute("db", "INSERT INTO t VALUES (1)", &[])
                })?;
                Err::<(), _>(AppError::RuntimeError("outer fails".into()))
            })
            .unwrap_err();
        assert!(matches!(err, AppError::TransactionFailed(_)));
        assert_eq!(count(&s), 0);

        let err = s.transaction("db", || s.transaction("other", || Ok(()))).unwrap_err();
        assert_eq!(err.root_cause().kind(), ErrorKind::InvalidArgument);
    }

    struct Flaky {
        failures: Rc<Cell<usize>>,
    }

    impl Connector for Flaky {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn connect(&self, database: &str) -> Result<Connection, AppError> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                let source = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN), None);
                return Err(AppError::DbConnectFailed { database: database.to_string(), source });
            }
            SqliteConnector::in_memory().connect(database)
        }
    }

    #[test]
    fn reconnects_a_bounded_number_of_times() {
        let failures = Rc::new(Cell::new(2));
        let s = Session::new(Box::new(Flaky { failures: Rc::clone(&failures) }), 3, Duration::ZERO);
        s.execute_batch("db", "SELECT 1").unwrap();

        failures.set(5);
        s.disconnect("db");
        let err = s.execute_batch("db", "SELECT 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DbConnectFailed);
        assert_eq!(failures.get(), 2);
    }

    fn lost(database: &str) -> AppError {
        let source = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR), None);
        AppError::DbQueryFailed { statement: format!("SELECT 1 -- {database}"), source }
    }

    #[test]
    fn lost_in_memory_databases_are_not_reopened() {
        let s = session();
        s.execute_batch("db", "CREATE TABLE t (v INTEGER)").unwrap();
        let attempts = Cell::new(0);
        let err = s
            .with_conn("db", |_| {
                attempts.set(attempts.get() + 1);
                Err::<(), _>(lost("db"))
            })
            .unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(attempts.get(), 1);
        assert_eq!(count(&s), 0);

        let dir = tempfile::tempdir().unwrap();
        let s = Session::new(Box::new(SqliteConnector::new(Some(dir.path().to_path_buf()))), 3, Duration::ZERO);
        s.execute_batch("db", "CREATE TABLE t (v INTEGER)").unwrap();
        let attempts = Cell::new(0);
        s.with_conn("db", |_| {
            attempts.set(attempts.get() + 1);
            Err::<(), _>(lost("db"))
        })
        .unwrap_err();
        assert_eq!(attempts.get(), 3);
        assert_eq!(count(&s), 0);
    }

    #[test]
    fn failed_rollback_is_reported_with_its_cause() {
        let s = session();
        s.execute_batch("db", "CREATE TABLE t (v INTEGER)").unwrap();
        let err = s
            .transaction("db", || {
                s.execute("db", "INSERT INTO t VALUES (1)", &[])?;
                s.execute_batch("db", "ROLLBACK")?;
                Err::<(), _>(AppError::RuntimeError("write failed".into()))
            })
            .unwrap_err();
        let AppError::RollbackFailed { cause, rollback } = &err else {
            panic!("expected a failed rollback, got {err}");
        };
        assert_eq!(cause.kind(), ErrorKind::RuntimeError);
        assert_eq!(rollback.kind(), ErrorKind::DbQueryFailed);
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert_eq!(err.root_cause().kind(), ErrorKind::RuntimeError);
        assert_eq!(count(&s), 0);
        assert_eq!(s.depth(), 0);
        s.transaction("db", || s.execute("db", "INSERT INTO t VALUES (2)", &[])).unwrap();
        assert_eq!(count(&s), 1);
    }

    #[test]
    fn statement_errors_are_not_retried() {
        let s = session();
        let err = s.execute_batch("db", "SELEKT nonsense").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DbQueryFailed);
        assert!(!err.is_connection_lost());
    }
}
