//! PostgreSQL adapter: a `deadpool-postgres` pool handing out one `PgSession` per request.
//!
//! Each session is a handle to a task that owns the pooled connection. The task keeps the
//! open `tokio_postgres::Transaction` on its own stack, which is what lets a fetch go
//! through a portal with a row limit instead of draining the whole result set.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{BuildError, Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_postgres::{NoTls, SimpleQueryMessage, Statement, Transaction};
use tracing::{debug, warn};

use super::decode::decode_row;
use super::params::{compile_named, resolve_binds};
use super::{DbSession, EngineFailure, FetchedRows, SessionProvider, StatementShape, TableInfo};
use crate::gateway::binder::BindParams;

const LIST_TABLES_SQL: &str = "SELECT t.table_name::text AS table_name, COUNT(c.column_name)::bigint AS column_count \
     FROM information_schema.tables t \
     LEFT JOIN information_schema.columns c \
       ON t.table_name = c.table_name AND t.table_schema = c.table_schema \
     WHERE t.table_schema = $1 \
     GROUP BY t.table_name \
     ORDER BY t.table_name";

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub database_url: String,
    pub max_size: usize,
    /// How long `acquire` waits for a free connection, and for a new one to connect.
    pub wait_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum PoolSetupError {
    #[error("invalid database url: {0}")]
    Url(#[from] tokio_postgres::Error),
    #[error("failed to build connection pool: {0}")]
    Build(#[from] BuildError),
}

fn failure(e: tokio_postgres::Error) -> EngineFailure {
    match e.as_db_error() {
        Some(db) => EngineFailure::engine(db.message()).with_sqlstate(db.code().code()),
        None => EngineFailure::engine(e.to_string()),
    }
}

fn session_gone() -> EngineFailure { EngineFailure::engine("database session closed unexpectedly") }

#[derive(Clone)]
pub struct PgSessionProvider {
    pool: Pool,
}

impl PgSessionProvider {
    /// Connections are opened lazily; a bad host only shows up on first `acquire`.
    pub fn connect(settings: &PoolSettings) -> Result<Self, PoolSetupError> {
        let pg_config: tokio_postgres::Config = settings.database_url.parse()?;
        let mgr = Manager::from_config(pg_config, NoTls, ManagerConfig { recycling_method: RecyclingMethod::Fast });
        let pool = Pool::builder(mgr)
            .max_size(settings.max_size.max(1))
            .wait_timeout(Some(settings.wait_timeout))
            .create_timeout(Some(settings.wait_timeout))
            .runtime(Runtime::Tokio1)
            .build()?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionProvider for PgSessionProvider {
    async fn acquire(&self) -> Result<Box<dyn DbSession>, EngineFailure> {
        let client = self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => EngineFailure::pool("timeout waiting for a free database connection"),
            PoolError::Backend(be) => EngineFailure::pool(format!("database connection unavailable: {}", be)),
            other => EngineFailure::pool(format!("database connection unavailable: {}", other)),
        })?;
        let (commands, rx) = mpsc::channel(4);
        tokio::spawn(session_task(client, rx));
        Ok(Box::new(PgSession { commands }))
    }
}

type Reply<T> = oneshot::Sender<Result<T, EngineFailure>>;

/// Requests from a `PgSession` handle to the task owning its connection.
enum Command {
    Begin(Reply<()>),
    SetTimeout(Duration, Reply<()>),
    Describe(String, Reply<StatementShape>),
    Fetch(BindParams, usize, Reply<FetchedRows>),
    Execute(BindParams, Reply<u64>),
    RunScript(String, Reply<u64>),
    Commit(Reply<()>),
    Rollback(Reply<()>),
    ListTables(String, Reply<Vec<TableInfo>>),
}

fn refuse<T>(reply: Reply<T>, message: &str) {
    let _ = reply.send(Err(EngineFailure::engine(message)));
}

impl Command {
    fn reject(self, message: &str) {
        match self {
            Command::Begin(r) | Command::SetTimeout(_, r) | Command::Commit(r) | Command::Rollback(r) => refuse(r, message),
            Command::Describe(_, r) => refuse(r, message),
            Command::Fetch(_, _, r) => refuse(r, message),
            Command::Execute(_, r) | Command::RunScript(_, r) => refuse(r, message),
            Command::ListTables(_, r) => refuse(r, message),
        }
    }
}

/// Owns the pooled connection until the handle is dropped; the connection then goes back
/// to the pool.
async fn session_task(mut client: Object, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Begin(reply) => {
                let pg: &mut tokio_postgres::Client = &mut client;
                match pg.transaction().await {
                    Ok(tx) => {
                        let _ = reply.send(Ok(()));
                        if !run_transaction(tx, &mut rx).await {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = reply.send(Err(failure(e)));
                    }
                }
            }
            Command::ListTables(schema, reply) => {
                let _ = reply.send(list_tables(&**client, &schema).await);
            }
            other => other.reject("no transaction is open"),
        }
    }
}

/// Serves commands inside one transaction. Returns false when the handle went away
/// mid-transaction; dropping `tx` then queues a ROLLBACK ahead of any later use.
async fn run_transaction(tx: Transaction<'_>, rx: &mut mpsc::Receiver<Command>) -> bool {
    let mut prepared: Option<(Statement, Vec<String>)> = None;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::SetTimeout(timeout, reply) => {
                let sql = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
                let _ = reply.send(tx.batch_execute(&sql).await.map_err(failure));
            }
            Command::Describe(sql, reply) => {
                let compiled = compile_named(&sql);
                let shape = match tx.prepare(&compiled.sql).await {
                    Ok(stmt) => {
                        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
                        debug!(target: "sqlgate::db", params = compiled.names.len(), columns = columns.len(), "statement prepared");
                        let returns_rows = !columns.is_empty();
                        prepared = Some((stmt, compiled.names));
                        Ok(StatementShape { columns, returns_rows })
                    }
                    Err(e) => Err(failure(e)),
                };
                let _ = reply.send(shape);
            }
            Command::Fetch(params, limit, reply) => {
                let _ = reply.send(fetch(&tx, prepared.as_ref(), &params, limit).await);
            }
            Command::Execute(params, reply) => {
                let _ = reply.send(execute(&tx, prepared.as_ref(), &params).await);
            }
            Command::RunScript(sql, reply) => {
                let _ = reply.send(run_script(&tx, &sql).await);
            }
            Command::ListTables(schema, reply) => {
                let _ = reply.send(list_tables(&tx, &schema).await);
            }
            Command::Commit(reply) => {
                let _ = reply.send(tx.commit().await.map_err(failure));
                return true;
            }
            Command::Rollback(reply) => {
                let _ = reply.send(tx.rollback().await.map_err(failure));
                return true;
            }
            Command::Begin(reply) => refuse(reply, "a transaction is already open"),
        }
    }
    warn!(target: "sqlgate::db", "session dropped inside a transaction; rolling back");
    false
}

fn statement(prepared: Option<&(Statement, Vec<String>)>) -> Result<&(Statement, Vec<String>), EngineFailure> {
    prepared.ok_or_else(|| EngineFailure::engine("no statement has been prepared"))
}

/// Binds a portal and asks the server for at most `limit` rows; the rest is never produced.
async fn fetch(
    tx: &Transaction<'_>,
    prepared: Option<&(Statement, Vec<String>)>,
    params: &BindParams,
    limit: usize,
) -> Result<FetchedRows, EngineFailure> {
    let (stmt, names) = statement(prepared)?;
    let binds = resolve_binds(names, params)?;
    let columns = stmt.columns().iter().map(|c| c.name().to_string()).collect();
    if limit == 0 {
        return Ok(FetchedRows { columns, rows: Vec::new() });
    }
    let portal = tx.bind_raw(stmt, binds.iter()).await.map_err(failure)?;
    let max_rows = i32::try_from(limit).unwrap_or(i32::MAX);
    let raw_rows = tx.query_portal(&portal, max_rows).await.map_err(failure)?;
    let rows = raw_rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>().map_err(failure)?;
    Ok(FetchedRows { columns, rows })
}

async fn execute(tx: &Transaction<'_>, prepared: Option<&(Statement, Vec<String>)>, params: &BindParams) -> Result<u64, EngineFailure> {
    let (stmt, names) = statement(prepared)?;
    let binds = resolve_binds(names, params)?;
    tx.execute_raw(stmt, binds.iter()).await.map_err(failure)
}

/// Simple-protocol run of a multi-statement script; reports the last statement's count.
async fn run_script(tx: &Transaction<'_>, sql: &str) -> Result<u64, EngineFailure> {
    let messages = tx.simple_query(sql).await.map_err(failure)?;
    let last = messages.iter().rev().find_map(|m| match m {
        SimpleQueryMessage::CommandComplete(n) => Some(*n),
        _ => None,
    });
    Ok(last.unwrap_or(0))
}

async fn list_tables<C: tokio_postgres::GenericClient + Sync>(client: &C, schema: &str) -> Result<Vec<TableInfo>, EngineFailure> {
    let rows = client.query(LIST_TABLES_SQL, &[&schema]).await.map_err(failure)?;
    rows.iter()
        .map(|row| {
            Ok(TableInfo {
                table_name: row.try_get(0).map_err(failure)?,
                column_count: row.try_get(1).map_err(failure)?,
            })
        })
        .collect()
}

/// Handle to one checked-out connection. Dropping it mid-transaction rolls back and
/// returns the connection to the pool.
pub struct PgSession {
    commands: mpsc::Sender<Command>,
}

impl PgSession {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineFailure> {
        let (reply, answer) = oneshot::channel();
        self.commands.send(make(reply)).await.map_err(|_| session_gone())?;
        answer.await.map_err(|_| session_gone())?
    }
}

#[async_trait]
impl DbSession for PgSession {
    async fn begin(&mut self) -> Result<(), EngineFailure> { self.call(Command::Begin).await }

    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), EngineFailure> {
        self.call(|r| Command::SetTimeout(timeout, r)).await
    }

    async fn describe(&mut self, sql: &str) -> Result<StatementShape, EngineFailure> {
        self.call(|r| Command::Describe(sql.to_string(), r)).await
    }

    async fn fetch(&mut self, params: &BindParams, limit: usize) -> Result<FetchedRows, EngineFailure> {
        self.call(|r| Command::Fetch(params.clone(), limit, r)).await
    }

    async fn execute(&mut self, params: &BindParams) -> Result<u64, EngineFailure> {
        self.call(|r| Command::Execute(params.clone(), r)).await
    }

    async fn run_script(&mut self, sql: &str) -> Result<u64, EngineFailure> {
        self.call(|r| Command::RunScript(sql.to_string(), r)).await
    }

    async fn commit(&mut self) -> Result<(), EngineFailure> { self.call(Command::Commit).await }

    async fn rollback(&mut self) -> Result<(), EngineFailure> { self.call(Command::Rollback).await }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableInfo>, EngineFailure> {
        self.call(|r| Command::ListTables(schema.to_string(), r)).await
    }
}
