//! Database collaborator boundary.
//!
//! The gateway only talks to `SessionProvider`/`DbSession`; `postgres` is the production
//! adapter over a `deadpool-postgres` pool. One session is one pooled connection held
//! for the duration of a request.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::gateway::binder::BindParams;
use crate::value::CellValue;

mod decode;
mod params;
pub mod postgres;

pub use params::{compile_named, CompiledStatement, MISSING_BIND_MESSAGE};
pub use postgres::{PgSessionProvider, PoolSettings};

/// Fragment of the engine's refusal to prepare a multi-statement text.
pub const MULTI_STATEMENT_MESSAGE: &str = "cannot insert multiple commands into a prepared statement";

const SYNTAX_ERROR_SQLSTATE: &str = "42601";

/// Where a failure originated; the classifier treats pool failures differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// The engine rejected or aborted a statement.
    Engine,
    /// No connection could be obtained from the pool.
    Pool,
}

/// Low-level failure as reported by the database layer, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub message: String,
    pub sqlstate: Option<String>,
    pub origin: FailureOrigin,
}

impl EngineFailure {
    pub fn engine<S: Into<String>>(message: S) -> Self {
        Self { message: message.into(), sqlstate: None, origin: FailureOrigin::Engine }
    }

    pub fn pool<S: Into<String>>(message: S) -> Self {
        Self { message: message.into(), sqlstate: None, origin: FailureOrigin::Pool }
    }

    pub fn with_sqlstate<S: Into<String>>(mut self, code: S) -> Self {
        self.sqlstate = Some(code.into());
        self
    }

    /// The engine refused to prepare text holding more than one statement.
    pub fn is_multi_statement(&self) -> bool {
        self.origin == FailureOrigin::Engine
            && self.sqlstate.as_deref().map_or(true, |code| code == SYNTAX_ERROR_SQLSTATE)
            && self.message.to_lowercase().contains(MULTI_STATEMENT_MESSAGE)
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(code) => write!(f, "{} (sqlstate {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for EngineFailure {}

/// Whether a prepared statement yields a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementShape {
    pub columns: Vec<String>,
    pub returns_rows: bool,
}

/// Rows fetched from a result set, capped at the requested window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub column_count: i64,
}

/// One pooled connection. Calls happen in order: `begin`, optional
/// `set_statement_timeout`, `describe`, then `fetch`, `execute` or `run_script`, then
/// `commit` or `rollback`.
#[async_trait]
pub trait DbSession: Send {
    async fn begin(&mut self) -> Result<(), EngineFailure>;

    /// Transaction-scoped engine timeout.
    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), EngineFailure>;

    /// Prepare `sql` without running it.
    async fn describe(&mut self, sql: &str) -> Result<StatementShape, EngineFailure>;

    /// Run the described statement and read at most `limit` rows.
    async fn fetch(&mut self, params: &BindParams, limit: usize) -> Result<FetchedRows, EngineFailure>;

    /// Run the described statement; returns the engine-reported affected-row count.
    async fn execute(&mut self, params: &BindParams) -> Result<u64, EngineFailure>;

    /// Run parameterless multi-statement text as-is; returns the last statement's count.
    async fn run_script(&mut self, sql: &str) -> Result<u64, EngineFailure>;

    async fn commit(&mut self) -> Result<(), EngineFailure>;

    async fn rollback(&mut self) -> Result<(), EngineFailure>;

    /// Base tables of `schema` with their column counts, ordered by name.
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableInfo>, EngineFailure>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Waits for a free connection up to the pool's acquisition timeout.
    async fn acquire(&self) -> Result<Box<dyn DbSession>, EngineFailure>;
}
