//! In-memory session provider that replays a scripted statement outcome and records every
//! call the gateway makes against it.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sqlgate::db::{
    compile_named, DbSession, EngineFailure, FetchedRows, SessionProvider, StatementShape, TableInfo, MULTI_STATEMENT_MESSAGE,
};
use sqlgate::gateway::BindParams;
use sqlgate::identity::{Principal, Role};
use sqlgate::value::CellValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Acquire,
    Begin,
    SetTimeout(Duration),
    Describe(String),
    Fetch { params: BindParams, limit: usize },
    Execute(BindParams),
    Script(String),
    Commit,
    Rollback,
    ListTables(String),
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// `Some` makes the statement a write reporting this many affected rows.
    pub affected: Option<u64>,
    pub acquire_error: Option<EngineFailure>,
    pub timeout_error: Option<EngineFailure>,
    pub describe_error: Option<EngineFailure>,
    pub run_error: Option<EngineFailure>,
    pub tables: Vec<TableInfo>,
}

#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self { Self { script: Mutex::new(script), calls: Arc::default() } }

    pub fn rows(columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        Self::new(Script { columns: columns.iter().map(|c| c.to_string()).collect(), rows, ..Script::default() })
    }

    pub fn counting(n: i64) -> Self {
        Self::rows(&["n"], (0..n).map(|i| vec![CellValue::Int(i)]).collect())
    }

    pub fn affected(n: u64) -> Self { Self::new(Script { affected: Some(n), ..Script::default() }) }

    pub fn failing(message: &str) -> Self {
        Self::new(Script { columns: vec!["x".into()], run_error: Some(EngineFailure::engine(message)), ..Script::default() })
    }

    /// Refuses to prepare, the way the engine answers text holding several statements.
    pub fn script(affected: u64) -> Self {
        Self::new(Script {
            affected: Some(affected),
            describe_error: Some(EngineFailure::engine(MULTI_STATEMENT_MESSAGE).with_sqlstate("42601")),
            ..Script::default()
        })
    }

    pub fn with_tables(tables: Vec<TableInfo>) -> Self { Self::new(Script { tables, ..Script::default() }) }

    pub fn edit(&self, f: impl FnOnce(&mut Script)) { f(&mut self.script.lock()) }

    pub fn calls(&self) -> Vec<Call> { self.calls.lock().clone() }

    pub fn contacted(&self) -> bool { !self.calls.lock().is_empty() }

    pub fn saw(&self, call: &Call) -> bool { self.calls.lock().iter().any(|c| c == call) }

    pub fn fetch_params(&self) -> Option<BindParams> {
        self.calls.lock().iter().find_map(|c| match c {
            Call::Fetch { params, .. } => Some(params.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn acquire(&self) -> Result<Box<dyn DbSession>, EngineFailure> {
        self.calls.lock().push(Call::Acquire);
        let script = self.script.lock().clone();
        if let Some(e) = script.acquire_error.clone() {
            return Err(e);
        }
        Ok(Box::new(ScriptedSession { script, calls: self.calls.clone(), names: Vec::new() }))
    }
}

struct ScriptedSession {
    script: Script,
    calls: Arc<Mutex<Vec<Call>>>,
    names: Vec<String>,
}

impl ScriptedSession {
    fn record(&self, call: Call) { self.calls.lock().push(call) }

    /// Mirrors the driver: every placeholder in the text needs a value.
    fn check_binds(&self, params: &BindParams) -> Result<(), EngineFailure> {
        match self.names.iter().find(|n| !params.contains_key(n.as_str())) {
            Some(missing) => Err(EngineFailure::engine(format!("A value is required for bind parameter '{}'", missing))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DbSession for ScriptedSession {
    async fn begin(&mut self) -> Result<(), EngineFailure> {
        self.record(Call::Begin);
        Ok(())
    }

    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), EngineFailure> {
        self.record(Call::SetTimeout(timeout));
        match self.script.timeout_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn describe(&mut self, sql: &str) -> Result<StatementShape, EngineFailure> {
        self.record(Call::Describe(sql.to_string()));
        if let Some(e) = self.script.describe_error.clone() {
            return Err(e);
        }
        self.names = compile_named(sql).names;
        let returns_rows = self.script.affected.is_none();
        Ok(StatementShape { columns: if returns_rows { self.script.columns.clone() } else { Vec::new() }, returns_rows })
    }

    async fn fetch(&mut self, params: &BindParams, limit: usize) -> Result<FetchedRows, EngineFailure> {
        self.record(Call::Fetch { params: params.clone(), limit });
        self.check_binds(params)?;
        if let Some(e) = self.script.run_error.clone() {
            return Err(e);
        }
        Ok(FetchedRows { columns: self.script.columns.clone(), rows: self.script.rows.iter().take(limit).cloned().collect() })
    }

    async fn execute(&mut self, params: &BindParams) -> Result<u64, EngineFailure> {
        self.record(Call::Execute(params.clone()));
        self.check_binds(params)?;
        if let Some(e) = self.script.run_error.clone() {
            return Err(e);
        }
        Ok(self.script.affected.unwrap_or(0))
    }

    async fn run_script(&mut self, sql: &str) -> Result<u64, EngineFailure> {
        self.record(Call::Script(sql.to_string()));
        if let Some(e) = self.script.run_error.clone() {
            return Err(e);
        }
        Ok(self.script.affected.unwrap_or(0))
    }

    async fn commit(&mut self) -> Result<(), EngineFailure> {
        self.record(Call::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), EngineFailure> {
        self.record(Call::Rollback);
        Ok(())
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<TableInfo>, EngineFailure> {
        self.record(Call::ListTables(schema.to_string()));
        Ok(self.script.tables.clone())
    }
}

pub fn admin() -> Principal { Principal::new(1, "admin", Role::Admin) }

pub fn developer() -> Principal { Principal::new(2, "dev", Role::Developer) }

pub fn accountant() -> Principal { Principal::new(3, "acc", Role::Accountant) }

pub fn user() -> Principal { Principal::new(4, "viewer", Role::User) }

pub fn params(v: serde_json::Value) -> BindParams { v.as_object().cloned().unwrap_or_default() }
