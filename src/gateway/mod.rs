//! Role-aware SQL gateway.
//!
//! Per request, top to bottom: role gate, classification, authorization, danger filter,
//! parameter defaults, execution, marshaling. The caller's text is executed exactly as
//! received; every check works on derived values.

pub mod binder;
pub mod classify;
pub mod danger;
pub mod executor;
pub mod legacy;
pub mod marshal;
pub mod normalize;
pub mod policy;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::db::{SessionProvider, TableInfo};
use crate::error::{AppError, AppResult};
use crate::identity::Principal;

pub use binder::{bind_with_defaults, BindParams, CONVENTIONAL_PARAMS};
pub use danger::{DangerFilter, MatchMode, DEFAULT_BLACKLIST};
pub use executor::Executor;
pub use marshal::{normalize_cell, ExportCell, QueryResult, RawResult};
pub use normalize::StatementKind;
pub use policy::{ExecutionPolicy, RoleTable, DEVELOPER_STATEMENT_TIMEOUT};

pub const DEFAULT_MAX_ROWS: usize = 10_000;

const LOG_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryRequest {
    pub raw_text: String,
    #[serde(default)]
    pub bind_params: Option<BindParams>,
}

impl QueryRequest {
    pub fn new<S: Into<String>>(raw_text: S, bind_params: Option<BindParams>) -> Self {
        Self { raw_text: raw_text.into(), bind_params }
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub max_rows: usize,
    pub developer_timeout: Option<Duration>,
    pub blacklist_mode: MatchMode,
    pub catalog_schema: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            developer_timeout: Some(DEVELOPER_STATEMENT_TIMEOUT),
            blacklist_mode: MatchMode::Substring,
            catalog_schema: "public".to_string(),
        }
    }
}

pub struct Gateway {
    roles: RoleTable,
    danger: DangerFilter,
    executor: Executor,
    catalog_schema: String,
}

fn preview(raw: &str) -> String { raw.chars().take(LOG_PREVIEW_CHARS).collect() }

impl Gateway {
    pub fn new(provider: Arc<dyn SessionProvider>, settings: &GatewaySettings) -> Self {
        Self {
            roles: RoleTable::standard(settings.developer_timeout),
            danger: DangerFilter::default().with_mode(settings.blacklist_mode),
            executor: Executor::new(provider, settings.max_rows),
            catalog_schema: settings.catalog_schema.clone(),
        }
    }

    /// Replace the role table.
    pub fn with_roles(mut self, roles: RoleTable) -> Self {
        self.roles = roles;
        self
    }

    /// Replace the danger-function rule set.
    pub fn with_danger_filter(mut self, danger: DangerFilter) -> Self {
        self.danger = danger;
        self
    }

    pub fn roles(&self) -> &RoleTable { &self.roles }

    pub fn danger_filter(&self) -> &DangerFilter { &self.danger }

    pub fn max_rows(&self) -> usize { self.executor.max_rows() }

    /// Every check that can fail without touching the database.
    fn admit_query(&self, principal: &Principal, raw: &str) -> AppResult<ExecutionPolicy> {
        self.roles.admit(principal)?;
        if raw.trim().is_empty() {
            return Err(AppError::validation("empty_query", "SQL query cannot be empty"));
        }
        if normalize::is_effectively_empty(raw) {
            return Err(AppError::validation("comment_only_query", "SQL query contains only comments"));
        }
        let kind = normalize::classify(raw);
        let policy = self.roles.authorize(principal, kind)?;
        if policy.enforce_function_blacklist {
            self.danger.check(raw)?;
        }
        Ok(policy)
    }

    async fn run(&self, principal: &Principal, request: &QueryRequest, policy: &ExecutionPolicy, max_rows: usize) -> AppResult<QueryResult> {
        let params = bind_with_defaults(request.bind_params.as_ref());
        info!(target: "sqlgate::gateway", user = %principal.username, role = %principal.role, query = %preview(&request.raw_text), "executing query");
        let raw = self.executor.execute(&request.raw_text, &params, policy, max_rows).await?;
        let result = QueryResult::from_raw(raw, max_rows);
        if result.truncated {
            warn!(target: "sqlgate::gateway", max_rows, "query result truncated");
        }
        Ok(result)
    }

    pub async fn execute(&self, principal: &Principal, request: &QueryRequest) -> AppResult<QueryResult> {
        let policy = self.admit_query(principal, &request.raw_text)?;
        self.run(principal, request, &policy, self.max_rows()).await
    }

    /// `execute` restricted to one plain SELECT; the result feeds the spreadsheet writer.
    pub async fn export(&self, principal: &Principal, request: &QueryRequest) -> AppResult<QueryResult> {
        self.roles.admit(principal)?;
        let trimmed = request.raw_text.trim();
        if !trimmed.to_lowercase().starts_with("select") {
            return Err(AppError::validation("export_not_select", "Only SELECT is allowed for export"));
        }
        if trimmed.contains(';') {
            return Err(AppError::validation("export_multiple_statements", "Single SELECT statement only"));
        }
        let policy = self.admit_query(principal, &request.raw_text)?;
        self.run(principal, request, &policy, self.max_rows()).await
    }

    pub async fn list_tables(&self, principal: &Principal) -> AppResult<Vec<TableInfo>> {
        self.roles.admit(principal)?;
        let tables = self.executor.list_tables(&self.catalog_schema).await?;
        info!(target: "sqlgate::gateway", user = %principal.username, tables = tables.len(), "listed tables");
        Ok(tables)
    }

    /// Deprecated keyword-ban path: read-only, no blacklist, no timeout, legacy row cap.
    pub async fn execute_legacy(&self, principal: &Principal, request: &QueryRequest) -> AppResult<QueryResult> {
        self.roles.admit(principal)?;
        if request.raw_text.trim().is_empty() {
            return Err(AppError::validation("empty_query", "Query must be a non-empty string."));
        }
        if !legacy::is_sql_safe(&request.raw_text) {
            return Err(AppError::validation("unsafe_query", "Only safe SELECT queries allowed."));
        }
        let policy = ExecutionPolicy { enforce_function_blacklist: false, ..ExecutionPolicy::read_only(None) };
        let cap = legacy::LEGACY_MAX_ROWS.min(self.max_rows());
        self.run(principal, request, &policy, cap).await
    }
}
