//! Statement execution inside one transaction on one pooled session.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::{compile_named, DbSession, EngineFailure, SessionProvider, TableInfo};
use crate::error::{AppError, AppResult};

use super::binder::BindParams;
use super::classify::classify;
use super::marshal::RawResult;
use super::policy::ExecutionPolicy;

fn classified(f: EngineFailure) -> AppError { classify(&f) }

#[derive(Clone)]
pub struct Executor {
    provider: Arc<dyn SessionProvider>,
    max_rows: usize,
}

impl Executor {
    pub fn new(provider: Arc<dyn SessionProvider>, max_rows: usize) -> Self { Self { provider, max_rows } }

    pub fn max_rows(&self) -> usize { self.max_rows }

    /// Runs `raw_text` once, reading at most `max_rows + 1` rows. Any failure after `BEGIN`
    /// rolls the transaction back before the classified error is returned.
    pub async fn execute(&self, raw_text: &str, params: &BindParams, policy: &ExecutionPolicy, max_rows: usize) -> AppResult<RawResult> {
        let mut session = self.provider.acquire().await.map_err(classified)?;
        Self::open(session.as_mut(), policy).await?;

        match Self::run(session.as_mut(), raw_text, params, policy, max_rows).await {
            Ok(raw) => Ok(raw),
            Err(err) => {
                if let Err(rb) = session.rollback().await {
                    warn!(target: "sqlgate::executor", error = %rb, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// `BEGIN` plus the policy's statement timeout.
    async fn open(session: &mut dyn DbSession, policy: &ExecutionPolicy) -> AppResult<()> {
        session.begin().await.map_err(classified)?;
        if let Some(timeout) = policy.statement_timeout {
            if let Err(e) = session.set_statement_timeout(timeout).await {
                warn!(target: "sqlgate::executor", error = %e, "failed to set statement timeout; running without it");
                // A failed SET leaves the transaction aborted.
                session.rollback().await.map_err(classified)?;
                session.begin().await.map_err(classified)?;
            }
        }
        Ok(())
    }

    async fn run(session: &mut dyn DbSession, raw_text: &str, params: &BindParams, policy: &ExecutionPolicy, max_rows: usize) -> AppResult<RawResult> {
        let shape = match session.describe(raw_text).await {
            Ok(shape) => shape,
            Err(f) if f.is_multi_statement() => return Self::run_script(session, raw_text, policy).await,
            Err(f) => return Err(classified(f)),
        };

        if !shape.returns_rows {
            if !policy.may_commit_writes {
                return Err(AppError::denied("read_only_write", "Read-only role cannot modify data"));
            }
            let affected = session.execute(params).await.map_err(classified)?;
            session.commit().await.map_err(classified)?;
            debug!(target: "sqlgate::executor", affected, "write committed");
            return Ok(RawResult::Affected(affected));
        }

        let fetched = session.fetch(params, max_rows.saturating_add(1)).await.map_err(classified)?;
        if policy.may_commit_writes {
            // `INSERT ... RETURNING` and data-modifying CTEs return rows too.
            session.commit().await.map_err(classified)?;
        } else if let Err(e) = session.rollback().await {
            warn!(target: "sqlgate::executor", error = %e, "rollback after read failed");
        }
        Ok(RawResult::Rows { columns: fetched.columns, rows: fetched.rows })
    }

    /// Multi-statement text cannot be prepared, so it runs through the simple protocol.
    /// Only committing roles may do this, and only without placeholders.
    async fn run_script(session: &mut dyn DbSession, raw_text: &str, policy: &ExecutionPolicy) -> AppResult<RawResult> {
        if !policy.may_commit_writes {
            return Err(AppError::validation("multiple_statements", "Read-only roles may run a single statement only"));
        }
        if !compile_named(raw_text).names.is_empty() {
            return Err(AppError::validation(
                "script_parameters",
                "Bind parameters are not supported in multi-statement scripts",
            ));
        }
        // The refused prepare aborted the transaction.
        session.rollback().await.map_err(classified)?;
        Self::open(session, policy).await?;
        let affected = session.run_script(raw_text).await.map_err(classified)?;
        session.commit().await.map_err(classified)?;
        debug!(target: "sqlgate::executor", affected, "script committed");
        Ok(RawResult::Affected(affected))
    }

    /// Catalog listing; no caller text is involved.
    pub async fn list_tables(&self, schema: &str) -> AppResult<Vec<TableInfo>> {
        let mut session = self.provider.acquire().await.map_err(classified)?;
        session.list_tables(schema).await.map_err(classified)
    }
}
