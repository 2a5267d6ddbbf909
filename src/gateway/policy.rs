//! Role → capability table and the single authorization decision made per request.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::identity::{Principal, Role};

use super::normalize::StatementKind;

/// Default statement ceiling for read-only roles.
pub const DEVELOPER_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a role may do once it has reached the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub allowed_statement_kinds: Vec<StatementKind>,
    pub enforce_function_blacklist: bool,
    pub statement_timeout: Option<Duration>,
    pub may_commit_writes: bool,
}

impl ExecutionPolicy {
    pub fn unrestricted() -> Self {
        Self {
            allowed_statement_kinds: vec![StatementKind::Select, StatementKind::With, StatementKind::Other],
            enforce_function_blacklist: false,
            statement_timeout: None,
            may_commit_writes: true,
        }
    }

    pub fn read_only(timeout: Option<Duration>) -> Self {
        Self {
            allowed_statement_kinds: vec![StatementKind::Select, StatementKind::With],
            enforce_function_blacklist: true,
            statement_timeout: timeout,
            may_commit_writes: false,
        }
    }

    pub fn allows(&self, kind: StatementKind) -> bool {
        self.allowed_statement_kinds.contains(&kind)
    }
}

/// Built once at startup. Roles without an entry never reach the gateway.
#[derive(Debug, Clone)]
pub struct RoleTable {
    entries: HashMap<Role, ExecutionPolicy>,
}

impl Default for RoleTable {
    fn default() -> Self { Self::standard(Some(DEVELOPER_STATEMENT_TIMEOUT)) }
}

impl RoleTable {
    pub fn empty() -> Self { Self { entries: HashMap::new() } }

    /// ADMIN unrestricted; DEVELOPER read-only with blacklist and the given timeout.
    pub fn standard(developer_timeout: Option<Duration>) -> Self {
        Self::empty()
            .with_role(Role::Admin, ExecutionPolicy::unrestricted())
            .with_role(Role::Developer, ExecutionPolicy::read_only(developer_timeout))
    }

    pub fn with_role(mut self, role: Role, policy: ExecutionPolicy) -> Self {
        self.entries.insert(role, policy);
        self
    }

    pub fn policy_for(&self, role: Role) -> Option<&ExecutionPolicy> { self.entries.get(&role) }

    /// Role gate only. Runs before the query text is looked at.
    pub fn admit(&self, principal: &Principal) -> AppResult<&ExecutionPolicy> {
        self.entries.get(&principal.role).ok_or_else(|| {
            AppError::denied(
                "role_denied".to_string(),
                format!("Role {} may not use the SQL gateway; only ADMIN and DEVELOPER may", principal.role),
            )
        })
    }

    /// `authorize(principal, classification) -> ExecutionPolicy | Denied`.
    pub fn authorize(&self, principal: &Principal, kind: StatementKind) -> AppResult<ExecutionPolicy> {
        let policy = self.admit(principal)?;
        if !policy.allows(kind) {
            return Err(AppError::denied(
                "read_only_role".to_string(),
                format!("Read-only role {} attempted a non-read statement; only SELECT/WITH queries are allowed", principal.role),
            ));
        }
        Ok(policy.clone())
    }
}
