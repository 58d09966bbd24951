//! Approver resolution
//!
//! A step names its approvers by type (a user, a role, the requester's
//! manager, ...). Turning those into concrete user ids is delegated to a
//! [`Directory`] for organisation lookups and to named
//! [`ApproverStrategy`] implementations for `custom` approvers.

use approval_types::{ApproverType, BallotEntry, Request, Step, StepApprover, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What a resolver knows about the request being routed
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub request: &'a Request,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(request: &'a Request) -> Self {
        Self { request }
    }

    pub fn requester(&self) -> &UserId {
        &self.request.requester
    }
}

/// Organisation lookups used by the built-in approver types
pub trait Directory: Send + Sync {
    fn users_with_role(&self, role: &str) -> Vec<UserId>;

    fn manager_of(&self, user: &UserId) -> Option<UserId>;

    fn department_of(&self, user: &UserId) -> Option<String>;

    fn department_head(&self, department: &str) -> Option<UserId>;

    fn users_in_position(&self, position: &str) -> Vec<UserId>;
}

/// A caller-registered resolver for `custom` approvers
pub trait ApproverStrategy: Send + Sync {
    fn resolve(&self, approver: &StepApprover, context: &ResolutionContext<'_>) -> Vec<UserId>;
}

/// Resolves step approvers to concrete users
#[derive(Clone)]
pub struct ApproverResolver {
    directory: Arc<dyn Directory>,
    strategies: HashMap<String, Arc<dyn ApproverStrategy>>,
}

impl ApproverResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            strategies: HashMap::new(),
        }
    }

    /// Register a strategy for `custom` approvers whose reference is `name`
    pub fn register_strategy(
        &mut self,
        name: impl Into<String>,
        strategy: Arc<dyn ApproverStrategy>,
    ) -> &mut Self {
        self.strategies.insert(name.into(), strategy);
        self
    }

    pub fn with_strategy(
        mut self,
        name: impl Into<String>,
        strategy: Arc<dyn ApproverStrategy>,
    ) -> Self {
        self.register_strategy(name, strategy);
        self
    }

    /// Users behind one approver definition, de-duplicated in order
    pub fn resolve(&self, approver: &StepApprover, context: &ResolutionContext<'_>) -> Vec<UserId> {
        let reference = approver.reference.trim();
        let users = match approver.approver_type {
            ApproverType::User => {
                if reference.is_empty() {
                    Vec::new()
                } else {
                    vec![UserId::new(reference)]
                }
            }
            ApproverType::Role => self.directory.users_with_role(reference),
            ApproverType::Manager => self
                .directory
                .manager_of(context.requester())
                .into_iter()
                .collect(),
            ApproverType::DepartmentHead => {
                let department = if reference.is_empty() {
                    self.directory.department_of(context.requester())
                } else {
                    Some(reference.to_string())
                };
                department
                    .and_then(|d| self.directory.department_head(&d))
                    .into_iter()
                    .collect()
            }
            ApproverType::Position => self.directory.users_in_position(reference),
            ApproverType::Custom => match self.strategies.get(reference) {
                Some(strategy) => strategy.resolve(approver, context),
                None => {
                    tracing::warn!(strategy = reference, "No approver strategy registered");
                    Vec::new()
                }
            },
        };

        let mut seen = HashSet::new();
        users.into_iter().filter(|u| seen.insert(u.clone())).collect()
    }

    /// Ballot entries for every approver of `step`.
    ///
    /// A user reached through several approver definitions keeps the
    /// weight of the first one.
    pub fn resolve_step(&self, step: &Step, context: &ResolutionContext<'_>) -> Vec<BallotEntry> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for approver in &step.approvers {
            for user in self.resolve(approver, context) {
                if seen.insert(user.clone()) {
                    entries.push(BallotEntry::new(user, approver.weightage));
                }
            }
        }
        tracing::debug!(
            request_id = %context.request.id,
            step = %step.id,
            approvers = entries.len(),
            "Resolved step approvers"
        );
        entries
    }
}

impl Default for ApproverResolver {
    fn default() -> Self {
        Self::new(Arc::new(StaticDirectory::default()))
    }
}

// ── Static Directory ─────────────────────────────────────────────────

/// An in-memory organisation directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDirectory {
    /// role -> members
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
    /// user -> manager
    #[serde(default)]
    pub managers: HashMap<String, String>,
    /// user -> department
    #[serde(default)]
    pub departments: HashMap<String, String>,
    /// department -> head
    #[serde(default)]
    pub department_heads: HashMap<String, String>,
    /// position -> holders
    #[serde(default)]
    pub positions: HashMap<String, Vec<String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>, members: &[&str]) -> Self {
        self.roles
            .insert(role.into(), members.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn with_manager(mut self, user: impl Into<String>, manager: impl Into<String>) -> Self {
        self.managers.insert(user.into(), manager.into());
        self
    }

    pub fn with_department(
        mut self,
        user: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        self.departments.insert(user.into(), department.into());
        self
    }

    pub fn with_department_head(
        mut self,
        department: impl Into<String>,
        head: impl Into<String>,
    ) -> Self {
        self.department_heads.insert(department.into(), head.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>, holders: &[&str]) -> Self {
        self.positions
            .insert(position.into(), holders.iter().map(|h| h.to_string()).collect());
        self
    }
}

fn to_users(names: Option<&Vec<String>>) -> Vec<UserId> {
    names
        .map(|names| names.iter().map(UserId::new).collect())
        .unwrap_or_default()
}

impl Directory for StaticDirectory {
    fn users_with_role(&self, role: &str) -> Vec<UserId> {
        to_users(self.roles.get(role))
    }

    fn manager_of(&self, user: &UserId) -> Option<UserId> {
        self.managers.get(user.as_str()).map(UserId::new)
    }

    fn department_of(&self, user: &UserId) -> Option<String> {
        self.departments.get(user.as_str()).cloned()
    }

    fn department_head(&self, department: &str) -> Option<UserId> {
        self.department_heads.get(department).map(UserId::new)
    }

    fn users_in_position(&self, position: &str) -> Vec<UserId> {
        to_users(self.positions.get(position))
    }
}
