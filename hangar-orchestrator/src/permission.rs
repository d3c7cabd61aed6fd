//! Authorization seam consulted before every facade operation.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Owner,
    TemplateAdmin,
    Auditor,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::TemplateAdmin => "template-admin",
            Role::Auditor => "auditor",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "owner" => Ok(Role::Owner),
            "template-admin" => Ok(Role::TemplateAdmin),
            "auditor" => Ok(Role::Auditor),
            "member" => Ok(Role::Member),
            other => Err(OrchestratorError::InvalidInput(format!("unknown role '{}'", other))),
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateWorkspace,
    ReadWorkspace,
    /// Start, stop or delete builds, and cancel them.
    UpdateWorkspace,
    ReadState,
    WriteState,
}

/// What an action targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// A workspace that does not exist yet, to be owned by `owner`.
    NewWorkspace { owner: String },
    Workspace { id: String, owner: String },
    /// A job not tied to any workspace, such as a template import.
    Job { id: String },
}

impl Resource {
    pub fn owner(&self) -> Option<&str> {
        match self {
            Resource::NewWorkspace { owner } | Resource::Workspace { owner, .. } => Some(owner),
            Resource::Job { .. } => None,
        }
    }
}

/// Yes/no authorization decision.
pub trait PermissionGate: Send + Sync {
    fn allowed(&self, actor: &Actor, action: Action, resource: &Resource) -> bool;
}

/// Role-based policy.
///
/// `owner` and `template-admin` may do anything. A workspace's owning user
/// may use it fully, state included. `auditor` may read any workspace but
/// never its state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleGate;

impl PermissionGate for RoleGate {
    fn allowed(&self, actor: &Actor, action: Action, resource: &Resource) -> bool {
        if actor.has_role(Role::Owner) || actor.has_role(Role::TemplateAdmin) {
            return true;
        }
        if resource.owner() == Some(actor.id.as_str()) {
            return true;
        }
        action == Action::ReadWorkspace && actor.has_role(Role::Auditor)
    }
}

pub(crate) fn authorize(
    gate: &dyn PermissionGate,
    actor: &Actor,
    action: Action,
    resource: &Resource,
) -> Result<()> {
    if gate.allowed(actor, action, resource) {
        return Ok(());
    }
    Err(OrchestratorError::PermissionDenied(format!(
        "{} may not {:?} {:?}",
        actor.id, action, resource
    )))
}

/// Parse a comma-separated role list, ignoring blanks.
pub fn parse_roles(value: &str) -> Result<Vec<Role>> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(Role::from_str)
        .collect()
}
