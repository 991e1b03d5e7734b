//! Site record and lifecycle enums
//!
//! The enums serialise to the exact strings stored in the site record so that
//! outcomes are always one of the declared values.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    #[default]
    NotBuilt,
    Building,
    Success,
    Failed,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::NotBuilt => "NotBuilt",
            BuildStatus::Building => "Building",
            BuildStatus::Success => "Success",
            BuildStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployStatus {
    #[default]
    NotDeployed,
    Deploying,
    Deployed,
    DeploymentFailed,
    RedeployRequired,
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployStatus::NotDeployed => "NotDeployed",
            DeployStatus::Deploying => "Deploying",
            DeployStatus::Deployed => "Deployed",
            DeployStatus::DeploymentFailed => "DeploymentFailed",
            DeployStatus::RedeployRequired => "RedeployRequired",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LastAction {
    #[default]
    Create,
    Build,
    Update,
    Deploy,
}

impl fmt::Display for LastAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LastAction::Create => "Create",
            LastAction::Build => "Build",
            LastAction::Update => "Update",
            LastAction::Deploy => "Deploy",
        };
        write!(f, "{s}")
    }
}

/// A hosted static site as persisted by the site store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub build_status: BuildStatus,
    pub build_fail_reason: String,
    pub deploy_status: DeployStatus,
    pub deploy_fail_reason: String,
    pub last_action: LastAction,
    /// Hosting config this site belongs to
    pub config_id: String,
}

impl Site {
    /// A freshly created site: not built, not deployed, last action `Create`
    pub fn new(config_id: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), config_id)
    }

    pub fn with_id(id: impl Into<String>, config_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            build_status: BuildStatus::default(),
            build_fail_reason: String::new(),
            deploy_status: DeployStatus::default(),
            deploy_fail_reason: String::new(),
            last_action: LastAction::default(),
            config_id: config_id.into(),
        }
    }

    /// Label value used on every workload belonging to this site
    pub fn app_label(&self) -> String {
        format!("app={}", self.id)
    }
}

/// Per-project hosting configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingConfig {
    pub id: String,
    pub owner: String,
    pub project: String,
    pub enabled: bool,
}

/// Owner/project pair every user-facing action is scoped to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProjectScope {
    pub owner: String,
    pub project: String,
}

impl ProjectScope {
    pub fn new(owner: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            project: project.into(),
        }
    }
}
