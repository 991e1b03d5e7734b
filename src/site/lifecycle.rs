//! Site lifecycle guard and outcome mapping
//!
//! The engine never checks these guards itself. Callers run [`check`] before
//! invoking an engine operation and then fold the resulting [`WatchOutcome`]
//! back into the site with one of the `record_*` functions.

use std::fmt;

use super::types::{BuildStatus, DeployStatus, LastAction, Site};
use crate::engine::WatchOutcome;
use crate::error::{Error, Result};

/// User-facing actions gated by the lifecycle table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SiteAction {
    Build,
    Update,
    Deploy,
    Redeploy,
    Logs,
    Delete,
}

impl fmt::Display for SiteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SiteAction::Build => "build",
            SiteAction::Update => "update",
            SiteAction::Deploy => "deploy",
            SiteAction::Redeploy => "redeploy",
            SiteAction::Logs => "stream logs for",
            SiteAction::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Whether `action` is legal given the site's recorded statuses
pub fn is_allowed(site: &Site, action: SiteAction) -> bool {
    match action {
        SiteAction::Build | SiteAction::Update | SiteAction::Delete => true,
        SiteAction::Deploy => {
            site.build_status == BuildStatus::Success
                && site.deploy_status == DeployStatus::NotDeployed
                && site.last_action == LastAction::Build
        }
        SiteAction::Redeploy => {
            site.build_status == BuildStatus::Success
                && site.deploy_status == DeployStatus::RedeployRequired
                && site.last_action == LastAction::Update
        }
        SiteAction::Logs => {
            site.deploy_status == DeployStatus::Deployed && site.last_action == LastAction::Deploy
        }
    }
}

pub fn check(site: &Site, action: SiteAction) -> Result<()> {
    if is_allowed(site, action) {
        Ok(())
    } else {
        Err(Error::IllegalTransition {
            site_id: site.id.clone(),
            action: action.to_string(),
        })
    }
}

pub fn begin_build(site: &mut Site) {
    site.build_status = BuildStatus::Building;
    site.build_fail_reason.clear();
}

/// Fold a build outcome into the site after an initial build
pub fn record_build(site: &mut Site, outcome: &WatchOutcome<BuildStatus>) {
    apply_build_outcome(site, outcome);
    site.last_action = LastAction::Build;
}

/// Fold a build outcome into the site after a rebuild of an existing site.
/// The running deployment still serves the old image, so a redeploy is owed.
pub fn record_update(site: &mut Site, outcome: &WatchOutcome<BuildStatus>) {
    apply_build_outcome(site, outcome);
    site.last_action = LastAction::Update;
    site.deploy_status = DeployStatus::RedeployRequired;
}

pub fn begin_deploy(site: &mut Site) {
    site.deploy_status = DeployStatus::Deploying;
    site.deploy_fail_reason.clear();
}

pub fn record_deploy(site: &mut Site, outcome: &WatchOutcome<DeployStatus>) {
    match (&outcome.status, &outcome.error) {
        (Some(status), _) => {
            site.deploy_status = *status;
            site.deploy_fail_reason = outcome.reason.clone();
        }
        (None, error) => {
            site.deploy_status = DeployStatus::DeploymentFailed;
            site.deploy_fail_reason = undetermined_reason(error);
        }
    }
    site.last_action = LastAction::Deploy;
}

/// Mark a deploy that failed before any watch could start
pub fn record_deploy_error(site: &mut Site, error: &Error) {
    site.deploy_status = DeployStatus::DeploymentFailed;
    site.deploy_fail_reason = error.to_string();
    site.last_action = LastAction::Deploy;
}

/// Mark a build that failed before any watch could start
pub fn record_build_error(site: &mut Site, error: &Error, action: LastAction) {
    site.build_status = BuildStatus::Failed;
    site.build_fail_reason = error.to_string();
    site.last_action = action;
}

fn apply_build_outcome(site: &mut Site, outcome: &WatchOutcome<BuildStatus>) {
    match (&outcome.status, &outcome.error) {
        (Some(status), _) => {
            site.build_status = *status;
            site.build_fail_reason = outcome.reason.clone();
        }
        (None, error) => {
            site.build_status = BuildStatus::Failed;
            site.build_fail_reason = undetermined_reason(error);
        }
    }
}

fn undetermined_reason(error: &Option<Error>) -> String {
    error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "Outcome undetermined".to_string())
}
