//! Restarting a site's pods without changing its image

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{info, instrument};

use crate::error::Result;
use crate::gateway::WorkloadGateway;

/// Pod-template annotation bumped to force a rollout
pub const RESTARTED_AT_ANNOTATION: &str = "sitehost/restarted-at";

/// Stamp the deployment's pod template with the current time and resubmit it.
///
/// A template without metadata or annotations gets them created.
#[instrument(skip(gateway), fields(namespace = %gateway.namespace()))]
pub async fn touch<G>(gateway: &G, name: &str) -> Result<Deployment>
where
    G: WorkloadGateway + ?Sized,
{
    let mut deployment = gateway.get_deployment(name).await?;
    let restarted_at = Utc::now().to_rfc3339();
    stamp_restart(&mut deployment, &restarted_at);

    let updated = gateway.replace_deployment(&deployment).await?;
    info!("Requested restart of deployment {} at {}", name, restarted_at);
    Ok(updated)
}

fn stamp_restart(deployment: &mut Deployment, restarted_at: &str) {
    let template = &mut deployment.spec.get_or_insert_with(Default::default).template;
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(RESTARTED_AT_ANNOTATION.to_string(), restarted_at.to_string());
}
