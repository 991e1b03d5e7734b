//! Site deployments
//!
//! Each site runs as one Deployment plus one ClusterIP Service, both labelled
//! `app=<site-id>`. The Deployment is named after the site, the Service after
//! [`Settings::service_name`].

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, LocalObjectReference, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::watch::{observe, WatchOutcome};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::gateway::WorkloadGateway;
use crate::site::DeployStatus;

/// Label key carrying the site id on deployments, pods and services
pub const APP_LABEL: &str = "app";

const REPLICA_FAILURE: &str = "ReplicaFailure";

pub fn app_labels(site_id: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL.to_string(), site_id.to_string());
    labels
}

pub fn app_selector(site_id: &str) -> String {
    format!("{APP_LABEL}={site_id}")
}

/// Create the site's Deployment and then its Service.
///
/// If the Deployment is created but the Service is not, the Deployment is
/// left running and [`Error::PartialDeploy`] is returned.
#[instrument(skip(gateway, settings, label), fields(namespace = %gateway.namespace()))]
pub async fn deploy<G>(
    gateway: &G,
    settings: &Settings,
    site_id: &str,
    label: &BTreeMap<String, String>,
    image_name: &str,
    replicas: i32,
) -> Result<()>
where
    G: WorkloadGateway + ?Sized,
{
    let deployment = build_deployment(settings, site_id, label, image_name, replicas);
    gateway.create_deployment(&deployment).await?;
    info!("Created deployment {} ({} replicas)", site_id, replicas);

    let service = build_service(settings, site_id, label);
    let service_name = settings.service_name(site_id);
    match gateway.create_service(&service).await {
        Ok(_) => {
            info!("Created service {}", service_name);
            Ok(())
        }
        Err(source) => {
            error!(
                "Service {} could not be created, deployment {} left in place: {}",
                service_name, site_id, source
            );
            Err(Error::PartialDeploy {
                deployment: site_id.to_string(),
                service: service_name,
                source,
            })
        }
    }
}

/// Wait for the site's deployment to finish rolling out.
///
/// A `ReplicaFailure` condition ends the watch as `DeploymentFailed` even if
/// the replica counts look ready. Times out as `DeploymentFailed` /
/// "Watch Timeout", counted from entry so opening the watch is inside the
/// window.
#[instrument(skip(gateway), fields(namespace = %gateway.namespace()))]
pub async fn await_deploy<G>(
    gateway: &G,
    site_id: &str,
    timeout: Duration,
) -> WatchOutcome<DeployStatus>
where
    G: WorkloadGateway + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let opened = timeout_at(deadline, gateway.watch_deployments(&app_selector(site_id))).await;
    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return WatchOutcome::undetermined(Error::KubeError(e)),
        Err(_elapsed) => {
            warn!("Deployment watch for {} did not open in time", site_id);
            return WatchOutcome::timed_out(DeployStatus::DeploymentFailed);
        }
    };

    let outcome = observe(
        stream,
        deadline,
        DeployStatus::DeploymentFailed,
        judge_deployment,
    )
    .await;
    match &outcome.status {
        Some(DeployStatus::Deployed) => info!("Deployment {} is available", site_id),
        Some(status) => warn!(
            "Deployment {} ended as {}: {}",
            site_id, status, outcome.reason
        ),
        None => warn!("Deployment watch for {} could not complete", site_id),
    }
    outcome
}

/// Terminal deploy status for a deployment, if it has reached one
pub fn judge_deployment(deployment: &Deployment) -> Option<(DeployStatus, String)> {
    if let Some(condition) = replica_failure(deployment) {
        let message = condition.message.clone().unwrap_or_default();
        return Some((DeployStatus::DeploymentFailed, message));
    }
    if is_rollout_complete(deployment) {
        return Some((DeployStatus::Deployed, String::new()));
    }
    debug!("Deployment rollout still in progress");
    None
}

/// Updated, current and available replicas all match the desired count, and
/// the controller has observed the latest generation of the spec.
pub fn is_rollout_complete(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);

    status.updated_replicas.unwrap_or(0) == desired
        && status.replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
        && status.observed_generation.unwrap_or(0) >= generation
}

fn replica_failure(deployment: &Deployment) -> Option<&DeploymentCondition> {
    deployment
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == REPLICA_FAILURE && c.status != "False")
}

pub(crate) fn build_deployment(
    settings: &Settings,
    site_id: &str,
    label: &BTreeMap<String, String>,
    image_name: &str,
    replicas: i32,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(site_id.to_string()),
            namespace: Some(settings.namespace.clone()),
            labels: Some(app_labels(site_id)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(label.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(label.clone()),
                    annotations: Some(BTreeMap::new()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Always".to_string()),
                    containers: vec![Container {
                        name: site_id.to_string(),
                        image: Some(image_name.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: settings.site_port,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: Some(settings.image_pull_secret.clone()),
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn build_service(
    settings: &Settings,
    site_id: &str,
    label: &BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(settings.service_name(site_id)),
            namespace: Some(settings.namespace.clone()),
            labels: Some(app_labels(site_id)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(label.clone()),
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port: settings.site_port,
                target_port: Some(IntOrString::Int(settings.site_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}
