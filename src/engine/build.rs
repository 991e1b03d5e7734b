//! Image builds
//!
//! A build is a single pod with two stages: an init container that fetches
//! the uploaded bundle and writes the Dockerfile and registry credentials, and
//! a kaniko executor that builds and pushes the image. The pod has a fixed
//! name, so the cluster itself refuses a second concurrent build with a 409.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::time::{timeout_at, Instant};
use tracing::{info, instrument, warn};

use super::watch::{observe, WatchOutcome};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::gateway::WorkloadGateway;
use crate::site::BuildStatus;

/// Label key tying the build pod to the site it builds
pub const BUILDER_LABEL: &str = "builder";

const WORKSPACE_VOLUME: &str = "shared";
const WORKSPACE_PATH: &str = "/workspace";
const DOCKER_CONFIG_VOLUME: &str = "dockerconfig";
const DOCKER_CONFIG_PATH: &str = "/kaniko/.docker";

pub fn builder_selector(site_id: &str) -> String {
    format!("{BUILDER_LABEL}={site_id}")
}

/// Create the build pod for `site_id`, pushing to `image_destination`.
///
/// Returns once the API has accepted the pod; the build itself is observed
/// with [`await_build`].
#[instrument(skip(gateway, settings), fields(namespace = %gateway.namespace()))]
pub async fn start_build<G>(
    gateway: &G,
    settings: &Settings,
    site_id: &str,
    image_destination: &str,
) -> Result<()>
where
    G: WorkloadGateway + ?Sized,
{
    let pod = build_pod(settings, site_id, image_destination);
    gateway.create_pod(&pod).await?;
    info!(
        "Created build pod {} for site {}",
        settings.build_pod_name, site_id
    );
    Ok(())
}

/// Delete the build pod whatever state it is in, freeing the build slot
#[instrument(skip(gateway, settings), fields(namespace = %gateway.namespace()))]
pub async fn stop_build<G>(gateway: &G, settings: &Settings) -> Result<()>
where
    G: WorkloadGateway + ?Sized,
{
    match gateway.delete_pod(&settings.build_pod_name).await {
        Ok(()) => info!("Deleted build pod {}", settings.build_pod_name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!(
                "Build pod {} not found, already deleted",
                settings.build_pod_name
            );
        }
        Err(e) => return Err(Error::KubeError(e)),
    }
    Ok(())
}

/// Wait for the site's build pod to reach `Succeeded` or `Failed`.
///
/// Times out as `Failed` / "Watch Timeout". The window starts on entry, so a
/// slow watch open counts against it. If the watch cannot be opened the
/// outcome carries only the error.
#[instrument(skip(gateway), fields(namespace = %gateway.namespace()))]
pub async fn await_build<G>(
    gateway: &G,
    site_id: &str,
    timeout: Duration,
) -> WatchOutcome<BuildStatus>
where
    G: WorkloadGateway + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let opened = timeout_at(deadline, gateway.watch_pods(&builder_selector(site_id))).await;
    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return WatchOutcome::undetermined(Error::KubeError(e)),
        Err(_elapsed) => {
            warn!("Build watch for site {} did not open in time", site_id);
            return WatchOutcome::timed_out(BuildStatus::Failed);
        }
    };

    let outcome = observe(stream, deadline, BuildStatus::Failed, judge_build_pod).await;
    match &outcome.status {
        Some(BuildStatus::Success) => info!("Build for site {} succeeded", site_id),
        Some(status) => warn!(
            "Build for site {} ended as {}: {}",
            site_id, status, outcome.reason
        ),
        None => warn!("Build watch for site {} could not complete", site_id),
    }
    outcome
}

/// Terminal build status for a pod, if its phase is terminal
pub fn judge_build_pod(pod: &Pod) -> Option<(BuildStatus, String)> {
    let status = pod.status.as_ref()?;
    let message = status.message.clone().unwrap_or_default();
    match status.phase.as_deref()? {
        "Succeeded" => Some((BuildStatus::Success, message)),
        "Failed" => Some((BuildStatus::Failed, message)),
        _ => None,
    }
}

pub(crate) fn build_pod(settings: &Settings, site_id: &str, image_destination: &str) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert(BUILDER_LABEL.to_string(), site_id.to_string());

    let mounts = vec![
        VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: WORKSPACE_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: DOCKER_CONFIG_VOLUME.to_string(),
            mount_path: DOCKER_CONFIG_PATH.to_string(),
            ..Default::default()
        },
    ];

    Pod {
        metadata: ObjectMeta {
            name: Some(settings.build_pod_name.clone()),
            namespace: Some(settings.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers: Some(vec![Container {
                name: "setup-builder".to_string(),
                image: Some(settings.builder_setup_image.clone()),
                command: Some(vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    setup_script(settings, site_id),
                ]),
                volume_mounts: Some(mounts.clone()),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: "builder".to_string(),
                image: Some(settings.builder_image.clone()),
                args: Some(vec![
                    format!("--dockerfile={WORKSPACE_PATH}/Dockerfile"),
                    format!("--context=dir://{WORKSPACE_PATH}"),
                    format!("--destination={image_destination}"),
                ]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            volumes: Some(vec![
                empty_dir(WORKSPACE_VOLUME),
                empty_dir(DOCKER_CONFIG_VOLUME),
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Dockerfile that serves the unpacked bundle's `build/` directory
pub(crate) fn dockerfile(settings: &Settings) -> String {
    [
        "FROM node:alpine".to_string(),
        "WORKDIR /app".to_string(),
        "RUN yarn global add serve".to_string(),
        "COPY . .".to_string(),
        "RUN unzip build.zip".to_string(),
        format!(
            "CMD [\"serve\", \"-p\", \"{}\", \"-s\", \"./build\"]",
            settings.site_port
        ),
    ]
    .join("\n")
}

fn setup_script(settings: &Settings, site_id: &str) -> String {
    let docker_config = serde_json::json!({
        "auths": {
            settings.registry.as_str(): { "auth": settings.registry_credentials }
        }
    })
    .to_string();

    [
        format!(
            "wget -O {WORKSPACE_PATH}/build.zip {}",
            shell_quote(&settings.bundle_url(site_id))
        ),
        format!(
            "printf '%s\\n' {} > {WORKSPACE_PATH}/Dockerfile",
            shell_quote(&dockerfile(settings))
        ),
        format!(
            "printf '%s' {} > {DOCKER_CONFIG_PATH}/config.json",
            shell_quote(&docker_config)
        ),
    ]
    .join(" && ")
}

/// Single-quote `value` for `/bin/sh`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
