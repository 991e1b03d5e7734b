//! Deleting a site's cluster resources
//!
//! Deletions are best-effort: a resource that is already gone only logs a
//! warning, any other failure stops the teardown and is returned as is.

use tracing::{info, instrument, warn};

use super::build::builder_selector;
use crate::error::{Error, Result};
use crate::gateway::WorkloadGateway;

/// Delete the site's deployment, then its service
#[instrument(skip(gateway), fields(namespace = %gateway.namespace()))]
pub async fn teardown<G>(gateway: &G, deployment_name: &str, service_name: &str) -> Result<()>
where
    G: WorkloadGateway + ?Sized,
{
    match gateway.delete_deployment(deployment_name).await {
        Ok(()) => info!("Deleted deployment {}", deployment_name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("Deployment {} not found, already deleted", deployment_name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    match gateway.delete_service(service_name).await {
        Ok(()) => info!("Deleted service {}", service_name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("Service {} not found, already deleted", service_name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}

/// Delete any build pods still labelled for `site_id`; returns how many
#[instrument(skip(gateway), fields(namespace = %gateway.namespace()))]
pub async fn reap_build<G>(gateway: &G, site_id: &str) -> Result<usize>
where
    G: WorkloadGateway + ?Sized,
{
    let pods = gateway.list_pods(&builder_selector(site_id)).await?;
    let mut reaped = 0;
    for pod in pods {
        let Some(name) = pod.metadata.name else {
            continue;
        };
        match gateway.delete_pod(&name).await {
            Ok(()) => {
                info!("Deleted leftover build pod {}", name);
                reaped += 1;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!("Build pod {} not found, already deleted", name);
            }
            Err(e) => return Err(Error::KubeError(e)),
        }
    }
    Ok(reaped)
}
