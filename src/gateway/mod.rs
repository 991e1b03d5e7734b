//! Capability surface over the Kubernetes API
//!
//! Every call is scoped to the gateway's namespace. Failures are returned
//! exactly as the API reported them; nothing here retries.

mod kubernetes;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::WatchEvent;

pub use kubernetes::KubeGateway;

/// Label-filtered event stream for one resource kind
pub type WatchStream<K> = BoxStream<'static, kube::Result<WatchEvent<K>>>;

/// Following log stream of a single pod, in read-sized chunks.
///
/// An empty chunk means a read returned no data yet; the end of the stream
/// means the pod's log is closed.
pub type LogStream = BoxStream<'static, std::io::Result<Bytes>>;

#[async_trait]
pub trait WorkloadGateway: Send + Sync {
    fn namespace(&self) -> &str;

    async fn create_pod(&self, pod: &Pod) -> kube::Result<Pod>;

    async fn delete_pod(&self, name: &str) -> kube::Result<()>;

    async fn list_pods(&self, label_selector: &str) -> kube::Result<Vec<Pod>>;

    async fn create_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment>;

    async fn get_deployment(&self, name: &str) -> kube::Result<Deployment>;

    async fn replace_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment>;

    async fn delete_deployment(&self, name: &str) -> kube::Result<()>;

    async fn create_service(&self, service: &Service) -> kube::Result<Service>;

    async fn delete_service(&self, name: &str) -> kube::Result<()>;

    async fn watch_pods(&self, label_selector: &str) -> kube::Result<WatchStream<Pod>>;

    async fn watch_deployments(&self, label_selector: &str)
        -> kube::Result<WatchStream<Deployment>>;

    async fn stream_pod_logs(&self, pod_name: &str, chunk_size: usize)
        -> kube::Result<LogStream>;
}
