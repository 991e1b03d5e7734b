//! [`WorkloadGateway`] backed by a live cluster through kube-rs

use async_trait::async_trait;
use bytes::Bytes;
use futures::io::{AsyncRead, AsyncReadExt};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, WatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, instrument};

use super::{LogStream, WatchStream, WorkloadGateway};

/// Empty resourceVersion: the API server answers with a consistent read of
/// the current state instead of its possibly stale watch cache ("0").
const LATEST_RESOURCE_VERSION: &str = "";

fn label_watch(label_selector: &str) -> WatchParams {
    WatchParams::default().labels(label_selector)
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    namespace: String,
}

impl KubeGateway {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl WorkloadGateway for KubeGateway {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self, pod), fields(name = %pod.name_any(), namespace = %self.namespace))]
    async fn create_pod(&self, pod: &Pod) -> kube::Result<Pod> {
        self.pods().create(&PostParams::default(), pod).await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn delete_pod(&self, name: &str) -> kube::Result<()> {
        self.pods()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn list_pods(&self, label_selector: &str) -> kube::Result<Vec<Pod>> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.pods().list(&lp).await?.items)
    }

    #[instrument(skip(self, deployment), fields(name = %deployment.name_any(), namespace = %self.namespace))]
    async fn create_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment> {
        self.deployments()
            .create(&PostParams::default(), deployment)
            .await
    }

    async fn get_deployment(&self, name: &str) -> kube::Result<Deployment> {
        self.deployments().get(name).await
    }

    #[instrument(skip(self, deployment), fields(name = %deployment.name_any(), namespace = %self.namespace))]
    async fn replace_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment> {
        self.deployments()
            .replace(&deployment.name_any(), &PostParams::default(), deployment)
            .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn delete_deployment(&self, name: &str) -> kube::Result<()> {
        self.deployments()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, service), fields(name = %service.name_any(), namespace = %self.namespace))]
    async fn create_service(&self, service: &Service) -> kube::Result<Service> {
        self.services().create(&PostParams::default(), service).await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn delete_service(&self, name: &str) -> kube::Result<()> {
        self.services()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn watch_pods(&self, label_selector: &str) -> kube::Result<WatchStream<Pod>> {
        debug!("Opening pod watch for {}", label_selector);
        Ok(self
            .pods()
            .watch(&label_watch(label_selector), LATEST_RESOURCE_VERSION)
            .await?
            .boxed())
    }

    async fn watch_deployments(
        &self,
        label_selector: &str,
    ) -> kube::Result<WatchStream<Deployment>> {
        debug!("Opening deployment watch for {}", label_selector);
        Ok(self
            .deployments()
            .watch(&label_watch(label_selector), LATEST_RESOURCE_VERSION)
            .await?
            .boxed())
    }

    async fn stream_pod_logs(&self, pod_name: &str, chunk_size: usize) -> kube::Result<LogStream> {
        let params = LogParams {
            follow: true,
            ..Default::default()
        };
        let reader = self.pods().log_stream(pod_name, &params).await?;
        Ok(chunked(reader, chunk_size))
    }
}

/// Turn a byte reader into a stream of chunks of at most `chunk_size` bytes
fn chunked<R>(reader: R, chunk_size: usize) -> LogStream
where
    R: AsyncRead + Send + 'static,
{
    let buf = vec![0u8; chunk_size.max(1)];
    futures::stream::unfold(
        (Box::pin(reader), buf, false),
        |(mut reader, mut buf, failed)| async move {
            if failed {
                return None;
            }
            match reader.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => Some((Ok(Bytes::copy_from_slice(&buf[..n])), (reader, buf, false))),
                Err(e) => Some((Err(e), (reader, buf, true))),
            }
        },
    )
    .boxed()
}
