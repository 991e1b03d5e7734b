//! Scripted in-memory [`WorkloadGateway`] for tests
//!
//! Resources live in maps keyed by name; creating a name that already exists
//! fails with a 409 like the API server does. Watches replay a script of
//! `(delay, event)` pairs filtered by label selector and then stay open
//! unless `close_watches_after_script` is set. Each opened watch gets a flag
//! that flips when the stream is dropped.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentCondition, DeploymentSpec, DeploymentStatus,
};
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::WatchEvent;
use kube::error::ErrorResponse;
use kube::ResourceExt;

use super::{LogStream, WatchStream, WorkloadGateway};

pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

fn labels_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Pod carrying `labels` in the given phase
pub fn pod(name: &str, labels: &[(&str, &str)], phase: &str, message: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels_of(labels)),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            message: if message.is_empty() {
                None
            } else {
                Some(message.to_string())
            },
            ..Default::default()
        }),
    }
}

/// Replica counts reported by a deployment status
#[derive(Clone, Copy, Debug)]
pub struct Rollout {
    pub desired: i32,
    pub updated: i32,
    pub current: i32,
    pub available: i32,
    pub generation: i64,
    pub observed_generation: i64,
}

impl Rollout {
    pub fn complete(replicas: i32) -> Self {
        Self {
            desired: replicas,
            updated: replicas,
            current: replicas,
            available: replicas,
            generation: 1,
            observed_generation: 1,
        }
    }

    pub fn progressing(replicas: i32) -> Self {
        Self {
            available: 0,
            ..Self::complete(replicas)
        }
    }
}

pub fn deployment(site_id: &str, rollout: Rollout, conditions: &[(&str, &str, &str)]) -> Deployment {
    let labels = labels_of(&[("app", site_id)]);
    Deployment {
        metadata: ObjectMeta {
            name: Some(site_id.to_string()),
            labels: Some(labels),
            generation: Some(rollout.generation),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(rollout.desired),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            replicas: Some(rollout.current),
            updated_replicas: Some(rollout.updated),
            available_replicas: Some(rollout.available),
            observed_generation: Some(rollout.observed_generation),
            conditions: Some(
                conditions
                    .iter()
                    .map(|(type_, status, message)| DeploymentCondition {
                        type_: type_.to_string(),
                        status: status.to_string(),
                        message: Some(message.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

#[derive(Clone, Debug)]
pub enum LogChunk {
    Data(&'static str),
    /// A read that returned no bytes
    Idle,
    Fail(&'static str),
}

#[derive(Default)]
struct FakeState {
    pods: BTreeMap<String, Pod>,
    deployments: BTreeMap<String, Deployment>,
    services: BTreeMap<String, Service>,
    pod_script: Vec<(Duration, WatchEvent<Pod>)>,
    deployment_script: Vec<(Duration, WatchEvent<Deployment>)>,
    close_watches_after_script: bool,
    fail_watch: bool,
    stall_watch_open: Option<Duration>,
    fail_service_create: bool,
    fail_delete_deployment: bool,
    logs: BTreeMap<String, Vec<LogChunk>>,
    watch_flags: Vec<Arc<AtomicBool>>,
    calls: Vec<String>,
}

pub struct FakeGateway {
    namespace: String,
    state: Mutex<FakeState>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            namespace: "default".to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn script_pod_event(&self, delay: Duration, event: WatchEvent<Pod>) {
        self.with_state(|s| s.pod_script.push((delay, event)));
    }

    pub fn script_deployment_event(&self, delay: Duration, event: WatchEvent<Deployment>) {
        self.with_state(|s| s.deployment_script.push((delay, event)));
    }

    pub fn close_watches_after_script(&self) {
        self.with_state(|s| s.close_watches_after_script = true);
    }

    /// Make every watch open hang for `stall` before it returns
    pub fn stall_watch_open(&self, stall: Duration) {
        self.with_state(|s| s.stall_watch_open = Some(stall));
    }

    pub fn fail_watches(&self) {
        self.with_state(|s| s.fail_watch = true);
    }

    pub fn fail_service_create(&self) {
        self.with_state(|s| s.fail_service_create = true);
    }

    pub fn fail_delete_deployment(&self) {
        self.with_state(|s| s.fail_delete_deployment = true);
    }

    pub fn insert_pod(&self, pod: Pod) {
        self.with_state(|s| s.pods.insert(pod.name_any(), pod));
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        self.with_state(|s| s.deployments.insert(deployment.name_any(), deployment));
    }

    pub fn insert_service(&self, service: Service) {
        self.with_state(|s| s.services.insert(service.name_any(), service));
    }

    pub fn set_logs(&self, pod_name: &str, chunks: Vec<LogChunk>) {
        self.with_state(|s| s.logs.insert(pod_name.to_string(), chunks));
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.with_state(|s| s.pods.get(name).cloned())
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.with_state(|s| s.deployments.get(name).cloned())
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.with_state(|s| s.services.get(name).cloned())
    }

    pub fn opened_watches(&self) -> usize {
        self.with_state(|s| s.watch_flags.len())
    }

    /// True once every watch opened so far has been dropped
    pub fn all_watches_dropped(&self) -> bool {
        self.with_state(|s| s.watch_flags.iter().all(|f| f.load(Ordering::SeqCst)))
    }

    /// Names of the mutating calls made, in order
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    async fn stall(&self) {
        if let Some(stall) = self.with_state(|s| s.stall_watch_open) {
            tokio::time::sleep(stall).await;
        }
    }

    fn open_watch<K>(
        &self,
        label_selector: &str,
        script: Vec<(Duration, WatchEvent<K>)>,
        close: bool,
    ) -> WatchStream<K>
    where
        K: kube::Resource + Clone + Send + 'static,
    {
        let selector = parse_selector(label_selector);
        let events: Vec<_> = script
            .into_iter()
            .filter(|(_, event)| event_matches(event, &selector))
            .collect();
        let replay = stream::iter(events).then(|(delay, event)| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, kube::Error>(event)
        });
        let inner: BoxStream<'static, kube::Result<WatchEvent<K>>> = if close {
            replay.boxed()
        } else {
            replay.chain(stream::pending()).boxed()
        };

        let dropped = Arc::new(AtomicBool::new(false));
        self.with_state(|s| s.watch_flags.push(Arc::clone(&dropped)));
        Tracked { inner, dropped }.boxed()
    }
}

fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn matches_selector<K: kube::Resource>(obj: &K, selector: &[(String, String)]) -> bool {
    let labels = obj.meta().labels.clone().unwrap_or_default();
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map(|l| l == v).unwrap_or(false))
}

fn event_matches<K: kube::Resource>(event: &WatchEvent<K>, selector: &[(String, String)]) -> bool {
    match event {
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
            matches_selector(obj, selector)
        }
        WatchEvent::Bookmark(_) | WatchEvent::Error(_) => true,
    }
}

struct Tracked<S> {
    inner: S,
    dropped: Arc<AtomicBool>,
}

impl<S: Stream + Unpin> Stream for Tracked<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for Tracked<S> {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

fn conflict(kind: &str, name: &str) -> kube::Error {
    api_error(
        409,
        "AlreadyExists",
        &format!("{kind} \"{name}\" already exists"),
    )
}

fn not_found(kind: &str, name: &str) -> kube::Error {
    api_error(404, "NotFound", &format!("{kind} \"{name}\" not found"))
}

#[async_trait]
impl WorkloadGateway for FakeGateway {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_pod(&self, pod: &Pod) -> kube::Result<Pod> {
        let name = pod.name_any();
        self.with_state(|s| {
            s.calls.push(format!("create_pod:{name}"));
            if s.pods.contains_key(&name) {
                return Err(conflict("pods", &name));
            }
            s.pods.insert(name, pod.clone());
            Ok(pod.clone())
        })
    }

    async fn delete_pod(&self, name: &str) -> kube::Result<()> {
        self.with_state(|s| {
            s.calls.push(format!("delete_pod:{name}"));
            s.pods
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("pods", name))
        })
    }

    async fn list_pods(&self, label_selector: &str) -> kube::Result<Vec<Pod>> {
        let selector = parse_selector(label_selector);
        Ok(self.with_state(|s| {
            s.pods
                .values()
                .filter(|p| matches_selector(*p, &selector))
                .cloned()
                .collect()
        }))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment> {
        let name = deployment.name_any();
        self.with_state(|s| {
            s.calls.push(format!("create_deployment:{name}"));
            if s.deployments.contains_key(&name) {
                return Err(conflict("deployments.apps", &name));
            }
            let mut stored = deployment.clone();
            stored.metadata.generation = Some(1);
            s.deployments.insert(name, stored.clone());
            Ok(stored)
        })
    }

    async fn get_deployment(&self, name: &str) -> kube::Result<Deployment> {
        self.with_state(|s| {
            s.deployments
                .get(name)
                .cloned()
                .ok_or_else(|| not_found("deployments.apps", name))
        })
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment> {
        let name = deployment.name_any();
        self.with_state(|s| {
            s.calls.push(format!("replace_deployment:{name}"));
            let existing = s
                .deployments
                .get(&name)
                .ok_or_else(|| not_found("deployments.apps", &name))?;
            let mut stored = deployment.clone();
            stored.metadata.generation = Some(existing.metadata.generation.unwrap_or(0) + 1);
            s.deployments.insert(name, stored.clone());
            Ok(stored)
        })
    }

    async fn delete_deployment(&self, name: &str) -> kube::Result<()> {
        self.with_state(|s| {
            s.calls.push(format!("delete_deployment:{name}"));
            if s.fail_delete_deployment {
                return Err(api_error(500, "InternalError", "etcd unavailable"));
            }
            s.deployments
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("deployments.apps", name))
        })
    }

    async fn create_service(&self, service: &Service) -> kube::Result<Service> {
        let name = service.name_any();
        self.with_state(|s| {
            s.calls.push(format!("create_service:{name}"));
            if s.fail_service_create {
                return Err(api_error(422, "Invalid", "service port is invalid"));
            }
            if s.services.contains_key(&name) {
                return Err(conflict("services", &name));
            }
            s.services.insert(name, service.clone());
            Ok(service.clone())
        })
    }

    async fn delete_service(&self, name: &str) -> kube::Result<()> {
        self.with_state(|s| {
            s.calls.push(format!("delete_service:{name}"));
            s.services
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("services", name))
        })
    }

    async fn watch_pods(&self, label_selector: &str) -> kube::Result<WatchStream<Pod>> {
        self.stall().await;
        let (script, close, fail) = self.with_state(|s| {
            (
                s.pod_script.clone(),
                s.close_watches_after_script,
                s.fail_watch,
            )
        });
        if fail {
            return Err(api_error(403, "Forbidden", "cannot watch pods"));
        }
        Ok(self.open_watch(label_selector, script, close))
    }

    async fn watch_deployments(
        &self,
        label_selector: &str,
    ) -> kube::Result<WatchStream<Deployment>> {
        self.stall().await;
        let (script, close, fail) = self.with_state(|s| {
            (
                s.deployment_script.clone(),
                s.close_watches_after_script,
                s.fail_watch,
            )
        });
        if fail {
            return Err(api_error(403, "Forbidden", "cannot watch deployments"));
        }
        Ok(self.open_watch(label_selector, script, close))
    }

    async fn stream_pod_logs(&self, pod_name: &str, chunk_size: usize) -> kube::Result<LogStream> {
        let chunks = self
            .with_state(|s| s.logs.get(pod_name).cloned())
            .ok_or_else(|| not_found("pods", pod_name))?;
        let items = chunks.into_iter().flat_map(move |chunk| match chunk {
            LogChunk::Data(text) => text
                .as_bytes()
                .chunks(chunk_size.max(1))
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>(),
            LogChunk::Idle => vec![Ok(Bytes::new())],
            LogChunk::Fail(message) => vec![Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                message,
            ))],
        });
        Ok(stream::iter(items).boxed())
    }
}
