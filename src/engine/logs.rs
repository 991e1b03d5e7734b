//! Fanning in log streams from every pod of a site
//!
//! Streams are opened concurrently, one forwarding task per pod. Each task
//! tags the chunks it reads with its pod name and pushes them to a shared
//! sink. Order is kept per pod only.

use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use futures::StreamExt;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::gateway::{LogStream, WorkloadGateway};

/// One chunk of output from one pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFrame {
    pub pod: String,
    pub data: Bytes,
}

impl LogFrame {
    /// Server-sent event line: `data: <pod> <chunk>` followed by a blank line
    pub fn to_sse(&self) -> String {
        format!("data: {} {}\n\n", self.pod, String::from_utf8_lossy(&self.data))
    }
}

/// What happened across all pods once every forwarding path has ended
#[derive(Debug, Default)]
pub struct LogSummary {
    pub pods: usize,
    pub frames: usize,
    /// Per-pod failures; other pods keep streaming when one fails
    pub errors: Vec<Error>,
}

enum PodEnd {
    Eof,
    SinkClosed,
}

/// Stream logs from every pod matching `label_selector` into `sink` until
/// every pod's stream has ended or the sink is closed.
#[instrument(skip(gateway, settings, sink), fields(namespace = %gateway.namespace()))]
pub async fn stream_logs<G>(
    gateway: &G,
    settings: &Settings,
    label_selector: &str,
    sink: mpsc::Sender<LogFrame>,
) -> Result<LogSummary>
where
    G: WorkloadGateway + ?Sized,
{
    let pods = gateway.list_pods(label_selector).await?;
    let names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
    info!("Streaming logs from {} pods", names.len());

    let opened = join_all(
        names
            .iter()
            .map(|name| gateway.stream_pod_logs(name, settings.log_chunk_size)),
    )
    .await;

    let mut summary = LogSummary {
        pods: names.len(),
        ..Default::default()
    };
    let mut forwarders = JoinSet::new();
    for (pod, stream) in names.into_iter().zip(opened) {
        match stream {
            Ok(stream) => {
                forwarders.spawn(forward(
                    pod,
                    stream,
                    sink.clone(),
                    settings.log_poll_interval(),
                ));
            }
            Err(e) => {
                warn!("Could not open log stream for pod {}: {}", pod, e);
                summary.errors.push(Error::KubeError(e));
            }
        }
    }
    drop(sink);

    while let Some(joined) = forwarders.join_next().await {
        match joined {
            Ok((frames, Ok(PodEnd::Eof))) => summary.frames += frames,
            Ok((frames, Ok(PodEnd::SinkClosed))) => {
                summary.frames += frames;
                debug!("Log sink closed, stopping remaining pods");
                forwarders.abort_all();
            }
            Ok((frames, Err(e))) => {
                summary.frames += frames;
                summary.errors.push(e);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Log forwarder panicked: {}", e),
        }
    }

    info!(
        "Log streaming finished: {} frames from {} pods",
        summary.frames, summary.pods
    );
    Ok(summary)
}

async fn forward(
    pod: String,
    mut stream: LogStream,
    sink: mpsc::Sender<LogFrame>,
    poll_interval: Duration,
) -> (usize, Result<PodEnd>) {
    let mut frames = 0;
    while let Some(chunk) = stream.next().await {
        let data = match chunk {
            Ok(data) => data,
            Err(source) => {
                warn!("Log stream for pod {} failed: {}", pod, source);
                return (frames, Err(Error::LogStream { pod, source }));
            }
        };
        if data.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }
        let frame = LogFrame {
            pod: pod.clone(),
            data,
        };
        if sink.send(frame).await.is_err() {
            return (frames, Ok(PodEnd::SinkClosed));
        }
        frames += 1;
    }
    debug!("Log stream for pod {} ended", pod);
    (frames, Ok(PodEnd::Eof))
}
