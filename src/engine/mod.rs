//! Build-and-deploy orchestration
//!
//! Each operation is a one-shot sequence of cluster calls through a
//! [`WorkloadGateway`](crate::gateway::WorkloadGateway). Watches resolve to a
//! [`WatchOutcome`] within a bounded window; [`SiteActions`] strings the
//! operations together and keeps the site record in step.

mod actions;
pub mod build;
pub mod deploy;
pub mod logs;
pub mod reaper;
pub mod redeploy;
mod watch;

pub use actions::SiteActions;
pub use build::{await_build, start_build, stop_build};
pub use deploy::{await_deploy, deploy};
pub use logs::{stream_logs, LogFrame, LogSummary};
pub use reaper::{reap_build, teardown};
pub use redeploy::touch;
pub use watch::{WatchOutcome, WATCH_TIMEOUT_REASON};
