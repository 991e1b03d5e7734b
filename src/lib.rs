//! sitehost: build-and-deploy orchestration for static sites on Kubernetes
//!
//! An uploaded bundle is built into an image by a single build pod, then run
//! as a Deployment behind a ClusterIP Service. Every step is a one-shot
//! sequence of cluster calls bounded by a watch deadline; the site record
//! tracks where each site is in its lifecycle.

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod site;
pub mod telemetry;

pub use crate::error::{Error, Result};
