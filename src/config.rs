//! Engine settings
//!
//! Settings can be loaded from a TOML file and are then overridden by CLI
//! flags / environment variables in `main.rs`. Every field has a default so a
//! partial file is valid.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Namespace every workload is created in
    pub namespace: String,

    /// Container registry host images are pushed to
    pub registry: String,

    /// Registry project (path segment between registry and site id)
    pub project: String,

    /// Base64 `user:password` written into the builder's docker config
    pub registry_credentials: String,

    /// Prefix of the per-site service name
    pub service_prefix: String,

    /// Endpoint the build setup stage fetches bundles from
    pub bundle_endpoint: String,

    /// Fixed name of the build pod. Only one build can exist at a time.
    pub build_pod_name: String,

    pub builder_setup_image: String,
    pub builder_image: String,

    /// Port the built site serves on, exposed by the service as well
    pub site_port: i32,

    pub image_pull_secret: String,
    pub replicas: i32,

    pub build_timeout_secs: u64,
    pub deploy_timeout_secs: u64,

    pub log_chunk_size: usize,
    pub log_poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            registry: "ghcr.io".to_string(),
            project: "cloudbase-project".to_string(),
            registry_credentials: String::new(),
            service_prefix: "cloudbase-ssh".to_string(),
            bundle_endpoint: "http://cloudbase-ssh-svc:4000/worker/queue".to_string(),
            build_pod_name: "kaniko-worker".to_string(),
            builder_setup_image: "yauritux/busybox-curl".to_string(),
            builder_image: "gcr.io/kaniko-project/executor:latest".to_string(),
            site_port: 4000,
            image_pull_secret: "regcred".to_string(),
            replicas: 1,
            build_timeout_secs: 60,
            deploy_timeout_secs: 30,
            log_chunk_size: 2000,
            log_poll_interval_ms: 1000,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, filling missing fields with defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let settings: Settings = toml::from_str(&raw).map_err(|e| {
            Error::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("namespace", &self.namespace),
            ("registry", &self.registry),
            ("project", &self.project),
            ("build_pod_name", &self.build_pod_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::ConfigError(format!("{field} must not be empty")));
            }
        }
        if self.replicas < 1 {
            return Err(Error::ConfigError("replicas must be at least 1".to_string()));
        }
        if self.build_timeout_secs == 0 || self.deploy_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "watch timeouts must be non-zero".to_string(),
            ));
        }
        if self.log_chunk_size == 0 {
            return Err(Error::ConfigError(
                "log_chunk_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Fully qualified image reference for a site, e.g.
    /// `ghcr.io/cloudbase-project/<site-id>:latest`
    pub fn image_name(&self, site_id: &str) -> String {
        format!("{}/{}/{}:latest", self.registry, self.project, site_id)
    }

    pub fn service_name(&self, site_id: &str) -> String {
        format!("{}-{}-svc", self.service_prefix, site_id)
    }

    pub fn bundle_url(&self, site_id: &str) -> String {
        format!("{}/{}", self.bundle_endpoint.trim_end_matches('/'), site_id)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }
}
