//! Error types for the sitehost orchestration engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API rejected or failed a call
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    /// Deployment was created but its companion service was not.
    /// The deployment is left in place for the caller to reap.
    #[error("Deployment {deployment} created but service {service} failed: {source}")]
    PartialDeploy {
        deployment: String,
        service: String,
        #[source]
        source: kube::Error,
    },

    /// Dequeue attempted on an empty upload queue
    #[error("Upload queue is empty")]
    EmptyQueue,

    /// A pod's log stream failed mid-read
    #[error("Log stream for pod {pod} failed: {source}")]
    LogStream {
        pod: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Site {0} not found")]
    SiteNotFound(String),

    #[error("Invalid project {project} for owner {owner}")]
    InvalidProject { owner: String, project: String },

    #[error("Static site hosting is disabled for project {project}")]
    HostingDisabled { project: String },

    /// Lifecycle guard rejected the requested action
    #[error("Cannot {action} site {site_id} in its current state")]
    IllegalTransition { site_id: String, action: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::KubeError(kube::Error::Api(e)) => Some(e.code),
            Error::PartialDeploy {
                source: kube::Error::Api(e),
                ..
            } => Some(e.code),
            _ => None,
        }
    }

    /// True when the API refused a create because the name is taken
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
