//! Persistence boundary for sites and hosting configs
//!
//! The engine owns no persistent state. Whatever backs the record store
//! implements [`SiteStore`]; [`MemoryStore`] is the in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{HostingConfig, ProjectScope, Site};
use crate::error::{Error, Result};

#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_site(&self, site_id: &str) -> Result<Option<Site>>;

    async fn save_site(&self, site: &Site) -> Result<()>;

    async fn delete_site(&self, site_id: &str) -> Result<bool>;

    async fn get_config(&self, scope: &ProjectScope) -> Result<Option<HostingConfig>>;
}

/// Resolve the hosting config for a scope, rejecting unknown or disabled projects
pub async fn enabled_config<S: SiteStore + ?Sized>(
    store: &S,
    scope: &ProjectScope,
) -> Result<HostingConfig> {
    let config = store
        .get_config(scope)
        .await?
        .ok_or_else(|| Error::InvalidProject {
            owner: scope.owner.clone(),
            project: scope.project.clone(),
        })?;
    if !config.enabled {
        return Err(Error::HostingDisabled {
            project: scope.project.clone(),
        });
    }
    Ok(config)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sites: Arc<RwLock<HashMap<String, Site>>>,
    configs: Arc<RwLock<HashMap<ProjectScope, HostingConfig>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hosting for a project and return its config
    pub async fn put_config(&self, scope: &ProjectScope, enabled: bool) -> HostingConfig {
        let config = HostingConfig {
            id: Uuid::new_v4().to_string(),
            owner: scope.owner.clone(),
            project: scope.project.clone(),
            enabled,
        };
        self.configs
            .write()
            .await
            .insert(scope.clone(), config.clone());
        config
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn get_site(&self, site_id: &str) -> Result<Option<Site>> {
        Ok(self.sites.read().await.get(site_id).cloned())
    }

    async fn save_site(&self, site: &Site) -> Result<()> {
        self.sites
            .write()
            .await
            .insert(site.id.clone(), site.clone());
        Ok(())
    }

    async fn delete_site(&self, site_id: &str) -> Result<bool> {
        Ok(self.sites.write().await.remove(site_id).is_some())
    }

    async fn get_config(&self, scope: &ProjectScope) -> Result<Option<HostingConfig>> {
        Ok(self.configs.read().await.get(scope).cloned())
    }
}
