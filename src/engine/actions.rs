//! Site actions: the caller side of the engine
//!
//! Every action gates on the project's hosting config, loads the site, checks
//! the lifecycle guard, runs the engine operations in order and writes the
//! folded result back to the store. Intermediate states (`Building`,
//! `Deploying`) are saved before the engine runs.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use super::build::{await_build, start_build, stop_build};
use super::deploy::{app_labels, await_deploy, deploy};
use super::logs::{stream_logs, LogFrame, LogSummary};
use super::reaper::{reap_build, teardown};
use super::redeploy::touch;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::gateway::WorkloadGateway;
use crate::queue::UploadQueue;
use crate::site::lifecycle::{self, SiteAction};
use crate::site::{enabled_config, DeployStatus, LastAction, ProjectScope, Site, SiteStore};

pub struct SiteActions<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
    queue: UploadQueue,
    settings: Settings,
}

impl<G, S> SiteActions<G, S>
where
    G: WorkloadGateway,
    S: SiteStore,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>, settings: Settings) -> Self {
        Self {
            gateway,
            store,
            queue: UploadQueue::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    /// Register a new site under an enabled project
    #[instrument(skip(self))]
    pub async fn create_site(&self, scope: &ProjectScope) -> Result<Site> {
        let config = enabled_config(self.store.as_ref(), scope).await?;
        let site = Site::new(config.id);
        self.store.save_site(&site).await?;
        info!("Created site {} for {}/{}", site.id, scope.owner, scope.project);
        Ok(site)
    }

    /// Queue an uploaded bundle for the build worker
    pub async fn submit_bundle(&self, site_id: &str) {
        self.queue.enqueue(site_id).await;
        info!("Queued bundle for site {}", site_id);
    }

    #[instrument(skip(self))]
    pub async fn build(&self, scope: &ProjectScope, site_id: &str) -> Result<Site> {
        let site = self.load_gated(scope, site_id, SiteAction::Build).await?;
        self.run_build(site, LastAction::Build).await
    }

    /// Rebuild an existing site. The result always owes a redeploy.
    #[instrument(skip(self))]
    pub async fn update(&self, scope: &ProjectScope, site_id: &str) -> Result<Site> {
        let site = self.load_gated(scope, site_id, SiteAction::Update).await?;
        self.run_build(site, LastAction::Update).await
    }

    #[instrument(skip(self))]
    pub async fn deploy(&self, scope: &ProjectScope, site_id: &str) -> Result<Site> {
        let mut site = self.load_gated(scope, site_id, SiteAction::Deploy).await?;
        lifecycle::begin_deploy(&mut site);
        self.store.save_site(&site).await?;

        let image = self.settings.image_name(&site.id);
        let created = deploy(
            self.gateway.as_ref(),
            &self.settings,
            &site.id,
            &app_labels(&site.id),
            &image,
            self.settings.replicas,
        )
        .await;
        if let Err(e) = created {
            error!("Deploy of site {} failed: {}", site.id, e);
            lifecycle::record_deploy_error(&mut site, &e);
            self.store.save_site(&site).await?;
            return Err(e);
        }

        let outcome =
            await_deploy(self.gateway.as_ref(), &site.id, self.settings.deploy_timeout()).await;
        lifecycle::record_deploy(&mut site, &outcome);
        self.store.save_site(&site).await?;
        Ok(site)
    }

    /// Restart the site's pods so they pick up the rebuilt image
    #[instrument(skip(self))]
    pub async fn redeploy(&self, scope: &ProjectScope, site_id: &str) -> Result<Site> {
        let mut site = self
            .load_gated(scope, site_id, SiteAction::Redeploy)
            .await?;
        lifecycle::begin_deploy(&mut site);
        self.store.save_site(&site).await?;

        if let Err(e) = touch(self.gateway.as_ref(), &site.id).await {
            error!("Redeploy of site {} failed: {}", site.id, e);
            lifecycle::record_deploy_error(&mut site, &e);
            self.store.save_site(&site).await?;
            return Err(e);
        }

        let outcome =
            await_deploy(self.gateway.as_ref(), &site.id, self.settings.deploy_timeout()).await;
        lifecycle::record_deploy(&mut site, &outcome);
        self.store.save_site(&site).await?;
        Ok(site)
    }

    /// Remove the site's workloads and then its record.
    ///
    /// The record is kept if the cluster refuses a deletion, so the delete
    /// can be retried.
    #[instrument(skip(self))]
    pub async fn delete(&self, scope: &ProjectScope, site_id: &str) -> Result<()> {
        let site = self.load_gated(scope, site_id, SiteAction::Delete).await?;
        teardown(
            self.gateway.as_ref(),
            &site.id,
            &self.settings.service_name(&site.id),
        )
        .await?;
        reap_build(self.gateway.as_ref(), &site.id).await?;
        self.store.delete_site(&site.id).await?;
        info!("Deleted site {}", site.id);
        Ok(())
    }

    #[instrument(skip(self, sink))]
    pub async fn logs(
        &self,
        scope: &ProjectScope,
        site_id: &str,
        sink: mpsc::Sender<LogFrame>,
    ) -> Result<LogSummary> {
        let site = self.load_gated(scope, site_id, SiteAction::Logs).await?;
        stream_logs(
            self.gateway.as_ref(),
            &self.settings,
            &site.app_label(),
            sink,
        )
        .await
    }

    /// Build queued bundles one at a time until `shutdown` resolves.
    ///
    /// A site that has never been deployed gets an initial build, any other
    /// site gets an update. Failures are logged and the worker moves on.
    pub async fn run_build_worker<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Build worker started");
        loop {
            let site_id = tokio::select! {
                _ = &mut shutdown => break,
                site_id = self.queue.dequeue() => site_id,
            };

            let site = match self.load(&site_id).await {
                Ok(site) => site,
                Err(e) => {
                    warn!("Skipping queued bundle {}: {}", site_id, e);
                    continue;
                }
            };
            let action = if site.deploy_status == DeployStatus::NotDeployed {
                LastAction::Build
            } else {
                LastAction::Update
            };
            match self.run_build(site, action).await {
                Ok(site) => info!(
                    "Queued build for site {} finished as {}",
                    site.id, site.build_status
                ),
                Err(e) => warn!("Queued build for site {} failed: {}", site_id, e),
            }
        }
        info!("Build worker stopped");
    }

    async fn load(&self, site_id: &str) -> Result<Site> {
        self.store
            .get_site(site_id)
            .await?
            .ok_or_else(|| Error::SiteNotFound(site_id.to_string()))
    }

    async fn load_gated(
        &self,
        scope: &ProjectScope,
        site_id: &str,
        action: SiteAction,
    ) -> Result<Site> {
        enabled_config(self.store.as_ref(), scope).await?;
        let site = self.load(site_id).await?;
        lifecycle::check(&site, action)?;
        Ok(site)
    }

    /// Start, await and stop one build, then fold the outcome into the site.
    /// The build pod is deleted whatever the outcome so the slot is free.
    async fn run_build(&self, mut site: Site, action: LastAction) -> Result<Site> {
        lifecycle::begin_build(&mut site);
        self.store.save_site(&site).await?;

        let gateway = self.gateway.as_ref();
        let image = self.settings.image_name(&site.id);
        if let Err(e) = start_build(gateway, &self.settings, &site.id, &image).await {
            error!("Build of site {} could not start: {}", site.id, e);
            lifecycle::record_build_error(&mut site, &e, action);
            self.store.save_site(&site).await?;
            return Err(e);
        }

        let outcome = await_build(gateway, &site.id, self.settings.build_timeout()).await;
        if let Err(e) = stop_build(gateway, &self.settings).await {
            warn!("Could not free build slot after site {}: {}", site.id, e);
        }

        match action {
            LastAction::Update => lifecycle::record_update(&mut site, &outcome),
            _ => lifecycle::record_build(&mut site, &outcome),
        }
        self.store.save_site(&site).await?;
        Ok(site)
    }
}
