use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use super::{GatewayError, GatewayUpstreamCache};
use crate::common::Upstream;

type Upstreams = BTreeMap<String, Upstream>;

pub struct InMemoryUpstreamCache {
    clusters: RwLock<BTreeMap<String, Upstreams>>,
    synced: watch::Sender<bool>,
}

impl InMemoryUpstreamCache {
    pub fn new<I, S>(clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (synced, _) = watch::channel(false);
        Self {
            clusters: RwLock::new(clusters.into_iter().map(|cluster| (cluster.into(), Upstreams::new())).collect()),
            synced,
        }
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }
}

fn cluster_mut<'a>(clusters: &'a mut BTreeMap<String, Upstreams>, cluster: &str) -> Result<&'a mut Upstreams, GatewayError> {
    clusters.get_mut(cluster).ok_or_else(|| GatewayError::UnknownCluster(cluster.to_owned()))
}

#[async_trait]
impl GatewayUpstreamCache for InMemoryUpstreamCache {
    async fn get(&self, cluster: &str, name: &str) -> Result<Upstream, GatewayError> {
        let clusters = self.clusters.read().await;
        let upstreams = clusters.get(cluster).ok_or_else(|| GatewayError::UnknownCluster(cluster.to_owned()))?;
        upstreams.get(name).cloned().ok_or(GatewayError::NotFound)
    }

    async fn list(&self, cluster: &str) -> Result<Vec<Upstream>, GatewayError> {
        let clusters = self.clusters.read().await;
        let upstreams = clusters.get(cluster).ok_or_else(|| GatewayError::UnknownCluster(cluster.to_owned()))?;
        Ok(upstreams.values().cloned().collect())
    }

    async fn create(&self, cluster: &str, upstream: Upstream) -> Result<Upstream, GatewayError> {
        let mut clusters = self.clusters.write().await;
        let upstreams = cluster_mut(&mut clusters, cluster)?;
        if upstreams.contains_key(upstream.name()) {
            return Err(GatewayError::AlreadyExists(upstream.name().to_owned()));
        }
        debug!("Creating upstream {} in cluster {cluster}", upstream.name());
        upstreams.insert(upstream.name().to_owned(), upstream.clone());
        Ok(upstream)
    }

    async fn update(&self, cluster: &str, upstream: Upstream) -> Result<Upstream, GatewayError> {
        let mut clusters = self.clusters.write().await;
        let upstreams = cluster_mut(&mut clusters, cluster)?;
        let Some(current) = upstreams.get_mut(upstream.name()) else {
            return Err(GatewayError::NotFound);
        };
        debug!("Updating upstream {} in cluster {cluster}", upstream.name());
        current.clone_from(&upstream);
        Ok(upstream)
    }

    async fn delete(&self, cluster: &str, name: &str) -> Result<(), GatewayError> {
        let mut clusters = self.clusters.write().await;
        let upstreams = cluster_mut(&mut clusters, cluster)?;
        upstreams.remove(name).map(|_| ()).ok_or(GatewayError::NotFound)
    }

    async fn wait_synced(&self) -> Result<(), GatewayError> {
        let mut synced = self.synced.subscribe();
        synced.wait_for(|synced| *synced).await.map(|_| ()).map_err(|_| GatewayError::Closed)
    }
}
