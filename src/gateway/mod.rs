//! The controller's view of the gateway admin surface.
//!
//! The gateway keeps one set of upstreams per cluster. Upstreams are created and deleted by the endpoint discovery
//! component; this controller only reads them and writes configuration back.

mod inmemory;

use async_trait::async_trait;
pub use inmemory::InMemoryUpstreamCache;
use thiserror::Error;

use crate::common::Upstream;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("upstream not found")]
    NotFound,
    #[error("upstream {0} already exists")]
    AlreadyExists(String),
    #[error("unknown cluster {0}")]
    UnknownCluster(String),
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("gateway cache shut down before it was synced")]
    Closed,
}

#[async_trait]
pub trait GatewayUpstreamCache: Send + Sync {
    async fn get(&self, cluster: &str, name: &str) -> Result<Upstream, GatewayError>;
    async fn list(&self, cluster: &str) -> Result<Vec<Upstream>, GatewayError>;
    async fn create(&self, cluster: &str, upstream: Upstream) -> Result<Upstream, GatewayError>;
    async fn update(&self, cluster: &str, upstream: Upstream) -> Result<Upstream, GatewayError>;
    async fn delete(&self, cluster: &str, name: &str) -> Result<(), GatewayError>;
    /// Resolves once the initial population of the cache has completed.
    async fn wait_synced(&self) -> Result<(), GatewayError>;
}
