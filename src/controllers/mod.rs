mod cache;
mod events;
mod queue;
mod relationship;
mod status;
mod upstream;
pub mod watch;

#[cfg(test)]
pub(crate) use cache::populated_store;
pub use cache::{ReflectorUpstreamLister, SecretLister, ServiceLister, UpstreamLister};
pub use events::{DeleteView, Event, EventType};
pub use queue::{FastSlowRateLimiter, RateLimitingQueue};
pub use relationship::{external_service_references, RelationshipIndex};
pub use status::{
    set_status_condition, verify_conditions, ConditionStatus, StatusRecorder, StatusWriter, COMMON_SUCCESS_MESSAGE, CONDITION_TYPE, RESOURCE_SYNCED,
    RESOURCE_SYNC_ABORTED,
};
use thiserror::Error;
pub use upstream::UpstreamController;

use crate::{
    common::{InvalidKeyError, ResourceKey},
    gateway::GatewayError,
    translation::TranslationError,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("found ApisixUpstream resource with invalid meta namespace key: {0}")]
    InvalidKey(#[from] InvalidKeyError),
    #[error("service {0} not found")]
    ServiceNotFound(ResourceKey),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error("discovery of ApisixUpstream {0} needs both serviceName and type")]
    IncompleteDiscovery(ResourceKey),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("delete event for ApisixUpstream {0} carries no tombstone")]
    MissingTombstone(ResourceKey),
}

impl SyncError {
    /// Errors the queue retries with backoff. Everything else can only be fixed by a newer event.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Translation(_) | SyncError::Gateway(_) => true,
            SyncError::InvalidKey(_) | SyncError::ServiceNotFound(_) | SyncError::IncompleteDiscovery(_) | SyncError::MissingTombstone(_) => false,
        }
    }
}
