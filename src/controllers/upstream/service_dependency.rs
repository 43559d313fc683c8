use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use tracing::{debug, span, warn, Instrument, Level};

use super::UpstreamController;
use crate::{
    common::ResourceKey,
    controllers::{watch::WatchEvent, SyncError},
    crd::{GroupVersion, MultiVersionedUpstream},
};

const EXTERNAL_NAME: &str = "ExternalName";

fn is_external_name(service: &Service) -> bool {
    service.spec.as_ref().and_then(|spec| spec.type_.as_deref()) == Some(EXTERNAL_NAME)
}

fn external_name(service: &Service) -> Option<&str> {
    service.spec.as_ref().and_then(|spec| spec.external_name.as_deref())
}

/// Whether the event changes what an ExternalName service resolves to.
fn changes_external_target(event: &WatchEvent<Arc<Service>>) -> bool {
    match event {
        WatchEvent::Added(service) | WatchEvent::Deleted(service) => is_external_name(service),
        WatchEvent::Updated { old, new } => is_external_name(new) && (!is_external_name(old) || external_name(old) != external_name(new)),
    }
}

impl UpstreamController {
    pub fn on_service_event(&self, event: &WatchEvent<Arc<Service>>) {
        if !changes_external_target(event) {
            return;
        }
        let (WatchEvent::Added(service) | WatchEvent::Updated { new: service, .. } | WatchEvent::Deleted(service)) = event;
        let key = ResourceKey::from(&**service);
        debug!("ExternalName service {key} changed to {:?}", external_name(service));
        self.service_queue.add(key, ());
    }

    pub(super) async fn run_service_worker(self: Arc<Self>) {
        while let Some((key, ())) = self.service_queue.get().await {
            let span = span!(Level::INFO, "UpstreamServiceDependency", id = %key);
            let result = self.handle_service_change(&key).instrument(span).await;
            self.service_queue.done(&key);
            match result {
                Ok(()) => self.service_queue.forget(&key),
                Err(e) => {
                    warn!("sync Service {key} failed, will retry {e}");
                    self.service_queue.add_rate_limited(key, ());
                },
            }
        }
    }

    /// Refreshes the external nodes of every `ApisixUpstream` referencing `service`. The first failure aborts.
    pub(super) async fn handle_service_change(&self, service: &ResourceKey) -> Result<(), SyncError> {
        let owners = self.relationships.owners(service).await;
        for owner in owners {
            debug!("Service change event of {service} triggers ApisixUpstream {owner} sync");
            if self.upstream_change_sender.send(owner.clone()).await.is_err() {
                warn!("ApisixUpstream change observer is gone, {owner} not notified");
            }

            let Some(upstream) = self
                .upstream_lister
                .get(GroupVersion::V2, &owner.namespace, &owner.name)
                .and_then(|upstream| upstream.v2().cloned())
            else {
                debug!("ApisixUpstream {owner} is gone, skipping");
                continue;
            };

            if let Err(e) = self.update_external_nodes(&upstream, None).await {
                self.status.record_failure(&MultiVersionedUpstream::V2(upstream), &e).await;
                return Err(e);
            }
        }
        Ok(())
    }
}
