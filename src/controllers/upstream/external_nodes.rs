use tracing::{debug, error};

use super::UpstreamController;
use crate::{
    common::{compose_external_upstream_name, ResourceKey, Upstream},
    controllers::SyncError,
    crd::v2,
    gateway::GatewayError,
};

impl UpstreamController {
    /// Rewrites the nodes of the external upstream of `upstream` from its external nodes.
    ///
    /// With `translated` the upstream also takes that configuration, keeping only the gateway's metadata.
    /// Without it the gateway's configuration is kept as is.
    pub(super) async fn update_external_nodes(&self, upstream: &v2::ApisixUpstream, translated: Option<Upstream>) -> Result<(), SyncError> {
        let key = ResourceKey::from(upstream);
        let name = compose_external_upstream_name(&key.namespace, &key.name);
        let existing = match self.gateway.get(&self.cluster_name, &name).await {
            Ok(existing) => existing,
            Err(GatewayError::NotFound) => {
                debug!("external upstream {name} not found, skipping");
                return Ok(());
            },
            Err(e) => {
                error!("failed to get upstream {name} {e}");
                return Err(e.into());
            },
        };

        let nodes = self
            .translator
            .translate_external_nodes(upstream)
            .inspect_err(|e| error!("failed to translate upstream external nodes {name} {e}"))?;

        let mut updated = match translated {
            Some(mut translated) => {
                translated.metadata = existing.metadata;
                translated
            },
            None => existing,
        };
        updated.nodes = nodes;
        debug!("updating external nodes of upstream {name} to {:?}", updated.nodes);
        self.gateway
            .update(&self.cluster_name, updated)
            .await
            .inspect_err(|e| error!("failed to update external nodes upstream {name} in cluster {} {e}", self.cluster_name))?;
        Ok(())
    }
}
