use std::{
    collections::{BTreeSet, HashMap},
    iter,
    sync::Arc,
};

use k8s_openapi::api::core::v1::Service;
use tracing::{debug, error, warn};

use super::UpstreamController;
use crate::{
    common::{compose_external_upstream_name, compose_upstream_name, ResolveGranularity, ResourceKey, Upstream},
    controllers::{external_service_references, DeleteView, Event, EventType, SyncError},
    crd::{types::ApisixUpstreamSubset, v2, v2beta3, GroupVersion, MultiVersionedUpstream},
    gateway::GatewayError,
    translation::TranslationError,
};

const GRANULARITIES: [ResolveGranularity; 2] = [ResolveGranularity::Endpoint, ResolveGranularity::Service];

impl UpstreamController {
    /// Pushes the configuration of the resource behind `event` into every gateway upstream derived from it.
    ///
    /// Upstreams are never created or deleted here; the ones that exist are updated in place and a deleted
    /// resource resets them to the default configuration.
    pub(super) async fn sync(&self, event: &Event) -> Result<(), SyncError> {
        let key = event.key.parse::<ResourceKey>().inspect_err(|e| error!("found ApisixUpstream resource with invalid meta namespace key {e}"))?;

        let live = self.upstream_lister.get(event.group_version, &key.namespace, &key.name);
        let upstream = if event.is_delete() {
            match DeleteView::resolve(live, event.tombstone.clone()) {
                Some(DeleteView::Live(_)) => {
                    warn!("discard the stale ApisixUpstream delete event since {key} exists");
                    return Ok(());
                },
                Some(DeleteView::Deleted(tombstone)) => tombstone,
                None => return Err(SyncError::MissingTombstone(key)),
            }
        } else {
            let Some(live) = live else {
                warn!("ApisixUpstream {key} {} was deleted before it could be delivered", event.group_version);
                return Ok(());
            };
            live
        };

        self.sync_relationship(event, &key, &upstream).await;

        let result = match &upstream {
            MultiVersionedUpstream::V2beta3(resource) => self.sync_v2beta3(event, &key, resource).await,
            MultiVersionedUpstream::V2(resource) => self.sync_v2(event, &key, resource).await,
        };

        match result {
            Ok(()) => {
                if !event.is_delete() {
                    self.status.record_success(&upstream).await;
                }
                Ok(())
            },
            Err(e) => {
                error!("failed to sync ApisixUpstream {key} {e}");
                self.status.record_failure(&upstream, &e).await;
                Err(e)
            },
        }
    }

    async fn sync_relationship(&self, event: &Event, key: &ResourceKey, upstream: &MultiVersionedUpstream) {
        if event.group_version != GroupVersion::V2 {
            return;
        }
        let old = match event.event_type {
            EventType::Add => None,
            EventType::Update => event.old_object.as_ref(),
            EventType::Delete => event.tombstone.as_ref(),
        };
        let previous = old.and_then(MultiVersionedUpstream::v2).map(|old| external_service_references(old)).unwrap_or_default();
        let references = if event.is_delete() {
            BTreeSet::new()
        } else {
            upstream.v2().map(|upstream| external_service_references(upstream)).unwrap_or_default()
        };
        self.relationships.update(key, previous, references).await;
    }

    async fn sync_v2beta3(&self, event: &Event, key: &ResourceKey, upstream: &v2beta3::ApisixUpstream) -> Result<(), SyncError> {
        let Some(service) = self.backing_service(event, key)? else {
            return Ok(());
        };
        let spec = &upstream.spec;
        let mut configs = PortConfigs::new(&spec.config, spec.port_level_settings.iter().map(|settings| (settings.port, &settings.config)));

        for port in service_ports(&service) {
            for subset in subset_names(&spec.config.subsets) {
                let name = compose_upstream_name(&key.namespace, &key.name, subset, port, None);
                self.update_upstream(&name, || {
                    if event.is_delete() {
                        Ok(Upstream::new_default())
                    } else {
                        configs.translate(port, |config| self.translator.translate_upstream_config_v2beta3(&key.namespace, config))
                    }
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn sync_v2(&self, event: &Event, key: &ResourceKey, upstream: &Arc<v2::ApisixUpstream>) -> Result<(), SyncError> {
        let spec = &upstream.spec;

        if !spec.external_nodes.is_empty() || spec.config.discovery.is_some() {
            let translated = if event.is_delete() {
                None
            } else {
                Some(self.translator.translate_upstream_config_v2(&key.namespace, &spec.config)?)
            };

            if !spec.external_nodes.is_empty() {
                return self.update_external_nodes(upstream, translated).await;
            }

            if spec.config.discovery.as_ref().is_some_and(|discovery| !discovery.is_complete()) {
                error!("ApisixUpstream {key} sets up discovery without both serviceName and type");
                return Err(SyncError::IncompleteDiscovery(key.clone()));
            }
            let name = compose_external_upstream_name(&key.namespace, &key.name);
            return self.update_upstream(&name, || Ok(translated.unwrap_or_else(Upstream::new_default))).await;
        }

        let Some(service) = self.backing_service(event, key)? else {
            return Ok(());
        };
        let mut configs = PortConfigs::new(&spec.config, spec.port_level_settings.iter().map(|settings| (settings.port, &settings.config)));

        for port in service_ports(&service) {
            for subset in subset_names(&spec.config.subsets) {
                for granularity in GRANULARITIES {
                    let name = compose_upstream_name(&key.namespace, &key.name, subset, port, Some(granularity));
                    self.update_upstream(&name, || {
                        if event.is_delete() {
                            Ok(Upstream::new_default())
                        } else {
                            configs.translate(port, |config| self.translator.translate_upstream_config_v2(&key.namespace, config))
                        }
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// The service with the resource's own name. Its absence ends a delete quietly.
    fn backing_service(&self, event: &Event, key: &ResourceKey) -> Result<Option<Arc<Service>>, SyncError> {
        match self.service_lister.get(&key.namespace, &key.name) {
            Some(service) => Ok(Some(service)),
            None if event.is_delete() => {
                debug!("service {key} is gone, nothing to reset");
                Ok(None)
            },
            None => {
                error!("failed to get service {key}");
                Err(SyncError::ServiceNotFound(key.clone()))
            },
        }
    }

    /// Replaces the configuration of upstream `name` with the one `translate` produces. The gateway's `metadata`
    /// and `nodes` survive the update. A missing upstream is not an error; `translate` only runs when it exists.
    pub(super) async fn update_upstream<F>(&self, name: &str, translate: F) -> Result<(), SyncError>
    where
        F: FnOnce() -> Result<Upstream, TranslationError> + Send,
    {
        let existing = match self.gateway.get(&self.cluster_name, name).await {
            Ok(existing) => existing,
            Err(GatewayError::NotFound) => {
                debug!("upstream {name} not found, skipping");
                return Ok(());
            },
            Err(e) => {
                error!("failed to get upstream {name} {e}");
                return Err(e.into());
            },
        };

        let mut upstream = translate().inspect_err(|e| error!("ApisixUpstream conversion for {name} cannot be completed {e}"))?;
        upstream.metadata = existing.metadata;
        upstream.nodes = existing.nodes;
        debug!("updating upstream {name} since ApisixUpstream changed");
        self.gateway
            .update(&self.cluster_name, upstream)
            .await
            .inspect_err(|e| error!("failed to update upstream {name} in cluster {} {e}", self.cluster_name))?;
        Ok(())
    }
}

fn service_ports(service: &Service) -> Vec<i32> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| ports.iter().map(|port| port.port).collect())
        .unwrap_or_default()
}

/// The default subset followed by the declared ones.
fn subset_names(subsets: &[ApisixUpstreamSubset]) -> impl Iterator<Item = &str> {
    iter::once("").chain(subsets.iter().map(|subset| subset.name.as_str()))
}

/// Per port configuration of one resource, translated at most once per distinct fragment.
///
/// Ports without a port level override share the translation of the resource level configuration.
struct PortConfigs<'a, C> {
    default: &'a C,
    overrides: HashMap<i32, &'a C>,
    translated: HashMap<Option<i32>, Upstream>,
}

impl<'a, C> PortConfigs<'a, C> {
    fn new(default: &'a C, overrides: impl IntoIterator<Item = (i32, &'a C)>) -> Self {
        Self {
            default,
            overrides: overrides.into_iter().collect(),
            translated: HashMap::new(),
        }
    }

    fn translate<F>(&mut self, port: i32, translate: F) -> Result<Upstream, TranslationError>
    where
        F: FnOnce(&C) -> Result<Upstream, TranslationError>,
    {
        let fragment = self.overrides.contains_key(&port).then_some(port);
        if let Some(upstream) = self.translated.get(&fragment) {
            return Ok(upstream.clone());
        }
        let config = fragment.and_then(|port| self.overrides.get(&port).copied()).unwrap_or(self.default);
        let upstream = translate(config)?;
        self.translated.insert(fragment, upstream.clone());
        Ok(upstream)
    }
}
