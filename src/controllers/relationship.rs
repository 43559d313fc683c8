use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    common::ResourceKey,
    crd::v2::{self, ExternalType},
};

#[derive(Debug, Default)]
struct Relationships {
    owners_by_service: BTreeMap<ResourceKey, BTreeSet<ResourceKey>>,
    services_by_owner: BTreeMap<ResourceKey, BTreeSet<ResourceKey>>,
}

/// ExternalName services and the `ApisixUpstream`s referencing them through external nodes.
#[derive(Clone, Debug, Default)]
pub struct RelationshipIndex {
    relationships: Arc<RwLock<Relationships>>,
}

impl RelationshipIndex {
    /// Moves `owner` from the services it referenced to `references`.
    ///
    /// `previous` holds the references of the last view the caller saw; they are merged with what has been
    /// indexed for the owner so far, so afterwards exactly `references` point at the owner.
    pub async fn update(&self, owner: &ResourceKey, previous: BTreeSet<ResourceKey>, references: BTreeSet<ResourceKey>) {
        let mut relationships = self.relationships.write().await;
        let mut stale = previous;
        if let Some(indexed) = relationships.services_by_owner.get(owner) {
            stale.extend(indexed.iter().cloned());
        }

        for service in stale.difference(&references) {
            if let Some(owners) = relationships.owners_by_service.get_mut(service) {
                owners.remove(owner);
                if owners.is_empty() {
                    relationships.owners_by_service.remove(service);
                }
            }
        }
        for service in &references {
            relationships.owners_by_service.entry(service.clone()).or_default().insert(owner.clone());
        }

        debug!("Owner {owner} references {} external services", references.len());
        if references.is_empty() {
            relationships.services_by_owner.remove(owner);
        } else {
            relationships.services_by_owner.insert(owner.clone(), references);
        }
    }

    pub async fn owners(&self, service: &ResourceKey) -> BTreeSet<ResourceKey> {
        self.relationships.read().await.owners_by_service.get(service).cloned().unwrap_or_default()
    }

    pub async fn services(&self, owner: &ResourceKey) -> BTreeSet<ResourceKey> {
        self.relationships.read().await.services_by_owner.get(owner).cloned().unwrap_or_default()
    }
}

pub fn external_service_references(upstream: &v2::ApisixUpstream) -> BTreeSet<ResourceKey> {
    let namespace = upstream.metadata.namespace.as_deref().unwrap_or_default();
    upstream
        .spec
        .external_nodes
        .iter()
        .filter(|node| node.type_ == ExternalType::Service)
        .map(|node| ResourceKey::namespaced(&node.name, namespace))
        .collect()
}
