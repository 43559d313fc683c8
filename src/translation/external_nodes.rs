use super::TranslationError;
use crate::{
    common::{ResourceKey, UpstreamNode},
    controllers::ServiceLister,
    crd::v2::{self, ExternalType},
};

const DEFAULT_WEIGHT: i32 = 100;
const DEFAULT_PORT: i32 = 80;
const SERVICE_TYPE_EXTERNAL_NAME: &str = "ExternalName";

/// Domains are taken as `host[:port]`; service references resolve to their ExternalName target. A referenced
/// service which does not exist yet contributes no node, the service watch catches up once it appears.
pub(super) fn translate(upstream: &v2::ApisixUpstream, services: &dyn ServiceLister) -> Result<Vec<UpstreamNode>, TranslationError> {
    let owner = ResourceKey::from(upstream);
    let mut nodes = Vec::with_capacity(upstream.spec.external_nodes.len());

    for (index, node) in upstream.spec.external_nodes.iter().enumerate() {
        let weight = node.weight.unwrap_or(DEFAULT_WEIGHT);
        match node.type_ {
            ExternalType::Domain => {
                let (host, port) = match node.name.split_once(':') {
                    Some((host, port)) => {
                        let port = port.parse::<i32>().map_err(|_| TranslationError::InvalidExternalNodePort {
                            owner: owner.clone(),
                            index,
                            name: node.name.clone(),
                        })?;
                        (host, port)
                    },
                    None => (node.name.as_str(), node.port.unwrap_or(DEFAULT_PORT)),
                };
                nodes.push(UpstreamNode {
                    host: host.to_owned(),
                    port,
                    weight,
                });
            },
            ExternalType::Service => {
                let Some(service) = services.get(&owner.namespace, &node.name) else {
                    continue;
                };
                let spec = service.spec.as_ref();
                if spec.and_then(|spec| spec.type_.as_deref()) != Some(SERVICE_TYPE_EXTERNAL_NAME) {
                    return Err(TranslationError::NotExternalNameService {
                        owner: owner.clone(),
                        index,
                        service: ResourceKey::namespaced(&node.name, &owner.namespace),
                    });
                }
                nodes.push(UpstreamNode {
                    host: spec.and_then(|spec| spec.external_name.clone()).unwrap_or_default(),
                    port: node.port.unwrap_or(DEFAULT_PORT),
                    weight,
                });
            },
        }
    }
    Ok(nodes)
}
