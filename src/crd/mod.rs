//! `ApisixUpstream` as served in the `apisix.apache.org` group.
//!
//! Both served versions are carried through the controller as one closed [`MultiVersionedUpstream`] so that every
//! place which needs version specific behaviour has to match on it.

pub mod types;
pub mod v2;
pub mod v2beta3;

use std::{cmp::Ordering, fmt::Display, sync::Arc};

use kube::{Resource, ResourceExt};
use serde::Deserialize;
use thiserror::Error;

use crate::common::ResourceKey;

pub const APISIX_GROUP: &str = "apisix.apache.org";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum GroupVersion {
    V2,
    V2beta3,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported ApisixUpstream group version {0}")]
pub struct UnsupportedGroupVersion(pub String);

impl GroupVersion {
    pub fn version(self) -> &'static str {
        match self {
            GroupVersion::V2 => "v2",
            GroupVersion::V2beta3 => "v2beta3",
        }
    }
}

impl Display for GroupVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{APISIX_GROUP}/{}", self.version())
    }
}

impl TryFrom<&str> for GroupVersion {
    type Error = UnsupportedGroupVersion;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "apisix.apache.org/v2" => Ok(GroupVersion::V2),
            "apisix.apache.org/v2beta3" => Ok(GroupVersion::V2beta3),
            _ => Err(UnsupportedGroupVersion(value.to_owned())),
        }
    }
}

impl TryFrom<String> for GroupVersion {
    type Error = UnsupportedGroupVersion;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GroupVersion::try_from(value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MultiVersionedUpstream {
    V2(Arc<v2::ApisixUpstream>),
    V2beta3(Arc<v2beta3::ApisixUpstream>),
}

impl MultiVersionedUpstream {
    pub fn group_version(&self) -> GroupVersion {
        match self {
            MultiVersionedUpstream::V2(_) => GroupVersion::V2,
            MultiVersionedUpstream::V2beta3(_) => GroupVersion::V2beta3,
        }
    }

    pub fn key(&self) -> ResourceKey {
        match self {
            MultiVersionedUpstream::V2(upstream) => ResourceKey::from(&**upstream),
            MultiVersionedUpstream::V2beta3(upstream) => ResourceKey::from(&**upstream),
        }
    }

    pub fn resource_version(&self) -> Option<String> {
        match self {
            MultiVersionedUpstream::V2(upstream) => upstream.resource_version(),
            MultiVersionedUpstream::V2beta3(upstream) => upstream.resource_version(),
        }
    }

    pub fn generation(&self) -> i64 {
        match self {
            MultiVersionedUpstream::V2(upstream) => upstream.meta().generation,
            MultiVersionedUpstream::V2beta3(upstream) => upstream.meta().generation,
        }
        .unwrap_or_default()
    }

    pub fn v2(&self) -> Option<&Arc<v2::ApisixUpstream>> {
        match self {
            MultiVersionedUpstream::V2(upstream) => Some(upstream),
            MultiVersionedUpstream::V2beta3(_) => None,
        }
    }

    pub fn v2beta3(&self) -> Option<&Arc<v2beta3::ApisixUpstream>> {
        match self {
            MultiVersionedUpstream::V2(_) => None,
            MultiVersionedUpstream::V2beta3(upstream) => Some(upstream),
        }
    }

    /// Whether `self` carries a strictly newer resource version than `previous`.
    pub fn is_newer_than(&self, previous: &MultiVersionedUpstream) -> bool {
        compare_resource_versions(self.resource_version().as_deref(), previous.resource_version().as_deref()) == Ordering::Greater
    }
}

impl From<Arc<v2::ApisixUpstream>> for MultiVersionedUpstream {
    fn from(upstream: Arc<v2::ApisixUpstream>) -> Self {
        MultiVersionedUpstream::V2(upstream)
    }
}

impl From<Arc<v2beta3::ApisixUpstream>> for MultiVersionedUpstream {
    fn from(upstream: Arc<v2beta3::ApisixUpstream>) -> Self {
        MultiVersionedUpstream::V2beta3(upstream)
    }
}

/// Resource versions are opaque strings, but the API server hands out integers; compare numerically when both
/// sides parse and lexically otherwise.
pub fn compare_resource_versions(current: Option<&str>, previous: Option<&str>) -> Ordering {
    match (current, previous) {
        (Some(current), Some(previous)) => match (current.parse::<u64>(), previous.parse::<u64>()) {
            (Ok(current), Ok(previous)) => current.cmp(&previous),
            _ => current.cmp(previous),
        },
        (current, previous) => current.cmp(&previous),
    }
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;

    use super::*;

    fn upstream(resource_version: &str) -> MultiVersionedUpstream {
        MultiVersionedUpstream::V2(Arc::new(v2::ApisixUpstream {
            metadata: ObjectMeta {
                name: Some("up1".to_owned()),
                namespace: Some("ns".to_owned()),
                resource_version: Some(resource_version.to_owned()),
                generation: Some(3),
                ..Default::default()
            },
            spec: v2::ApisixUpstreamSpec::default(),
            status: None,
        }))
    }

    #[test]
    fn test_resource_version_ordering() {
        assert!(upstream("10").is_newer_than(&upstream("9")));
        assert!(!upstream("9").is_newer_than(&upstream("10")));
        assert!(!upstream("10").is_newer_than(&upstream("10")));
        assert_eq!(compare_resource_versions(Some("b"), Some("a")), Ordering::Greater);
        assert_eq!(compare_resource_versions(None, Some("1")), Ordering::Less);
    }

    #[test]
    fn test_accessors() {
        let upstream = upstream("1");
        assert_eq!(upstream.group_version(), GroupVersion::V2);
        assert_eq!(upstream.key(), ResourceKey::namespaced("up1", "ns"));
        assert_eq!(upstream.generation(), 3);
        assert!(upstream.v2().is_some());
        assert!(upstream.v2beta3().is_none());
    }

    #[test]
    fn test_group_versions() {
        assert_eq!(GroupVersion::V2.to_string(), "apisix.apache.org/v2");
        assert_eq!(GroupVersion::try_from("apisix.apache.org/v2beta3"), Ok(GroupVersion::V2beta3));
        assert!(GroupVersion::try_from("apisix.apache.org/v1").is_err());
    }

    #[test]
    fn test_deserialize_v2_manifest() {
        let manifest = r"
apiVersion: apisix.apache.org/v2
kind: ApisixUpstream
metadata:
  name: httpbin
  namespace: ns
spec:
  loadbalancer:
    type: chash
    hashOn: header
    key: user-agent
  retries: 3
  timeout:
    connect: 5s
  externalNodes:
  - name: httpbin.org
    type: Domain
  - name: svc1
    type: Service
    weight: 10
  portLevelSettings:
  - port: 443
    scheme: https
";
        let upstream: v2::ApisixUpstream = serde_yaml::from_str(manifest).unwrap();
        let load_balancer = upstream.spec.config.load_balancer.as_ref().unwrap();
        assert_eq!(load_balancer.type_, "chash");
        assert_eq!(load_balancer.hash_on, "header");
        assert_eq!(upstream.spec.config.retries, Some(3));
        assert_eq!(upstream.spec.external_nodes.len(), 2);
        assert_eq!(upstream.spec.external_nodes[1].type_, v2::ExternalType::Service);
        assert_eq!(upstream.spec.port_level_settings[0].port, 443);
        assert_eq!(upstream.spec.port_level_settings[0].config.scheme.as_deref(), Some("https"));
    }
}
