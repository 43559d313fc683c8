use std::{fmt::Display, str::FromStr};

use kube::ResourceExt;
use thiserror::Error;

pub const DEFAULT_NAMESPACE_NAME: &str = "default";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected key format: {0:?}")]
pub struct InvalidKeyError(pub String);

impl ResourceKey {
    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
        }
    }
}

impl Default for ResourceKey {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE_NAME.to_owned(),
            name: String::default(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ResourceKey {
    type Err = InvalidKeyError;

    /// Accepts `namespace/name` or a bare `name` for cluster scoped objects.
    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self {
                namespace: String::new(),
                name: (*name).to_owned(),
            }),
            [namespace, name] if !name.is_empty() => Ok(Self {
                namespace: (*namespace).to_owned(),
                name: (*name).to_owned(),
            }),
            _ => Err(InvalidKeyError(key.to_owned())),
        }
    }
}

impl<K> From<&K> for ResourceKey
where
    K: ResourceExt,
{
    fn from(resource: &K) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_default(),
            name: resource.name_any(),
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Service;
    use kube::api::ObjectMeta;

    use super::*;

    #[test]
    fn test_parse_keys() {
        assert_eq!("ns/up1".parse::<ResourceKey>(), Ok(ResourceKey::namespaced("up1", "ns")));
        assert_eq!(
            "up1".parse::<ResourceKey>(),
            Ok(ResourceKey {
                namespace: String::new(),
                name: "up1".to_owned()
            })
        );
        assert!("a/b/c".parse::<ResourceKey>().is_err());
        assert!("ns/".parse::<ResourceKey>().is_err());
        assert!("".parse::<ResourceKey>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let key = ResourceKey::namespaced("svc1", "ns");
        assert_eq!(key.to_string(), "ns/svc1");
        assert_eq!(key.to_string().parse::<ResourceKey>(), Ok(key));
    }

    #[test]
    fn test_key_from_resource() {
        let service = Service {
            metadata: ObjectMeta {
                name: Some("svc1".to_owned()),
                namespace: Some("ns".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(ResourceKey::from(&service), ResourceKey::namespaced("svc1", "ns"));
    }
}
