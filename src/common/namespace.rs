use std::collections::BTreeSet;

use super::ResourceKey;

pub trait NamespaceFilter: Send + Sync {
    fn is_watching_namespace(&self, key: &ResourceKey) -> bool;
}

/// Watches the configured namespaces, or every namespace when none are configured.
#[derive(Clone, Debug, Default)]
pub struct NamespaceAllowList {
    namespaces: BTreeSet<String>,
}

impl NamespaceAllowList {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }
}

impl NamespaceFilter for NamespaceAllowList {
    fn is_watching_namespace(&self, key: &ResourceKey) -> bool {
        self.namespaces.is_empty() || self.namespaces.contains(&key.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allow_list_watches_everything() {
        let filter = NamespaceAllowList::default();
        assert!(filter.is_watching_namespace(&ResourceKey::namespaced("up1", "anything")));
    }

    #[test]
    fn test_allow_list() {
        let filter = NamespaceAllowList::new(["apisix", "ns"]);
        assert!(filter.is_watching_namespace(&ResourceKey::namespaced("up1", "ns")));
        assert!(!filter.is_watching_namespace(&ResourceKey::namespaced("up1", "kube-system")));
    }
}
