use std::sync::Arc;

use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    runtime::reflector::{ObjectRef, Store},
    Resource,
};
use typed_builder::TypedBuilder;

use crate::crd::{v2, v2beta3, GroupVersion, MultiVersionedUpstream};

pub trait UpstreamLister: Send + Sync {
    fn get(&self, group_version: GroupVersion, namespace: &str, name: &str) -> Option<MultiVersionedUpstream>;
    fn list(&self) -> Vec<MultiVersionedUpstream>;
}

pub trait ServiceLister: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;
}

pub trait SecretLister: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Secret>>;
}

fn object_ref<K>(namespace: &str, name: &str) -> ObjectRef<K>
where
    K: Resource,
    K::DynamicType: Default,
{
    if namespace.is_empty() {
        ObjectRef::new(name)
    } else {
        ObjectRef::new(name).within(namespace)
    }
}

impl ServiceLister for Store<Service> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        Store::get(self, &object_ref(namespace, name))
    }
}

impl SecretLister for Store<Secret> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Secret>> {
        Store::get(self, &object_ref(namespace, name))
    }
}

/// Both served versions of `ApisixUpstream`, each mirrored by its own reflector.
#[derive(Clone, TypedBuilder)]
pub struct ReflectorUpstreamLister {
    v2: Store<v2::ApisixUpstream>,
    v2beta3: Store<v2beta3::ApisixUpstream>,
}

impl UpstreamLister for ReflectorUpstreamLister {
    fn get(&self, group_version: GroupVersion, namespace: &str, name: &str) -> Option<MultiVersionedUpstream> {
        match group_version {
            GroupVersion::V2 => self.v2.get(&object_ref(namespace, name)).map(MultiVersionedUpstream::V2),
            GroupVersion::V2beta3 => self.v2beta3.get(&object_ref(namespace, name)).map(MultiVersionedUpstream::V2beta3),
        }
    }

    fn list(&self) -> Vec<MultiVersionedUpstream> {
        self.v2
            .state()
            .into_iter()
            .map(MultiVersionedUpstream::V2)
            .chain(self.v2beta3.state().into_iter().map(MultiVersionedUpstream::V2beta3))
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn populated_store<K>(objects: impl IntoIterator<Item = K>) -> Store<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + std::hash::Hash + Clone + Default,
{
    use kube::runtime::{reflector, watcher};

    let (store, mut writer) = reflector::store();
    for object in objects {
        writer.apply_watcher_event(&watcher::Event::Apply(object));
    }
    store
}
