//! Turns watch streams into typed add/update/delete notifications.
//!
//! Every watched kind is mirrored into a reflector store while it is watched. The store is what listers read
//! from, and it is also what gives an update its previous object and a relist its implicit deletes.

use std::{collections::HashSet, fmt::Debug, sync::Arc};

use futures::StreamExt;
use kube::{
    runtime::{
        reflector::{self, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Api, Resource,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn map<U>(self, f: impl Fn(T) -> U) -> WatchEvent<U> {
        match self {
            WatchEvent::Added(object) => WatchEvent::Added(f(object)),
            WatchEvent::Updated { old, new } => WatchEvent::Updated { old: f(old), new: f(new) },
            WatchEvent::Deleted(object) => WatchEvent::Deleted(f(object)),
        }
    }
}

/// Applies raw watcher events to a reflector store and reports what changed relative to the store.
pub struct StoreTracker<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer: reflector::store::Writer<K>,
    store: Store<K>,
    relisted: HashSet<ObjectRef<K>>,
}

impl<K> StoreTracker<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(writer: reflector::store::Writer<K>) -> Self {
        let store = writer.as_reader();
        Self {
            writer,
            store,
            relisted: HashSet::new(),
        }
    }

    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<WatchEvent<Arc<K>>> {
        let changes = match &event {
            watcher::Event::Apply(object) => vec![self.applied(object)],
            watcher::Event::InitApply(object) => {
                self.relisted.insert(ObjectRef::from_obj(object));
                vec![self.applied(object)]
            },
            watcher::Event::Delete(object) => vec![WatchEvent::Deleted(Arc::new(object.clone()))],
            watcher::Event::Init => {
                self.relisted.clear();
                vec![]
            },
            // objects which did not come back with the relist are gone
            watcher::Event::InitDone => {
                let gone: Vec<_> = self
                    .store
                    .state()
                    .into_iter()
                    .filter(|object| !self.relisted.contains(&ObjectRef::from_obj(object.as_ref())))
                    .map(WatchEvent::Deleted)
                    .collect();
                self.relisted.clear();
                gone
            },
        };
        self.writer.apply_watcher_event(&event);
        changes
    }

    fn applied(&self, object: &K) -> WatchEvent<Arc<K>> {
        let new = Arc::new(object.clone());
        match self.store.get(&ObjectRef::from_obj(object)) {
            Some(old) => WatchEvent::Updated { old, new },
            None => WatchEvent::Added(new),
        }
    }
}

/// Watches `api` until cancelled, keeping `writer`'s store current and forwarding every change to `sender`.
pub async fn watch<K, T>(api: Api<K>, writer: reflector::store::Writer<K>, sender: mpsc::Sender<WatchEvent<T>>, cancellation: CancellationToken) -> crate::Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    T: From<Arc<K>> + Send,
{
    let resource = K::kind(&());
    let mut tracker = StoreTracker::new(writer);
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    loop {
        let event = tokio::select! {
            () = cancellation.cancelled() => break,
            event = stream.next() => event,
        };
        match event {
            Some(Ok(event)) => {
                for change in tracker.apply(event) {
                    tokio::select! {
                        () = cancellation.cancelled() => return Ok(()),
                        sent = sender.send(change.map(T::from)) => if sent.is_err() {
                            debug!("{resource} watch receiver closed");
                            return Ok(());
                        },
                    }
                }
            },
            Some(Err(e)) => warn!("{resource} watch failed {e:?}"),
            None => break,
        }
    }
    debug!("{resource} watch stopped");
    Ok(())
}

/// Keeps `writer`'s store current without reporting changes.
pub async fn mirror<K>(api: Api<K>, writer: reflector::store::Writer<K>, cancellation: CancellationToken) -> crate::Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let resource = K::kind(&());
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()).default_backoff());
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            () = cancellation.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(_)) => {},
                Some(Err(e)) => warn!("{resource} watch failed {e:?}"),
                None => break,
            },
        }
    }
    debug!("{resource} mirror stopped");
    Ok(())
}
