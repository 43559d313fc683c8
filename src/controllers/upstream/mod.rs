//! The `ApisixUpstream` reconciliation engine.
//!
//! Two queues feed the workers. The upstream queue carries add/update/delete events of `ApisixUpstream`
//! resources and drives [`UpstreamController::sync`]. The service queue carries keys of ExternalName services
//! whose target changed; its workers look up the owning resources in the [`RelationshipIndex`] and refresh their
//! external nodes.

mod external_nodes;
mod service_dependency;
mod sync;

use std::{sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::Service;
use tokio::{
    sync::mpsc,
    time::{self, Instant, Interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, span, warn, Instrument, Level};
use typed_builder::TypedBuilder;

use super::{watch::WatchEvent, Event, EventType, RateLimitingQueue, RelationshipIndex, ServiceLister, StatusRecorder, SyncError, UpstreamLister};
use crate::{
    common::{NamespaceFilter, ResourceKey, DEFAULT_CLUSTER_NAME},
    crd::MultiVersionedUpstream,
    gateway::GatewayUpstreamCache,
    metrics::MetricsCollector,
    translation::Translator,
};

const RESOURCE: &str = "upstream";

#[derive(TypedBuilder)]
pub struct UpstreamController {
    upstream_lister: Arc<dyn UpstreamLister>,
    service_lister: Arc<dyn ServiceLister>,
    translator: Arc<dyn Translator>,
    gateway: Arc<dyn GatewayUpstreamCache>,
    status: StatusRecorder,
    metrics: Arc<dyn MetricsCollector>,
    namespace_filter: Arc<dyn NamespaceFilter>,
    /// Receives the key of every `ApisixUpstream` touched by an ExternalName service change.
    upstream_change_sender: mpsc::Sender<ResourceKey>,
    #[builder(default = DEFAULT_CLUSTER_NAME.to_owned(), setter(into))]
    cluster_name: String,
    #[builder(default = 1)]
    workers: usize,
    #[builder(default)]
    resync_interval: Option<Duration>,
    #[builder(default)]
    relationships: RelationshipIndex,
    #[builder(default)]
    upstream_queue: RateLimitingQueue<String, Event>,
    #[builder(default)]
    service_queue: RateLimitingQueue<ResourceKey>,
}

impl UpstreamController {
    /// Processes watch events until `cancellation` fires, then drains both queues and waits for the workers.
    ///
    /// Nothing is synced before the gateway cache reports that its initial population is complete.
    pub async fn run(
        self: Arc<Self>,
        mut upstream_events: mpsc::Receiver<WatchEvent<MultiVersionedUpstream>>,
        mut service_events: mpsc::Receiver<WatchEvent<Arc<Service>>>,
        cancellation: CancellationToken,
    ) -> crate::Result<()> {
        tokio::select! {
            () = cancellation.cancelled() => return Ok(()),
            synced = self.gateway.wait_synced() => synced?,
        }
        info!("ApisixUpstream controller started with {} workers per queue", self.workers);

        let mut workers = Vec::with_capacity(self.workers * 2);
        for _ in 0..self.workers {
            workers.push(tokio::spawn(Arc::clone(&self).run_upstream_worker()));
            workers.push(tokio::spawn(Arc::clone(&self).run_service_worker()));
        }

        let mut resync = self.resync_interval.map(|period| time::interval_at(Instant::now() + period, period));
        loop {
            tokio::select! {
                () = cancellation.cancelled() => break,
                Some(event) = upstream_events.recv() => self.on_upstream_event(event),
                Some(event) = service_events.recv() => self.on_service_event(&event),
                () = tick(resync.as_mut()) => self.resource_sync(),
            }
        }

        self.upstream_queue.shut_down();
        self.service_queue.shut_down();
        for worker in futures::future::join_all(workers).await {
            if let Err(e) = worker {
                warn!("ApisixUpstream worker failed {e:?}");
            }
        }
        info!("ApisixUpstream controller exited");
        Ok(())
    }

    fn on_upstream_event(&self, event: WatchEvent<MultiVersionedUpstream>) {
        match event {
            WatchEvent::Added(upstream) => self.on_add(&upstream),
            WatchEvent::Updated { old, new } => self.on_update(old, &new),
            WatchEvent::Deleted(upstream) => self.on_delete(upstream),
        }
    }

    pub fn on_add(&self, upstream: &MultiVersionedUpstream) {
        let key = upstream.key();
        if !self.namespace_filter.is_watching_namespace(&key) {
            return;
        }
        debug!("ApisixUpstream add event arrived {key}");
        self.upstream_queue.add(key.to_string(), Event::add(key.to_string(), upstream.group_version()));
        self.metrics.incr_events(RESOURCE, EventType::Add.as_str());
    }

    pub fn on_update(&self, old: MultiVersionedUpstream, new: &MultiVersionedUpstream) {
        if !new.is_newer_than(&old) {
            return;
        }
        let key = new.key();
        if !self.namespace_filter.is_watching_namespace(&key) {
            return;
        }
        debug!(
            "ApisixUpstream update event arrived {key} {:?} -> {:?}",
            old.resource_version(),
            new.resource_version()
        );
        self.upstream_queue.add(key.to_string(), Event::update(key.to_string(), old));
        self.metrics.incr_events(RESOURCE, EventType::Update.as_str());
    }

    pub fn on_delete(&self, tombstone: MultiVersionedUpstream) {
        let key = tombstone.key();
        if !self.namespace_filter.is_watching_namespace(&key) {
            return;
        }
        debug!("ApisixUpstream delete event arrived {key}");
        self.upstream_queue.add(key.to_string(), Event::delete(key.to_string(), tombstone));
        self.metrics.incr_events(RESOURCE, EventType::Delete.as_str());
    }

    /// Enqueues an add event for every cached `ApisixUpstream`.
    pub fn resource_sync(&self) {
        let upstreams = self.upstream_lister.list();
        debug!("Resyncing {} ApisixUpstreams", upstreams.len());
        for upstream in upstreams {
            let key = upstream.key();
            if !self.namespace_filter.is_watching_namespace(&key) {
                continue;
            }
            self.upstream_queue.add(key.to_string(), Event::add(key.to_string(), upstream.group_version()));
        }
    }

    async fn run_upstream_worker(self: Arc<Self>) {
        while let Some((key, event)) = self.upstream_queue.get().await {
            let span = span!(Level::INFO, "UpstreamController", id = %key, event = %event.event_type);
            let result = self.sync(&event).instrument(span).await;
            self.upstream_queue.done(&key);
            self.handle_sync_err(key, event, result);
        }
    }

    fn handle_sync_err(&self, key: String, event: Event, result: Result<(), SyncError>) {
        match result {
            Ok(()) => {
                self.upstream_queue.forget(&key);
                self.metrics.incr_sync_operation(RESOURCE, "success");
            },
            Err(e) if !e.is_retryable() => {
                warn!("sync ApisixUpstream {key} failed, not retrying {e}");
                self.upstream_queue.forget(&key);
                self.metrics.incr_sync_operation(RESOURCE, "failure");
            },
            Err(e) => {
                warn!(
                    "sync ApisixUpstream {key} failed, will retry {e} requeues = {}",
                    self.upstream_queue.num_requeues(&key)
                );
                self.upstream_queue.add_rate_limited(key, event);
                self.metrics.incr_sync_operation(RESOURCE, "failure");
            },
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending().await,
    }
}
