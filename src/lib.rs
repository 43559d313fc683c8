use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{runtime::reflector, Api, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod common;
pub mod configuration;
pub mod controllers;
pub mod crd;
pub mod gateway;
pub mod metrics;
pub mod services;
pub mod translation;

use crate::{
    common::{NamespaceAllowList, ResourceKey},
    configuration::Configuration,
    controllers::{watch, ReflectorUpstreamLister, StatusRecorder, UpstreamController},
    crd::{v2, v2beta3, GroupVersion, MultiVersionedUpstream},
    gateway::GatewayUpstreamCache,
    metrics::CounterMetrics,
    services::KubeStatusWriter,
    translation::DefaultTranslator,
};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Runs the controller against the cluster of the ambient kube config until interrupted.
#[allow(clippy::too_many_lines)]
pub async fn start(configuration: Configuration, gateway: Arc<dyn GatewayUpstreamCache>) -> Result<()> {
    info!("ApisixUpstream controller for {} started", configuration.upstream_version);
    let client = Client::try_default().await?;
    let cancellation = CancellationToken::new();

    let (v2_store, v2_writer) = reflector::store::<v2::ApisixUpstream>();
    let (v2beta3_store, v2beta3_writer) = reflector::store::<v2beta3::ApisixUpstream>();
    let (service_store, service_writer) = reflector::store::<Service>();
    let (secret_store, secret_writer) = reflector::store::<Secret>();

    let (upstream_event_sender, upstream_event_receiver) = mpsc::channel::<watch::WatchEvent<MultiVersionedUpstream>>(1024);
    let (service_event_sender, service_event_receiver) = mpsc::channel(1024);
    let (upstream_change_sender, mut upstream_change_receiver) = mpsc::channel::<ResourceKey>(1024);

    let upstream_watch = match configuration.upstream_version {
        GroupVersion::V2 => watch::watch(Api::<v2::ApisixUpstream>::all(client.clone()), v2_writer, upstream_event_sender, cancellation.clone()).boxed(),
        GroupVersion::V2beta3 => watch::watch(
            Api::<v2beta3::ApisixUpstream>::all(client.clone()),
            v2beta3_writer,
            upstream_event_sender,
            cancellation.clone(),
        )
        .boxed(),
    };
    let service_watch = watch::watch(Api::<Service>::all(client.clone()), service_writer, service_event_sender, cancellation.clone()).boxed();
    let secret_mirror = watch::mirror(Api::<Secret>::all(client.clone()), secret_writer, cancellation.clone()).boxed();

    let service_lister = Arc::new(service_store);
    let translator = DefaultTranslator::builder()
        .service_lister(service_lister.clone())
        .secret_lister(Arc::new(secret_store))
        .build();
    let status = StatusRecorder::builder()
        .writer(Arc::new(KubeStatusWriter::new(client.clone(), &configuration.controller_name)))
        .disable_status_updates(configuration.disable_status_updates)
        .build();

    let controller = Arc::new(
        UpstreamController::builder()
            .upstream_lister(Arc::new(ReflectorUpstreamLister::builder().v2(v2_store).v2beta3(v2beta3_store).build()))
            .service_lister(service_lister)
            .translator(Arc::new(translator))
            .gateway(gateway)
            .status(status)
            .metrics(Arc::new(CounterMetrics::default()))
            .namespace_filter(Arc::new(NamespaceAllowList::new(configuration.watching_namespaces.clone())))
            .upstream_change_sender(upstream_change_sender)
            .cluster_name(configuration.default_cluster_name.clone())
            .workers(configuration.workers)
            .resync_interval(configuration.resync_interval())
            .build(),
    );

    let controller_task = {
        let cancellation = cancellation.clone();
        async move {
            let result = controller.run(upstream_event_receiver, service_event_receiver, cancellation.clone()).await;
            cancellation.cancel();
            result
        }
    };

    let upstream_change_observer = async move {
        while let Some(key) = upstream_change_receiver.recv().await {
            debug!("ApisixUpstream {key} changed by an ExternalName service");
        }
        crate::Result::<()>::Ok(())
    };

    let shutdown_task = {
        let cancellation = cancellation.clone();
        async move {
            tokio::select! {
                () = cancellation.cancelled() => {},
                signal = tokio::signal::ctrl_c() => {
                    cancellation.cancel();
                    signal?;
                    info!("Interrupted, shutting down");
                },
            }
            crate::Result::<()>::Ok(())
        }
    };

    let services: Vec<BoxFuture<'static, Result<()>>> = vec![
        upstream_watch,
        service_watch,
        secret_mirror,
        controller_task.boxed(),
        upstream_change_observer.boxed(),
        shutdown_task.boxed(),
    ];

    let mut result = Ok(());
    for service_result in futures::future::join_all(services).await {
        if let Err(e) = service_result {
            warn!("Service failed {e:?}");
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    info!("ApisixUpstream controller stopped");
    result
}
