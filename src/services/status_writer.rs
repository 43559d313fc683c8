use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Patch, PatchParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, span, warn, Instrument, Level};

use crate::{
    common::ResourceKey,
    controllers::StatusWriter,
    crd::{v2, v2beta3, MultiVersionedUpstream},
};

const SYNC_ACTION: &str = "Sync";

/// Writes `ApisixUpstream` status with server side apply and publishes events through the events API.
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
    controller_name: String,
    recorder: Recorder,
}

impl KubeStatusWriter {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_owned(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            controller_name: controller_name.to_owned(),
        }
    }

    async fn patch_status<R>(&self, mut resource: R) -> crate::Result<()>
    where
        R: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned,
    {
        let resource_key = ResourceKey::from(&resource);
        let span = span!(Level::INFO, "StatusWriter", resource = %R::kind(&()), operation = "PatchStatus", id = %resource_key);
        resource.meta_mut().managed_fields = None;
        resource.meta_mut().resource_version = None;
        let api: Api<R> = Api::namespaced(self.client.clone(), &resource_key.namespace);
        let patch_params = PatchParams::apply(&self.controller_name).force();

        match api.patch_status(&resource_key.name, &patch_params, &Patch::Apply(resource)).instrument(span.clone()).await {
            Ok(_) => {
                span.in_scope(|| info!("patch status result ok"));
                Ok(())
            },
            Err(e) => {
                span.in_scope(|| warn!("patch status failed {e:?}"));
                Err(e.into())
            },
        }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn update_status_v2(&self, upstream: v2::ApisixUpstream) -> crate::Result<()> {
        self.patch_status(upstream).await
    }

    async fn update_status_v2beta3(&self, upstream: v2beta3::ApisixUpstream) -> crate::Result<()> {
        self.patch_status(upstream).await
    }

    async fn record_event(&self, upstream: &MultiVersionedUpstream, event_type: EventType, reason: &str, note: String) -> crate::Result<()> {
        let reference = match upstream {
            MultiVersionedUpstream::V2(upstream) => upstream.object_ref(&()),
            MultiVersionedUpstream::V2beta3(upstream) => upstream.object_ref(&()),
        };
        let event = Event {
            type_: event_type,
            reason: reason.to_owned(),
            note: Some(note),
            action: SYNC_ACTION.to_owned(),
            secondary: None,
        };
        self.recorder.publish(&event, &reference).await?;
        Ok(())
    }
}
