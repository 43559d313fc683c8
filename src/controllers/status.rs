use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::Utc,
};
use kube::runtime::events::EventType;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::crd::{types::ApisixStatus, v2, v2beta3, MultiVersionedUpstream};

pub const CONDITION_TYPE: &str = "ResourcesAvailable";
pub const RESOURCE_SYNCED: &str = "ResourcesSynced";
pub const RESOURCE_SYNC_ABORTED: &str = "ResourceSyncAborted";
pub const COMMON_SUCCESS_MESSAGE: &str = "Sync Successfully";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// Writes status and events back to the cluster.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn update_status_v2(&self, upstream: v2::ApisixUpstream) -> crate::Result<()>;
    async fn update_status_v2beta3(&self, upstream: v2beta3::ApisixUpstream) -> crate::Result<()>;
    async fn record_event(&self, upstream: &MultiVersionedUpstream, event_type: EventType, reason: &str, note: String) -> crate::Result<()>;
}

#[derive(Clone, TypedBuilder)]
pub struct StatusRecorder {
    writer: Arc<dyn StatusWriter>,
    #[builder(default)]
    disable_status_updates: bool,
}

impl StatusRecorder {
    pub async fn record_success(&self, upstream: &MultiVersionedUpstream) {
        self.record_event(upstream, EventType::Normal, RESOURCE_SYNCED, "ApisixUpstream synced successfully".to_owned()).await;
        self.record_status(upstream, RESOURCE_SYNCED, None, ConditionStatus::True, upstream.generation()).await;
    }

    pub async fn record_failure(&self, upstream: &MultiVersionedUpstream, error: &(dyn Display + Sync)) {
        self.record_event(upstream, EventType::Warning, RESOURCE_SYNC_ABORTED, format!("ApisixUpstream synced failed, with error: {error}"))
            .await;
        self.record_status(upstream, RESOURCE_SYNC_ABORTED, Some(&error.to_string()), ConditionStatus::False, upstream.generation())
            .await;
    }

    async fn record_event(&self, upstream: &MultiVersionedUpstream, event_type: EventType, reason: &str, note: String) {
        if let Err(e) = self.writer.record_event(upstream, event_type, reason, note).await {
            warn!("Failed to record event for ApisixUpstream {} {e:?}", upstream.key());
        }
    }

    /// Writes `reason` as the controller's condition unless the existing conditions already say the same for
    /// this generation or a newer one. Failures are logged.
    pub async fn record_status(&self, upstream: &MultiVersionedUpstream, reason: &str, error: Option<&str>, status: ConditionStatus, generation: i64) {
        if self.disable_status_updates {
            return;
        }
        let condition = Condition {
            type_: CONDITION_TYPE.to_owned(),
            reason: reason.to_owned(),
            status: status.as_str().to_owned(),
            message: error.unwrap_or(COMMON_SUCCESS_MESSAGE).to_owned(),
            observed_generation: Some(generation),
            last_transition_time: Time(Utc::now()),
        };

        let result = match upstream {
            MultiVersionedUpstream::V2(upstream) => {
                let mut upstream = v2::ApisixUpstream::clone(upstream);
                if !apply_condition(&mut upstream.status, condition) {
                    return;
                }
                self.writer.update_status_v2(upstream).await
            },
            MultiVersionedUpstream::V2beta3(upstream) => {
                let mut upstream = v2beta3::ApisixUpstream::clone(upstream);
                if !apply_condition(&mut upstream.status, condition) {
                    return;
                }
                self.writer.update_status_v2beta3(upstream).await
            },
        };

        match result {
            Ok(()) => info!("Recorded {reason} status for ApisixUpstream {}", upstream.key()),
            Err(e) => warn!("Failed to record status change for ApisixUpstream {} {e:?}", upstream.key()),
        }
    }
}

fn apply_condition(status: &mut Option<ApisixStatus>, condition: Condition) -> bool {
    let conditions = &mut status.get_or_insert_with(ApisixStatus::default).conditions;
    if !verify_conditions(conditions, &condition) {
        return false;
    }
    set_status_condition(conditions, condition);
    true
}

/// Whether `condition` carries news compared to the existing condition of the same type.
pub fn verify_conditions(conditions: &[Condition], condition: &Condition) -> bool {
    let Some(existing) = conditions.iter().find(|existing| existing.type_ == condition.type_) else {
        return true;
    };
    let existing_generation = existing.observed_generation.unwrap_or_default();
    let generation = condition.observed_generation.unwrap_or_default();
    if existing_generation > generation {
        return false;
    }
    !(existing_generation == generation
        && existing.status == condition.status
        && existing.reason == condition.reason
        && existing.message == condition.message)
}

/// Replaces the condition of the same type; the transition time only moves when the status flips.
pub fn set_status_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    let Some(existing) = conditions.iter_mut().find(|existing| existing.type_ == condition.type_) else {
        conditions.push(condition);
        return;
    };
    if existing.status != condition.status {
        existing.status = condition.status;
        existing.last_transition_time = condition.last_transition_time;
    }
    existing.reason = condition.reason;
    existing.message = condition.message;
    existing.observed_generation = condition.observed_generation;
}
