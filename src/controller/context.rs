//! Shared context for the controllers.
//!
//! One `Context` is built per process and handed to all three controllers.
//! Besides the Kubernetes client it carries the event recorder, the node
//! connector used by the failover healer and the optional probe state.

use std::sync::Arc;
use std::time::Instant;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::client::FredNodeOps;
use crate::controller::failover_orchestrator::HealTuning;
use crate::health::{HealthState, ResourceLabels};

/// Field manager for server-side apply and the event reporter name
pub const FIELD_MANAGER: &str = "redis-operator";

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    recorder: Recorder,
    /// Absent in tests and when the probe server is disabled
    pub health_state: Option<Arc<HealthState>>,
    /// Connections to Redis and Sentinel nodes
    pub node_ops: FredNodeOps,
    pub tuning: HealTuning,
}

impl Context {
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            health_state,
            node_ops: FredNodeOps::default(),
            tuning: HealTuning::default(),
        }
    }

    /// Count a finished pass and refresh the liveness stamp.
    pub fn observe_reconcile(&self, labels: &ResourceLabels, started: Instant) {
        if let Some(state) = &self.health_state {
            state.metrics.observe_reconcile(labels, started);
            state.touch();
        }
    }

    pub fn observe_error(&self, labels: &ResourceLabels) {
        if let Some(state) = &self.health_state {
            state.metrics.observe_error(labels);
        }
    }

    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }

    /// Event failures are logged and otherwise ignored.
    async fn publish<K>(
        &self,
        resource: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self
            .recorder
            .publish(&event, &resource.object_ref(&()))
            .await
        {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
