//! Kubernetes Event recording for the ndd controllers.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so the network
//! node controller can report failures and lifecycle milestones on the
//! node object itself, visible via `kubectl describe networknode`.
//!
//! Publishing is fire-and-forget: failures are logged and never propagate.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What the controller was doing (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation backed by a kube `Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    /// (e.g. "ndd-network-node-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons shown in the REASON column of `kubectl get events`.
pub mod reasons {
    /// Credentials secret missing or malformed, or target address invalid
    pub const INVALID_CREDENTIALS: &str = "InvalidCredentials";
    /// No usable catalog entry for the node's driver kind
    pub const INVALID_DEVICE_DRIVER: &str = "InvalidDeviceDriver";
    /// Creating the owned resources failed
    pub const ESTABLISH_FAILED: &str = "EstablishFailed";
    /// Deleting the owned resources failed
    pub const TEARDOWN_FAILED: &str = "TeardownFailed";
    /// Adding or removing the deletion guard failed
    pub const FINALIZER_FAILED: &str = "FinalizerFailed";
    /// Reconcile pass failed outside of the steps above
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// Driver config map, service and deployment were created
    pub const DEVICE_DRIVER_ESTABLISHED: &str = "DeviceDriverEstablished";
    /// Driver resources were removed
    pub const DEVICE_DRIVER_TORN_DOWN: &str = "DeviceDriverTornDown";
}

/// Event actions shown in the ACTION column of `kubectl get events`.
pub mod actions {
    /// Reconcile loop bookkeeping (status, finalizer)
    pub const RECONCILE: &str = "Reconcile";
    /// Validating credentials or driver kind
    pub const VALIDATE: &str = "Validate";
    /// Creating owned resources
    pub const ESTABLISH: &str = "Establish";
    /// Deleting owned resources
    pub const TEARDOWN: &str = "Teardown";
}
