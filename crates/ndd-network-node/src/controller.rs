//! NetworkNode reconciler
//!
//! Each pass recomputes the node's disposition from its stored conditions
//! and deletion marker:
//!
//! - terminating: tear down owned resources, then drop the finalizer
//! - credentials or device driver invalid: tear down if needed, degrade
//! - unhealthy and valid: establish resources, mark healthy
//! - healthy and valid: nothing to do until the next event
//!
//! Establishment is driven by the Healthy condition, never by probing the
//! owned resources, so replaying an event yields the same decision.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Container, ObjectReference};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use ndd_common::crd::{Condition, ConditionStatus, NetworkNode, NetworkNodeStatus};
use ndd_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use ndd_common::kube_utils::has_finalizer;
use ndd_common::{Error, Result, NDD_SYSTEM_NAMESPACE, NETWORK_NODE_FINALIZER};

use crate::backoff::FailureBackoff;
use crate::establisher::{Establisher, ResourceEstablisher};
use crate::resources::DriverIdentity;
use crate::store::{KubeNodeStore, NodeStore};
use crate::validator::{KubeValidator, Validator};
use crate::CONTROLLER_NAME;

/// Retry interval for failures that need outside help
pub const DEFAULT_SHORT_WAIT: Duration = Duration::from_secs(30);
/// First retry interval after a failure
pub const DEFAULT_VERY_SHORT_WAIT: Duration = Duration::from_secs(5);
/// Upper bound on one reconcile pass
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for the NetworkNode controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace the driver config maps, services and deployments live in
    pub workload_namespace: String,
    /// Longest retry delay
    pub short_wait: Duration,
    /// Shortest retry delay
    pub very_short_wait: Duration,
    /// Budget for one reconcile pass
    pub reconcile_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workload_namespace: NDD_SYSTEM_NAMESPACE.to_string(),
            short_wait: DEFAULT_SHORT_WAIT,
            very_short_wait: DEFAULT_VERY_SHORT_WAIT,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }
}

/// Shared state for every reconcile pass
pub struct Context {
    /// NetworkNode reads and writes
    pub store: Arc<dyn NodeStore>,
    /// Credential and catalog checks
    pub validator: Arc<dyn Validator>,
    /// Owned resource lifecycle
    pub establisher: Arc<dyn Establisher>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-node retry delays
    pub backoff: FailureBackoff,
    /// Controller tunables
    pub config: ControllerConfig,
}

impl Context {
    /// Production context talking to the API server
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self::from_parts(
            config,
            Arc::new(KubeNodeStore::new(client.clone())),
            Arc::new(KubeValidator::new(client.clone())),
            Arc::new(ResourceEstablisher::from_client(client.clone())),
            Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
        )
    }

    /// Context assembled from explicit collaborators
    pub fn from_parts(
        config: ControllerConfig,
        store: Arc<dyn NodeStore>,
        validator: Arc<dyn Validator>,
        establisher: Arc<dyn Establisher>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            validator,
            establisher,
            events,
            backoff: FailureBackoff::new(config.very_short_wait, config.short_wait),
            config,
        }
    }
}

/// How a pass ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PassOutcome {
    /// Converged; wait for the next event
    Done,
    /// Degraded; try again after the node's backoff delay
    Retry,
}

/// Reconcile one NetworkNode
///
/// The pass is bounded by `reconcile_timeout`; running out of time fails
/// the pass and the error policy schedules the retry.
#[instrument(skip(node, ctx), fields(node = %node.key()))]
pub async fn reconcile(node: Arc<NetworkNode>, ctx: Arc<Context>) -> Result<Action> {
    let key = node.key();
    let budget = ctx.config.reconcile_timeout;

    let outcome = tokio::time::timeout(budget, reconcile_node(&node, &ctx))
        .await
        .map_err(|_| Error::timeout(format!("reconcile {key}"), budget.as_secs()))??;

    Ok(match outcome {
        PassOutcome::Done => {
            ctx.backoff.reset(&key);
            Action::await_change()
        }
        PassOutcome::Retry => {
            let delay = ctx.backoff.next_delay(&key);
            debug!(delay_secs = delay.as_secs(), "requeueing degraded node");
            Action::requeue(delay)
        }
    })
}

/// Error policy: log and requeue with the node's backoff
pub fn error_policy(node: Arc<NetworkNode>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.backoff.next_delay(&node.key());
    warn!(
        node = %node.key(),
        error = %error,
        retryable = error.is_retryable(),
        delay_secs = delay.as_secs(),
        "reconcile failed"
    );
    Action::requeue(delay)
}

async fn reconcile_node(observed: &NetworkNode, ctx: &Context) -> Result<PassOutcome> {
    let namespace = observed.namespace().unwrap_or_default();
    let name = observed.name_any();

    let Some(node) = ctx.store.get_node(&namespace, &name).await? else {
        debug!("node is gone");
        ctx.backoff.reset(&observed.key());
        return Ok(PassOutcome::Done);
    };

    if node.is_terminating() {
        return handle_deletion(&node, ctx).await;
    }

    let node = if has_finalizer(&node, NETWORK_NODE_FINALIZER) {
        node
    } else {
        match ctx.store.add_finalizer(&node).await {
            Ok(updated) => updated,
            Err(e) => {
                publish_warning(ctx, &node, reasons::FINALIZER_FAILED, actions::RECONCILE, &e)
                    .await;
                return Err(e);
            }
        }
    };

    if let Err(message) = check_credentials(&node, ctx).await {
        return degrade(&node, ctx, reasons::INVALID_CREDENTIALS, message).await;
    }

    let container = match resolve_device_driver(&node, ctx).await {
        Ok(container) => container,
        Err(message) => {
            return degrade(&node, ctx, reasons::INVALID_DEVICE_DRIVER, message).await;
        }
    };

    if node.health() == ConditionStatus::True {
        debug!("driver already established");
        return Ok(PassOutcome::Done);
    }

    establish(&node, ctx, &container).await
}

/// Validate credentials; the error is the message recorded on the node
async fn check_credentials(node: &NetworkNode, ctx: &Context) -> std::result::Result<(), String> {
    let target = &node.spec.target;
    let name = node.name_any();
    let (Some(credentials_name), Some(address)) = (&target.credentials_name, &target.address)
    else {
        let err = Error::validation_for_field(
            &name,
            "spec.target",
            "credentialsName and address are required",
        );
        return Err(err.to_string());
    };

    let namespace = node.namespace().unwrap_or_default();
    match ctx
        .validator
        .validate_credentials(&namespace, credentials_name, address)
        .await
    {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(format!(
            "credentials secret {namespace}/{credentials_name} not found"
        )),
        Err(e) => Err(e.with_node(name).to_string()),
    }
}

/// Resolve the driver container; the error is the message recorded on the node
async fn resolve_device_driver(
    node: &NetworkNode,
    ctx: &Context,
) -> std::result::Result<Container, String> {
    let namespace = node.namespace().unwrap_or_default();
    let name = node.name_any();
    let kind = &node.spec.device_driver_kind;

    match ctx
        .validator
        .validate_device_driver(&namespace, &name, kind, node.spec.grpc_server_port)
        .await
    {
        Ok(Some(container)) => Ok(container),
        Ok(None) => Err(format!(
            "no device driver for kind {kind} in namespace {namespace}"
        )),
        Err(e) => Err(e.with_node(name).to_string()),
    }
}

/// Tear down what may exist and record the node as not running
async fn degrade(
    node: &NetworkNode,
    ctx: &Context,
    reason: &str,
    message: String,
) -> Result<PassOutcome> {
    warn!(reason, %message, "node degraded");

    let cause = format!("{reason}: {message}");
    if node.may_own_resources() && teardown(node, ctx, Some(&cause)).await.is_err() {
        return Ok(PassOutcome::Retry);
    }

    write_conditions(
        node,
        ctx,
        [
            Condition::unhealthy().with_message(message.clone()),
            Condition::inactive(),
            Condition::not_discovered(),
        ],
    )
    .await?;
    publish(
        ctx,
        node,
        EventType::Warning,
        reason,
        actions::VALIDATE,
        Some(message),
    )
    .await;
    Ok(PassOutcome::Retry)
}

/// Delete owned resources; on failure the node is marked so the next pass
/// tries again
///
/// `cause` is the validation failure that triggered the teardown. It is kept
/// in the recorded message so it is not hidden behind the teardown error.
async fn teardown(node: &NetworkNode, ctx: &Context, cause: Option<&str>) -> Result<()> {
    let id = DriverIdentity::for_node(node, &ctx.config.workload_namespace);
    match ctx.establisher.delete(&id).await {
        Ok(()) => {
            info!("driver torn down");
            publish(
                ctx,
                node,
                EventType::Normal,
                reasons::DEVICE_DRIVER_TORN_DOWN,
                actions::TEARDOWN,
                None,
            )
            .await;
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "teardown failed");
            let message = match cause {
                Some(cause) => format!("{e} (tearing down after {cause})"),
                None => e.to_string(),
            };
            write_conditions(
                node,
                ctx,
                [
                    Condition::teardown_failed().with_message(message),
                    Condition::inactive(),
                    Condition::not_discovered(),
                ],
            )
            .await?;
            publish_warning(ctx, node, reasons::TEARDOWN_FAILED, actions::TEARDOWN, &e).await;
            Err(e)
        }
    }
}

async fn establish(node: &NetworkNode, ctx: &Context, container: &Container) -> Result<PassOutcome> {
    let id = DriverIdentity::for_node(node, &ctx.config.workload_namespace);
    match ctx
        .establisher
        .create(&id, node.spec.grpc_server_port, container)
        .await
    {
        Ok(()) => {
            info!(namespace = %id.namespace, "driver established");
            write_conditions(
                node,
                ctx,
                [
                    Condition::healthy(),
                    Condition::active(),
                    Condition::not_discovered(),
                ],
            )
            .await?;
            publish(
                ctx,
                node,
                EventType::Normal,
                reasons::DEVICE_DRIVER_ESTABLISHED,
                actions::ESTABLISH,
                None,
            )
            .await;
            Ok(PassOutcome::Done)
        }
        Err(e) => {
            warn!(error = %e, "establish failed");
            write_conditions(
                node,
                ctx,
                [
                    Condition::establish_failed().with_message(e.to_string()),
                    Condition::inactive(),
                    Condition::not_discovered(),
                ],
            )
            .await?;
            publish_warning(ctx, node, reasons::ESTABLISH_FAILED, actions::ESTABLISH, &e).await;
            Ok(PassOutcome::Retry)
        }
    }
}

async fn handle_deletion(node: &NetworkNode, ctx: &Context) -> Result<PassOutcome> {
    if !has_finalizer(node, NETWORK_NODE_FINALIZER) {
        ctx.backoff.reset(&node.key());
        return Ok(PassOutcome::Done);
    }

    if node.may_own_resources() && teardown(node, ctx, None).await.is_err() {
        // Finalizer stays until the Delete sequence fully succeeds
        return Ok(PassOutcome::Retry);
    }

    if let Err(e) = ctx.store.remove_finalizer(node).await {
        publish_warning(ctx, node, reasons::FINALIZER_FAILED, actions::RECONCILE, &e).await;
        return Err(e);
    }
    info!("finalizer removed, node may be deleted");
    ctx.backoff.reset(&node.key());
    Ok(PassOutcome::Done)
}

/// Persist `conditions`, skipping the write when nothing changed
async fn write_conditions(
    node: &NetworkNode,
    ctx: &Context,
    conditions: [Condition; 3],
) -> Result<()> {
    let status = status_with(node, conditions);
    if node.status.as_ref() == Some(&status) {
        debug!("status unchanged");
        return Ok(());
    }
    ctx.store.patch_status(node, &status).await?;
    Ok(())
}

fn object_ref(node: &NetworkNode) -> ObjectReference {
    node.object_ref(&())
}

async fn publish(
    ctx: &Context,
    node: &NetworkNode,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&object_ref(node), type_, reason, action, note)
        .await;
}

async fn publish_warning(ctx: &Context, node: &NetworkNode, reason: &str, action: &str, e: &Error) {
    publish(ctx, node, EventType::Warning, reason, action, Some(e.to_string())).await;
}

/// Status a node would carry after `conditions` are applied
fn status_with(
    node: &NetworkNode,
    conditions: impl IntoIterator<Item = Condition>,
) -> NetworkNodeStatus {
    let mut status = node.status.clone().unwrap_or_default();
    status.set_conditions(conditions);
    status
}
