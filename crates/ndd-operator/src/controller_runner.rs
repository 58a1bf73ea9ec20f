//! Controller runner - builds the NetworkNode controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use ndd_common::crd::{DeviceDriver, NetworkNode};
use ndd_network_node::{device_driver_mapper, error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the NetworkNode controller
///
/// Nodes are watched in all namespaces; a change to a DeviceDriver requeues
/// the nodes of its kind in its namespace. The future completes after
/// SIGTERM/SIGINT once in-flight passes finish.
pub fn build_network_node_controller(
    client: Client,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let nodes: Api<NetworkNode> = Api::all(client.clone());
    let drivers: Api<DeviceDriver> = Api::all(client);

    tracing::info!(concurrency, "- NetworkNode controller");

    let controller = Controller::new(nodes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(ControllerConfig::default().concurrency(concurrency));
    let node_store = controller.store();

    Box::pin(
        controller
            .watches(
                drivers,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                device_driver_mapper(node_store),
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("NetworkNode")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
