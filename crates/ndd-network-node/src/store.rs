//! NetworkNode reads and writes made by the reconciler
//!
//! Every write carries the resourceVersion of the node it was computed from,
//! so a pass working on a stale copy fails with Conflict and is retried.

use async_trait::async_trait;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use ndd_common::crd::{NetworkNode, NetworkNodeStatus};
use ndd_common::kube_utils::{
    finalizers_with, finalizers_without, is_not_found, patch_finalizers, patch_status_guarded,
};
use ndd_common::{Result, NETWORK_NODE_FINALIZER};

use crate::FIELD_MANAGER;

/// Access to NetworkNode objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a node; `None` if it no longer exists
    async fn get_node(&self, namespace: &str, name: &str) -> Result<Option<NetworkNode>>;

    /// Add the deletion guard, returning the updated node
    async fn add_finalizer(&self, node: &NetworkNode) -> Result<NetworkNode>;

    /// Remove the deletion guard
    async fn remove_finalizer(&self, node: &NetworkNode) -> Result<()>;

    /// Write the status sub-object, returning the updated node
    async fn patch_status(
        &self,
        node: &NetworkNode,
        status: &NetworkNodeStatus,
    ) -> Result<NetworkNode>;
}

/// [`NodeStore`] backed by the Kubernetes API server
pub struct KubeNodeStore {
    client: Client,
}

impl KubeNodeStore {
    /// Create a new store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, node: &NetworkNode) -> Api<NetworkNode> {
        Api::namespaced(self.client.clone(), &node.namespace().unwrap_or_default())
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get_node(&self, namespace: &str, name: &str) -> Result<Option<NetworkNode>> {
        let api: Api<NetworkNode> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn add_finalizer(&self, node: &NetworkNode) -> Result<NetworkNode> {
        let updated = patch_finalizers(
            &self.api(node),
            &node.name_any(),
            node.resource_version().as_deref(),
            finalizers_with(node, NETWORK_NODE_FINALIZER),
        )
        .await?;
        debug!(node = %node.key(), "finalizer added");
        Ok(updated)
    }

    async fn remove_finalizer(&self, node: &NetworkNode) -> Result<()> {
        let result = patch_finalizers(
            &self.api(node),
            &node.name_any(),
            node.resource_version().as_deref(),
            finalizers_without(node, NETWORK_NODE_FINALIZER),
        )
        .await;
        match result {
            Ok(_) => {
                debug!(node = %node.key(), "finalizer removed");
                Ok(())
            }
            // Already finalized by the API server
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(
        &self,
        node: &NetworkNode,
        status: &NetworkNodeStatus,
    ) -> Result<NetworkNode> {
        Ok(patch_status_guarded(
            &self.api(node),
            &node.name_any(),
            node.resource_version().as_deref(),
            status,
            FIELD_MANAGER,
        )
        .await?)
    }
}
