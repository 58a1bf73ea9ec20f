//! Resource establisher
//!
//! Drives the config map, service and deployment of one node as a unit.
//! Each step is a single idempotent-intent API call. The first failing step
//! aborts the sequence and is reported with its resource kind; retrying is
//! left to the reconciler.
//!
//! An existing object is only replaced or deleted when its node-namespace
//! label names this node's namespace. Objects of a same-named node in
//! another namespace fail create and update, and are left alone on delete.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Container, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use ndd_common::kube_utils::{is_already_exists, is_not_found};
use ndd_common::{Error, Result, LABEL_NODE_NAMESPACE};

use crate::resources::{build_resources, DriverIdentity, OwnedResource, ResourceKind};
use crate::FIELD_MANAGER;

/// Result of a create-if-absent call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created
    Created,
    /// An object with that name was already there
    AlreadyExists,
}

/// Result of a delete-if-present call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object was deleted (or deletion started)
    Deleted,
    /// There was nothing to delete
    NotFound,
}

/// Who holds an owned-resource name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Occupant {
    /// No object has that name
    Vacant,
    /// An object serving a node in the given namespace
    Node(String),
    /// An object without the node-namespace label
    Unlabelled,
}

/// Uniform create/replace/delete over the owned resource kinds
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Create the object if no object of that name exists
    async fn create(&self, resource: &OwnedResource) -> Result<CreateOutcome>;

    /// Make the stored object match `resource`
    async fn replace(&self, resource: &OwnedResource) -> Result<()>;

    /// Report who holds the named object
    async fn occupant(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<Occupant>;

    /// Delete the named object if present
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<DeleteOutcome>;
}

/// [`ResourceApi`] backed by the Kubernetes API server
pub struct KubeResourceApi {
    client: Client,
}

impl KubeResourceApi {
    /// Create a new resource API using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn create_typed<K>(api: Api<K>, obj: &K) -> Result<CreateOutcome>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(e) if is_already_exists(&e) => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e.into()),
    }
}

async fn apply_typed<K>(api: Api<K>, name: &str, obj: &K) -> Result<()>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(obj),
    )
    .await?;
    Ok(())
}

async fn occupant_typed<K>(api: Api<K>, name: &str) -> Result<Occupant>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let Some(obj) = api.get_opt(name).await? else {
        return Ok(Occupant::Vacant);
    };
    let labels = obj.meta().labels.as_ref();
    Ok(match labels.and_then(|l| l.get(LABEL_NODE_NAMESPACE)) {
        Some(ns) => Occupant::Node(ns.clone()),
        None => Occupant::Unlabelled,
    })
}

async fn delete_typed<K>(api: Api<K>, name: &str) -> Result<DeleteOutcome>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(DeleteOutcome::Deleted),
        Err(e) if is_not_found(&e) => Ok(DeleteOutcome::NotFound),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ResourceApi for KubeResourceApi {
    async fn create(&self, resource: &OwnedResource) -> Result<CreateOutcome> {
        let ns = resource.namespace();
        match resource {
            OwnedResource::Config(cm) => create_typed(self.api::<ConfigMap>(ns), cm).await,
            OwnedResource::Endpoint(svc) => create_typed(self.api::<Service>(ns), svc).await,
            OwnedResource::Workload(deploy) => {
                create_typed(self.api::<Deployment>(ns), deploy).await
            }
        }
    }

    async fn replace(&self, resource: &OwnedResource) -> Result<()> {
        let (ns, name) = (resource.namespace(), resource.name());
        match resource {
            OwnedResource::Config(cm) => apply_typed(self.api::<ConfigMap>(ns), name, cm).await,
            OwnedResource::Endpoint(svc) => apply_typed(self.api::<Service>(ns), name, svc).await,
            OwnedResource::Workload(deploy) => {
                apply_typed(self.api::<Deployment>(ns), name, deploy).await
            }
        }
    }

    async fn occupant(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Occupant> {
        match kind {
            ResourceKind::ConfigMap => {
                occupant_typed(self.api::<ConfigMap>(namespace), name).await
            }
            ResourceKind::Service => occupant_typed(self.api::<Service>(namespace), name).await,
            ResourceKind::Deployment => {
                occupant_typed(self.api::<Deployment>(namespace), name).await
            }
        }
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome> {
        match kind {
            ResourceKind::ConfigMap => delete_typed(self.api::<ConfigMap>(namespace), name).await,
            ResourceKind::Service => delete_typed(self.api::<Service>(namespace), name).await,
            ResourceKind::Deployment => {
                delete_typed(self.api::<Deployment>(namespace), name).await
            }
        }
    }
}

/// Create/update/delete of a node's driver resources as one unit
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Establisher: Send + Sync {
    /// Bring all three resources into existence
    async fn create(&self, id: &DriverIdentity, port: i32, container: &Container) -> Result<()>;

    /// Replace all three resources with freshly built ones
    async fn update(&self, id: &DriverIdentity, port: i32, container: &Container) -> Result<()>;

    /// Remove all three resources
    async fn delete(&self, id: &DriverIdentity) -> Result<()>;
}

/// The production establisher, sequencing calls over a [`ResourceApi`]
pub struct ResourceEstablisher {
    api: Arc<dyn ResourceApi>,
}

impl ResourceEstablisher {
    /// Create an establisher over the given resource API
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self { api }
    }

    /// Establisher talking to the API server
    pub fn from_client(client: Client) -> Self {
        Self::new(Arc::new(KubeResourceApi::new(client)))
    }
}

impl ResourceEstablisher {
    async fn occupant(
        &self,
        id: &DriverIdentity,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Occupant> {
        self.api
            .occupant(kind, &id.namespace, name)
            .await
            .map_err(|e| step_error(id, kind, "get", e))
    }

    /// Replace `resource` unless another node's object holds its name
    async fn replace_own(
        &self,
        id: &DriverIdentity,
        resource: &OwnedResource,
        operation: &str,
    ) -> Result<()> {
        let kind = resource.kind();
        match self.occupant(id, kind, resource.name()).await? {
            Occupant::Node(ns) if id.claims(&ns) => {}
            Occupant::Vacant => {}
            other => return Err(claim_error(id, resource, operation, &other)),
        }
        self.api
            .replace(resource)
            .await
            .map_err(|e| step_error(id, kind, "replace", e))
    }
}

fn step_error(id: &DriverIdentity, kind: ResourceKind, operation: &str, err: Error) -> Error {
    Error::establish(&id.node_name, kind.as_str(), operation, err.to_string())
}

fn claim_error(
    id: &DriverIdentity,
    resource: &OwnedResource,
    operation: &str,
    occupant: &Occupant,
) -> Error {
    let holder = match occupant {
        Occupant::Node(ns) => format!("a node in namespace {ns}"),
        _ => "an object not managed for any node".to_string(),
    };
    Error::establish(
        &id.node_name,
        resource.kind().as_str(),
        operation,
        format!(
            "{}/{} is held by {holder}, not by {}/{}",
            resource.namespace(),
            resource.name(),
            id.node_namespace,
            id.node_name
        ),
    )
}

#[async_trait]
impl Establisher for ResourceEstablisher {
    #[instrument(skip(self, id, container), fields(node = %id.node_name))]
    async fn create(&self, id: &DriverIdentity, port: i32, container: &Container) -> Result<()> {
        for resource in build_resources(id, port, container) {
            let kind = resource.kind();
            let outcome = self
                .api
                .create(&resource)
                .await
                .map_err(|e| step_error(id, kind, "create", e))?;

            if outcome == CreateOutcome::AlreadyExists {
                debug!(%kind, name = resource.name(), "already exists, replacing");
                self.replace_own(id, &resource, "create").await?;
            }
        }
        info!(namespace = %id.namespace, "driver resources established");
        Ok(())
    }

    #[instrument(skip(self, id, container), fields(node = %id.node_name))]
    async fn update(&self, id: &DriverIdentity, port: i32, container: &Container) -> Result<()> {
        for resource in build_resources(id, port, container) {
            self.replace_own(id, &resource, "replace").await?;
        }
        info!(namespace = %id.namespace, "driver resources updated");
        Ok(())
    }

    #[instrument(skip(self, id), fields(node = %id.node_name))]
    async fn delete(&self, id: &DriverIdentity) -> Result<()> {
        let names = id.names();
        // Same order as create
        for kind in ResourceKind::ORDER {
            let name = names.name_of(kind);
            match self.occupant(id, kind, name).await? {
                Occupant::Node(ns) if id.claims(&ns) => {}
                Occupant::Vacant => {
                    debug!(%kind, name, "already gone");
                    continue;
                }
                other => {
                    warn!(%kind, name, occupant = ?other, "not owned by this node, leaving it");
                    continue;
                }
            }
            let outcome = self
                .api
                .delete(kind, &id.namespace, name)
                .await
                .map_err(|e| step_error(id, kind, "delete", e))?;
            if outcome == DeleteOutcome::NotFound {
                debug!(%kind, name, "already gone");
            }
        }
        info!(namespace = %id.namespace, "driver resources deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    fn identity() -> DriverIdentity {
        DriverIdentity {
            node_name: "leaf1".to_string(),
            node_namespace: "lab".to_string(),
            namespace: "ndd-system".to_string(),
            owner: None,
        }
    }

    fn container() -> Container {
        Container {
            name: "driver".to_string(),
            image: Some("driver:v1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_runs_config_endpoint_workload_in_order() {
        let mut api = MockResourceApi::new();
        let mut seq = Sequence::new();
        for kind in ResourceKind::ORDER {
            api.expect_create()
                .withf(move |r| r.kind() == kind)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(CreateOutcome::Created));
        }
        api.expect_replace().never();
        api.expect_occupant().never();

        let establisher = ResourceEstablisher::new(Arc::new(api));
        establisher
            .create(&identity(), 9999, &container())
            .await
            .unwrap();
    }

    /// Story: a second Create for the same node converges instead of failing
    #[tokio::test]
    async fn story_repeated_create_replaces_existing_objects() {
        let mut api = MockResourceApi::new();
        api.expect_create()
            .times(3)
            .returning(|_| Ok(CreateOutcome::AlreadyExists));
        api.expect_occupant()
            .times(3)
            .returning(|_, _, _| Ok(Occupant::Node("lab".to_string())));
        api.expect_replace().times(3).returning(|_| Ok(()));

        let establisher = ResourceEstablisher::new(Arc::new(api));
        establisher
            .create(&identity(), 9999, &container())
            .await
            .unwrap();
    }

    /// Story: a same-named node in another namespace cannot take over the
    /// objects of the node that created them
    #[tokio::test]
    async fn story_create_refuses_objects_of_another_namespace() {
        let mut api = MockResourceApi::new();
        api.expect_create()
            .times(1)
            .returning(|_| Ok(CreateOutcome::AlreadyExists));
        api.expect_occupant()
            .times(1)
            .returning(|_, _, _| Ok(Occupant::Node("prod".to_string())));
        api.expect_replace().never();

        let establisher = ResourceEstablisher::new(Arc::new(api));
        let err = establisher
            .create(&identity(), 9999, &container())
            .await
            .unwrap_err();

        assert_eq!(err.resource(), Some("ConfigMap"));
        assert!(err.to_string().starts_with("create ConfigMap failed"));
        assert!(err.to_string().contains("namespace prod"));
    }

    #[tokio::test]
    async fn create_refuses_unlabelled_objects() {
        let mut api = MockResourceApi::new();
        api.expect_create()
            .returning(|_| Ok(CreateOutcome::AlreadyExists));
        api.expect_occupant()
            .returning(|_, _, _| Ok(Occupant::Unlabelled));
        api.expect_replace().never();

        let establisher = ResourceEstablisher::new(Arc::new(api));
        let err = establisher
            .create(&identity(), 9999, &container())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not managed for any node"));
    }

    #[tokio::test]
    async fn create_failure_aborts_and_names_the_failed_kind() {
        let mut api = MockResourceApi::new();
        api.expect_create().times(2).returning(|r| match r.kind() {
            ResourceKind::ConfigMap => Ok(CreateOutcome::Created),
            _ => Err(Error::internal("quota exceeded")),
        });

        let establisher = ResourceEstablisher::new(Arc::new(api));
        let err = establisher
            .create(&identity(), 9999, &container())
            .await
            .unwrap_err();

        assert_eq!(err.resource(), Some("Service"));
        assert_eq!(err.node(), Some("leaf1"));
        assert!(err.to_string().starts_with("create Service failed"));
    }

    #[tokio::test]
    async fn delete_uses_create_order() {
        let mut api = MockResourceApi::new();
        api.expect_occupant()
            .times(3)
            .returning(|_, _, _| Ok(Occupant::Node("lab".to_string())));
        let mut seq = Sequence::new();
        for (kind, name) in [
            (ResourceKind::ConfigMap, "ndd-cm-leaf1"),
            (ResourceKind::Service, "ndd-svc-leaf1"),
            (ResourceKind::Deployment, "ndd-deployment-leaf1"),
        ] {
            api.expect_delete()
                .withf(move |k, ns, n| *k == kind && ns == "ndd-system" && n == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(DeleteOutcome::Deleted));
        }

        let establisher = ResourceEstablisher::new(Arc::new(api));
        establisher.delete(&identity()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_tolerates_missing_objects() {
        let mut api = MockResourceApi::new();
        api.expect_occupant()
            .times(3)
            .returning(|_, _, _| Ok(Occupant::Vacant));
        api.expect_delete().never();

        let establisher = ResourceEstablisher::new(Arc::new(api));
        establisher.delete(&identity()).await.unwrap();
    }

    /// Story: deleting a node never removes the objects of a same-named
    /// node in another namespace
    #[tokio::test]
    async fn story_delete_leaves_objects_of_another_namespace() {
        let mut api = MockResourceApi::new();
        api.expect_occupant()
            .times(3)
            .returning(|_, _, _| Ok(Occupant::Node("prod".to_string())));
        api.expect_delete().never();

        let establisher = ResourceEstablisher::new(Arc::new(api));
        establisher.delete(&identity()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_failure_stops_sequence() {
        let mut api = MockResourceApi::new();
        api.expect_occupant()
            .times(1)
            .returning(|_, _, _| Ok(Occupant::Node("lab".to_string())));
        api.expect_delete()
            .times(1)
            .returning(|_, _, _| Err(Error::internal("forbidden")));

        let establisher = ResourceEstablisher::new(Arc::new(api));
        let err = establisher.delete(&identity()).await.unwrap_err();
        assert_eq!(err.resource(), Some("ConfigMap"));
        assert!(err.to_string().starts_with("delete ConfigMap failed"));
    }

    #[tokio::test]
    async fn update_replaces_every_resource() {
        let mut api = MockResourceApi::new();
        api.expect_create().never();
        api.expect_occupant()
            .times(3)
            .returning(|_, _, _| Ok(Occupant::Vacant));
        api.expect_replace().times(3).returning(|_| Ok(()));

        let establisher = ResourceEstablisher::new(Arc::new(api));
        establisher
            .update(&identity(), 10000, &container())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_refuses_objects_of_another_namespace() {
        let mut api = MockResourceApi::new();
        api.expect_occupant()
            .times(1)
            .returning(|_, _, _| Ok(Occupant::Node("prod".to_string())));
        api.expect_replace().never();

        let establisher = ResourceEstablisher::new(Arc::new(api));
        let err = establisher
            .update(&identity(), 10000, &container())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("replace ConfigMap failed"));
    }
}
