//! Owned resource builders
//!
//! Every network node owns at most one config map, service and deployment.
//! Their names and labels derive from the node name alone, plus one label
//! recording the node's namespace. The service selector is the exact label
//! set stamped on the deployment's pods.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use ndd_common::crd::NetworkNode;
use ndd_common::{
    LABEL_APPLICATION, LABEL_MANAGED_BY, LABEL_MANAGED_BY_NDD, LABEL_NETWORK_DEVICE_DRIVER,
    LABEL_NODE_NAMESPACE,
};

/// Prefix shared by every driver-derived name
pub const DRIVER_PREFIX: &str = "ndd-";
/// Config map name prefix
pub const CONFIG_MAP_PREFIX: &str = "ndd-cm-";
/// Service name prefix
pub const SERVICE_PREFIX: &str = "ndd-svc-";
/// Deployment name prefix
pub const DEPLOYMENT_PREFIX: &str = "ndd-deployment-";
/// Name of the service port fronting the driver's gRPC server
pub const PROXY_PORT_NAME: &str = "proxy";

/// Kinds of resource owned by a network node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Driver configuration
    ConfigMap,
    /// Network endpoint in front of the driver
    Service,
    /// The driver workload
    Deployment,
}

impl ResourceKind {
    /// Sequence used for create, update and delete alike
    pub const ORDER: [ResourceKind; 3] = [
        ResourceKind::ConfigMap,
        ResourceKind::Service,
        ResourceKind::Deployment,
    ];

    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMap => "ConfigMap",
            Self::Service => "Service",
            Self::Deployment => "Deployment",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic names for one node's driver resources
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverNames {
    /// `ndd-<node>`, the value of the attribution and app labels
    pub driver: String,
    /// `ndd-cm-<node>`
    pub config_map: String,
    /// `ndd-svc-<node>`
    pub service: String,
    /// `ndd-deployment-<node>`
    pub deployment: String,
}

impl DriverNames {
    /// Derive all names from the node name
    pub fn for_node(node_name: &str) -> Self {
        Self {
            driver: format!("{DRIVER_PREFIX}{node_name}"),
            config_map: format!("{CONFIG_MAP_PREFIX}{node_name}"),
            service: format!("{SERVICE_PREFIX}{node_name}"),
            deployment: format!("{DEPLOYMENT_PREFIX}{node_name}"),
        }
    }

    /// Resource name for the given kind
    pub fn name_of(&self, kind: ResourceKind) -> &str {
        match kind {
            ResourceKind::ConfigMap => &self.config_map,
            ResourceKind::Service => &self.service,
            ResourceKind::Deployment => &self.deployment,
        }
    }

    /// Labels on every owned resource
    pub fn resource_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_NETWORK_DEVICE_DRIVER.to_string(), self.driver.clone()),
            (
                LABEL_MANAGED_BY.to_string(),
                LABEL_MANAGED_BY_NDD.to_string(),
            ),
        ])
    }

    /// Pod labels, deployment selector and service selector
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(LABEL_APPLICATION.to_string(), self.driver.clone())])
    }
}

/// Where and as whom a node's driver resources are created
#[derive(Clone, Debug, PartialEq)]
pub struct DriverIdentity {
    /// Name of the owning network node
    pub node_name: String,
    /// Namespace of the owning network node
    pub node_namespace: String,
    /// Namespace the driver resources live in
    pub namespace: String,
    /// Owner reference to the node, when it is in the same namespace
    pub owner: Option<OwnerReference>,
}

impl DriverIdentity {
    /// Identity for `node` with resources placed in `workload_namespace`.
    ///
    /// Owner references cannot cross namespaces, so the node is only set as
    /// owner when it lives in the workload namespace.
    pub fn for_node(node: &NetworkNode, workload_namespace: &str) -> Self {
        let same_namespace = node.namespace().as_deref() == Some(workload_namespace);
        Self {
            node_name: node.name_any(),
            node_namespace: node.namespace().unwrap_or_default(),
            namespace: workload_namespace.to_string(),
            owner: same_namespace
                .then(|| node.controller_owner_ref(&()))
                .flatten(),
        }
    }

    /// Names derived from the node
    pub fn names(&self) -> DriverNames {
        DriverNames::for_node(&self.node_name)
    }

    /// Whether an object labelled with `node_namespace` belongs to this node
    ///
    /// Names derive from the node name only, so nodes of the same name in
    /// different namespaces compete for the same objects.
    pub fn claims(&self, node_namespace: &str) -> bool {
        self.node_namespace == node_namespace
    }

    fn metadata(&self, name: &str, names: &DriverNames) -> ObjectMeta {
        let mut labels = names.resource_labels();
        labels.insert(
            LABEL_NODE_NAMESPACE.to_string(),
            self.node_namespace.clone(),
        );
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            owner_references: self.owner.clone().map(|o| vec![o]),
            ..Default::default()
        }
    }
}

/// One owned resource, ready to submit
#[derive(Clone, Debug, PartialEq)]
pub enum OwnedResource {
    /// Driver configuration
    Config(ConfigMap),
    /// Network endpoint
    Endpoint(Service),
    /// Driver workload
    Workload(Deployment),
}

impl OwnedResource {
    /// Kind of this resource
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Config(_) => ResourceKind::ConfigMap,
            Self::Endpoint(_) => ResourceKind::Service,
            Self::Workload(_) => ResourceKind::Deployment,
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Config(cm) => cm.meta(),
            Self::Endpoint(svc) => svc.meta(),
            Self::Workload(deploy) => deploy.meta(),
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }
}

/// Build the full resource triple in establish order
pub fn build_resources(
    identity: &DriverIdentity,
    port: i32,
    container: &Container,
) -> [OwnedResource; 3] {
    let names = identity.names();
    [
        OwnedResource::Config(build_config_map(identity, &names)),
        OwnedResource::Endpoint(build_service(identity, &names, port)),
        OwnedResource::Workload(build_deployment(identity, &names, container)),
    ]
}

fn build_config_map(identity: &DriverIdentity, names: &DriverNames) -> ConfigMap {
    ConfigMap {
        metadata: identity.metadata(&names.config_map, names),
        ..Default::default()
    }
}

fn build_service(identity: &DriverIdentity, names: &DriverNames, port: i32) -> Service {
    Service {
        metadata: identity.metadata(&names.service, names),
        spec: Some(ServiceSpec {
            selector: Some(names.selector_labels()),
            ports: Some(vec![ServicePort {
                name: Some(PROXY_PORT_NAME.to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_deployment(
    identity: &DriverIdentity,
    names: &DriverNames,
    container: &Container,
) -> Deployment {
    Deployment {
        metadata: identity.metadata(&names.deployment, names),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(names.selector_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(names.selector_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container.clone()],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndd_common::crd::{NetworkNodeSpec, NetworkNodeTarget};

    fn node(namespace: &str) -> NetworkNode {
        let mut node = NetworkNode::new(
            "leaf1",
            NetworkNodeSpec {
                device_driver_kind: "gnmi".to_string(),
                target: NetworkNodeTarget::default(),
                grpc_server_port: 9999,
            },
        );
        node.metadata.namespace = Some(namespace.to_string());
        node.metadata.uid = Some("uid-1".to_string());
        node
    }

    fn container() -> Container {
        Container {
            name: "driver".to_string(),
            image: Some("driver:v1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn names_derive_from_node_name() {
        let names = DriverNames::for_node("leaf1");
        assert_eq!(names.driver, "ndd-leaf1");
        assert_eq!(names.config_map, "ndd-cm-leaf1");
        assert_eq!(names.service, "ndd-svc-leaf1");
        assert_eq!(names.deployment, "ndd-deployment-leaf1");
        assert_eq!(names.name_of(ResourceKind::Service), "ndd-svc-leaf1");
    }

    #[test]
    fn resources_come_out_in_establish_order() {
        let id = DriverIdentity::for_node(&node("ndd-system"), "ndd-system");
        let kinds: Vec<_> = build_resources(&id, 9999, &container())
            .iter()
            .map(OwnedResource::kind)
            .collect();
        assert_eq!(kinds, ResourceKind::ORDER.to_vec());
    }

    /// Story: the service only routes to this node's driver pods
    #[test]
    fn story_service_selector_matches_pod_labels() {
        let id = DriverIdentity::for_node(&node("ndd-system"), "ndd-system");
        let [_, OwnedResource::Endpoint(svc), OwnedResource::Workload(deploy)] =
            build_resources(&id, 9999, &container())
        else {
            panic!("unexpected resource order");
        };

        let svc_spec = svc.spec.unwrap();
        let deploy_spec = deploy.spec.unwrap();
        let pod_labels = deploy_spec.template.metadata.unwrap().labels.unwrap();

        assert_eq!(svc_spec.selector.as_ref(), Some(&pod_labels));
        assert_eq!(deploy_spec.selector.match_labels.as_ref(), Some(&pod_labels));
        assert_eq!(pod_labels["app"], "ndd-leaf1");
        assert_eq!(deploy_spec.replicas, Some(1));

        let port = &svc_spec.ports.unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("proxy"));
        assert_eq!(port.port, 9999);
        assert_eq!(port.target_port, Some(IntOrString::Int(9999)));
    }

    #[test]
    fn every_resource_carries_attribution_labels() {
        let id = DriverIdentity::for_node(&node("ndd-system"), "ndd-system");
        for resource in build_resources(&id, 9999, &container()) {
            let labels = resource.meta().labels.as_ref().unwrap();
            assert_eq!(labels["netwDDriver"], "ndd-leaf1");
            assert_eq!(labels["app.kubernetes.io/managed-by"], "ndd");
            assert_eq!(resource.namespace(), "ndd-system");
        }
    }

    #[test]
    fn resources_record_the_node_namespace() {
        let id = DriverIdentity::for_node(&node("lab"), "ndd-system");
        assert!(id.claims("lab"));
        assert!(!id.claims("prod"));
        for resource in build_resources(&id, 9999, &container()) {
            let labels = resource.meta().labels.as_ref().unwrap();
            assert_eq!(labels["dvr.ndd.dev/node-namespace"], "lab");
            assert_eq!(resource.namespace(), "ndd-system");
        }
    }

    #[test]
    fn owner_reference_only_within_workload_namespace() {
        let same = DriverIdentity::for_node(&node("ndd-system"), "ndd-system");
        let owner = same.owner.as_ref().expect("same-namespace node owns resources");
        assert_eq!(owner.kind, "NetworkNode");
        assert_eq!(owner.uid, "uid-1");

        let cross = DriverIdentity::for_node(&node("lab"), "ndd-system");
        assert!(cross.owner.is_none());
        for resource in build_resources(&cross, 9999, &container()) {
            assert!(resource.meta().owner_references.is_none());
        }
    }
}
