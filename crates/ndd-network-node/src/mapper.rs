//! DeviceDriver → NetworkNode watch mapping
//!
//! A change to a catalog entry re-queues every node in the entry's
//! namespace whose `deviceDriverKind` equals the entry's `ddriver-kind`
//! label.

use std::sync::Arc;

use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use tracing::debug;

use ndd_common::crd::{DeviceDriver, NetworkNode};

/// Source of the currently known network nodes
pub trait NodeLister: Send + Sync {
    /// All known nodes in `namespace`
    fn nodes_in(&self, namespace: &str) -> Vec<Arc<NetworkNode>>;
}

impl NodeLister for Store<NetworkNode> {
    fn nodes_in(&self, namespace: &str) -> Vec<Arc<NetworkNode>> {
        self.state()
            .into_iter()
            .filter(|n| n.namespace().as_deref() == Some(namespace))
            .collect()
    }
}

/// Reconcile requests for every node that uses `driver`'s kind
pub fn nodes_for_device_driver(
    lister: &dyn NodeLister,
    driver: &DeviceDriver,
) -> Vec<ObjectRef<NetworkNode>> {
    let (Some(namespace), Some(kind)) = (driver.namespace(), driver.driver_kind()) else {
        debug!(driver = %driver.name_any(), "device driver without namespace or kind label");
        return Vec::new();
    };

    let requests: Vec<_> = lister
        .nodes_in(&namespace)
        .iter()
        .filter(|n| n.spec.device_driver_kind == kind)
        .map(|n| ObjectRef::new(&n.name_any()).within(&namespace))
        .collect();

    debug!(
        driver = %driver.name_any(),
        kind,
        nodes = requests.len(),
        "device driver changed, requeueing nodes"
    );
    requests
}

/// Mapper for `Controller::watches` over a NetworkNode reflector store
pub fn device_driver_mapper(
    store: Store<NetworkNode>,
) -> impl Fn(DeviceDriver) -> Vec<ObjectRef<NetworkNode>> + Send + Sync + 'static {
    move |driver: DeviceDriver| nodes_for_device_driver(&store, &driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndd_common::crd::{
        DeviceDriverSpec, DriverContainerSpec, NetworkNodeSpec, NetworkNodeTarget,
    };
    use ndd_common::DRIVER_KIND_LABEL;

    struct FixedNodes(Vec<Arc<NetworkNode>>);

    impl NodeLister for FixedNodes {
        fn nodes_in(&self, namespace: &str) -> Vec<Arc<NetworkNode>> {
            self.0
                .iter()
                .filter(|n| n.namespace().as_deref() == Some(namespace))
                .cloned()
                .collect()
        }
    }

    fn node(namespace: &str, name: &str, kind: &str) -> Arc<NetworkNode> {
        let mut n = NetworkNode::new(
            name,
            NetworkNodeSpec {
                device_driver_kind: kind.to_string(),
                target: NetworkNodeTarget::default(),
                grpc_server_port: 9999,
            },
        );
        n.metadata.namespace = Some(namespace.to_string());
        Arc::new(n)
    }

    fn driver(namespace: Option<&str>, kind: Option<&str>) -> DeviceDriver {
        let mut dd = DeviceDriver::new(
            "catalog",
            DeviceDriverSpec {
                container: DriverContainerSpec {
                    image: "driver:v1".to_string(),
                    ..Default::default()
                },
            },
        );
        dd.metadata.namespace = namespace.map(str::to_string);
        if let Some(kind) = kind {
            dd.labels_mut()
                .insert(DRIVER_KIND_LABEL.to_string(), kind.to_string());
        }
        dd
    }

    /// Story: changing the catalog entry for kind X requeues exactly the
    /// nodes of kind X in the same namespace
    #[test]
    fn story_only_matching_nodes_in_namespace_are_requeued() {
        let lister = FixedNodes(vec![
            node("lab", "leaf1", "X"),
            node("lab", "leaf2", "X"),
            node("lab", "spine1", "Y"),
            node("prod", "leaf9", "X"),
        ]);

        let mut refs = nodes_for_device_driver(&lister, &driver(Some("lab"), Some("X")));
        refs.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            refs,
            vec![
                ObjectRef::new("leaf1").within("lab"),
                ObjectRef::new("leaf2").within("lab"),
            ]
        );
    }

    #[test]
    fn unlabeled_or_cluster_scoped_driver_maps_to_nothing() {
        let lister = FixedNodes(vec![node("lab", "leaf1", "X")]);
        assert!(nodes_for_device_driver(&lister, &driver(Some("lab"), None)).is_empty());
        assert!(nodes_for_device_driver(&lister, &driver(None, Some("X"))).is_empty());
    }

    #[test]
    fn empty_store_maps_to_nothing() {
        let (reader, _writer) = kube::runtime::reflector::store::<NetworkNode>();
        let mapper = device_driver_mapper(reader);
        assert!(mapper(driver(Some("lab"), Some("X"))).is_empty());
    }
}
