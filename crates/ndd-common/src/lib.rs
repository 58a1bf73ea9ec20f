//! Common types for ndd: CRDs, conditions, errors, events and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all ndd custom resources
pub const NDD_API_GROUP: &str = "dvr.ndd.dev";

/// Default namespace for driver workloads (config maps, services, deployments)
pub const NDD_SYSTEM_NAMESPACE: &str = "ndd-system";

/// Default gRPC port the device driver process listens on
pub const DEFAULT_GRPC_SERVER_PORT: i32 = 9999;

/// Label on a DeviceDriver catalog entry naming the driver kind it serves
pub const DRIVER_KIND_LABEL: &str = "ddriver-kind";

/// Label attributing owned resources to a network node's device driver
pub const LABEL_NETWORK_DEVICE_DRIVER: &str = "netwDDriver";

/// Label recording the namespace of the network node a resource serves
pub const LABEL_NODE_NAMESPACE: &str = "dvr.ndd.dev/node-namespace";

/// Label shared by the driver pods and the service selector
pub const LABEL_APPLICATION: &str = "app";

/// Standard Kubernetes managed-by label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Managed-by label value for resources created by ndd
pub const LABEL_MANAGED_BY_NDD: &str = "ndd";

/// Finalizer guarding NetworkNode deletion until its driver is torn down
pub const NETWORK_NODE_FINALIZER: &str = "networknode.dvr.ndd.dev";
