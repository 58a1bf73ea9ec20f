//! Custom Resource Definitions for ndd
//!
//! This module contains all CRD definitions used by the ndd operator.

mod device_driver;
mod network_node;
mod types;

pub use device_driver::{DeviceDriver, DeviceDriverSpec, DriverContainerSpec};
pub use network_node::{NetworkNode, NetworkNodeSpec, NetworkNodeStatus, NetworkNodeTarget};
pub use types::{
    get_condition, reasons, set_condition, Condition, ConditionKind, ConditionStatus,
};
