//! NetworkNode controller for ndd
//!
//! For every NetworkNode this crate brings up, supervises and tears down the
//! device driver's config map, service and deployment:
//! - [`validator`] resolves credentials and the DeviceDriver catalog entry
//! - [`establisher`] applies or removes the owned resources as one unit
//! - [`controller`] is the reconcile state machine
//! - [`mapper`] requeues nodes when their catalog entry changes

#![deny(missing_docs)]

pub mod backoff;
pub mod controller;
pub mod establisher;
pub mod mapper;
pub mod resources;
pub mod store;
pub mod validator;

pub use controller::{error_policy, reconcile, Context, ControllerConfig};
pub use establisher::{Establisher, ResourceApi, ResourceEstablisher};
pub use mapper::{device_driver_mapper, nodes_for_device_driver, NodeLister};
pub use store::{KubeNodeStore, NodeStore};
pub use validator::{Credentials, KubeValidator, Validator};

pub use ndd_common::{Error, Result};

/// Name reported on Kubernetes Events
pub const CONTROLLER_NAME: &str = "ndd-network-node-controller";

/// Field manager for every write this controller makes
pub const FIELD_MANAGER: &str = "ndd-network-node-controller";
