//! DeviceDriver CRD
//!
//! Catalog entry describing how to run the driver for one device driver
//! kind. Entries are selected by the `ddriver-kind` label.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::DRIVER_KIND_LABEL;

/// DeviceDriver is read-only reference data for the network node controller.
///
/// Example:
/// ```yaml
/// apiVersion: dvr.ndd.dev/v1
/// kind: DeviceDriver
/// metadata:
///   name: gnmi
///   namespace: ndd-system
///   labels:
///     ddriver-kind: gnmi
/// spec:
///   container:
///     image: ghcr.io/ndd/gnmi-driver:v0.1.0
///     args: ["start"]
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dvr.ndd.dev",
    version = "v1",
    kind = "DeviceDriver",
    namespaced,
    shortname = "dd",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".metadata.labels.ddriver-kind"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.container.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDriverSpec {
    /// Container that runs the driver process
    pub container: DriverContainerSpec,
}

/// Runtime parameters for a driver container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverContainerSpec {
    /// Container image
    pub image: String,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Arguments passed before the node-specific flags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl DeviceDriver {
    /// The driver kind this entry serves, from its `ddriver-kind` label
    pub fn driver_kind(&self) -> Option<&str> {
        self.labels().get(DRIVER_KIND_LABEL).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_kind_comes_from_label() {
        let mut dd = DeviceDriver::new(
            "gnmi",
            DeviceDriverSpec {
                container: DriverContainerSpec {
                    image: "driver:v1".to_string(),
                    ..Default::default()
                },
            },
        );
        assert_eq!(dd.driver_kind(), None);

        dd.labels_mut()
            .insert(DRIVER_KIND_LABEL.to_string(), "gnmi".to_string());
        assert_eq!(dd.driver_kind(), Some("gnmi"));
    }

    #[test]
    fn container_yaml_parses() {
        let yaml = r#"
container:
  image: ghcr.io/ndd/gnmi-driver:v0.1.0
  imagePullPolicy: IfNotPresent
  args: ["start"]
  env:
    LOG_LEVEL: debug
"#;
        let spec: DeviceDriverSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(spec.container.args, vec!["start"]);
        assert_eq!(spec.container.env["LOG_LEVEL"], "debug");
        assert!(spec.container.command.is_empty());
    }
}
