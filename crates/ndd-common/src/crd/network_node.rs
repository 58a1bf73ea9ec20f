//! NetworkNode CRD
//!
//! A NetworkNode declares one network device that needs a device driver
//! running in the cluster. The controller provisions the driver's config
//! map, service and deployment and reports progress through conditions.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{get_condition, reasons, set_condition, Condition, ConditionKind, ConditionStatus};
use crate::DEFAULT_GRPC_SERVER_PORT;

/// NetworkNode describes a device driver instance to run for one device.
///
/// Example:
/// ```yaml
/// apiVersion: dvr.ndd.dev/v1
/// kind: NetworkNode
/// metadata:
///   name: leaf1
///   namespace: ndd-system
/// spec:
///   deviceDriverKind: gnmi
///   grpcServerPort: 9999
///   target:
///     address: 172.20.20.3:57400
///     credentialsName: leaf1-creds
///     skipVerify: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dvr.ndd.dev",
    version = "v1",
    kind = "NetworkNode",
    namespaced,
    status = "NetworkNodeStatus",
    shortname = "nn",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.deviceDriverKind"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".spec.target.address"}"#,
    printcolumn = r#"{"name":"Healthy","type":"string","jsonPath":".status.conditions[?(@.kind=='DeviceDriverHealthy')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNodeSpec {
    /// Device driver kind, matched against the `ddriver-kind` catalog label
    pub device_driver_kind: String,

    /// How to reach the device
    #[serde(default)]
    pub target: NetworkNodeTarget,

    /// Port the driver's gRPC server listens on
    #[serde(default = "default_grpc_server_port")]
    pub grpc_server_port: i32,
}

fn default_grpc_server_port() -> i32 {
    DEFAULT_GRPC_SERVER_PORT
}

/// Connection details for the managed device
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNodeTarget {
    /// Device address as `host` or `host:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Proxy used to reach the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Name of the secret holding username/password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_name: Option<String>,

    /// Name of the secret holding TLS material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_credentials_name: Option<String>,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub skip_verify: bool,

    /// Connect without TLS
    #[serde(default)]
    pub insecure: bool,

    /// Payload encoding (e.g. JSON_IETF, PROTO)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// NetworkNode status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNodeStatus {
    /// Installed, Healthy and Ready conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl NetworkNodeStatus {
    /// Condition of the given kind; absent kinds read as Unknown
    pub fn condition(&self, kind: ConditionKind) -> Condition {
        get_condition(&self.conditions, kind)
    }

    /// Set one or more conditions, one entry per kind
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for c in conditions {
            set_condition(&mut self.conditions, c);
        }
    }
}

impl NetworkNode {
    /// Condition of the given kind from the stored status
    pub fn condition(&self, kind: ConditionKind) -> Condition {
        match &self.status {
            Some(status) => status.condition(kind),
            None => Condition::absent(kind),
        }
    }

    /// Current Healthy status
    pub fn health(&self) -> ConditionStatus {
        self.condition(ConditionKind::DeviceDriverHealthy).status
    }

    /// Whether owned resources may exist for this node
    ///
    /// True when the last Healthy transition succeeded, or when a Create or
    /// Delete sequence failed part way and left resources behind.
    pub fn may_own_resources(&self) -> bool {
        let healthy = self.condition(ConditionKind::DeviceDriverHealthy);
        match healthy.status {
            ConditionStatus::True => true,
            ConditionStatus::False => {
                healthy.reason == reasons::TEARDOWN_FAILED
                    || healthy.reason == reasons::ESTABLISH_FAILED
            }
            ConditionStatus::Unknown => false,
        }
    }

    /// Whether deletion has been requested
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// `namespace/name` key used in logs and backoff tracking
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn node_with(conditions: Vec<Condition>) -> NetworkNode {
        let mut node = NetworkNode::new(
            "leaf1",
            NetworkNodeSpec {
                device_driver_kind: "gnmi".to_string(),
                target: NetworkNodeTarget::default(),
                grpc_server_port: DEFAULT_GRPC_SERVER_PORT,
            },
        );
        node.status = Some(NetworkNodeStatus { conditions });
        node
    }

    #[test]
    fn spec_yaml_applies_defaults() {
        let yaml = r#"
deviceDriverKind: gnmi
target:
  address: 10.0.0.1:57400
  credentialsName: leaf1-creds
"#;
        let spec: NetworkNodeSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.grpc_server_port, 9999);
        assert!(!spec.target.skip_verify);
        assert!(!spec.target.insecure);
        assert_eq!(spec.target.credentials_name.as_deref(), Some("leaf1-creds"));
    }

    #[test]
    fn missing_target_deserializes_empty() {
        let spec: NetworkNodeSpec =
            serde_json::from_value(serde_json::json!({"deviceDriverKind": "gnmi"})).unwrap();
        assert!(spec.target.address.is_none());
        assert!(spec.target.credentials_name.is_none());
    }

    /// Story: a fresh node owns nothing and reads Unknown health
    #[test]
    fn story_fresh_node_owns_nothing() {
        let mut node = node_with(vec![]);
        node.status = None;
        assert_eq!(node.health(), ConditionStatus::Unknown);
        assert!(!node.may_own_resources());
    }

    #[test]
    fn healthy_node_may_own_resources() {
        assert!(node_with(vec![Condition::healthy()]).may_own_resources());
    }

    #[test]
    fn failed_sequences_may_leave_resources() {
        assert!(node_with(vec![Condition::teardown_failed()]).may_own_resources());
        assert!(node_with(vec![Condition::establish_failed()]).may_own_resources());
        assert!(!node_with(vec![Condition::unhealthy()]).may_own_resources());
    }

    #[test]
    fn key_is_namespace_slash_name() {
        let mut node = node_with(vec![]);
        node.metadata.namespace = Some("lab".to_string());
        assert_eq!(node.key(), "lab/leaf1");
    }

    #[test]
    fn crd_has_status_subresource() {
        let crd = NetworkNode::crd();
        assert_eq!(crd.spec.group, "dvr.ndd.dev");
        assert_eq!(crd.spec.names.kind, "NetworkNode");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
