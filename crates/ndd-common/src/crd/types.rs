//! Condition vocabulary shared by ndd custom resources
//!
//! A network node carries three independent conditions: whether its device
//! driver is installed (active), whether the owned resources exist and are
//! healthy, and whether the device has been discovered. They are never
//! collapsed into a single phase.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Machine-readable condition reasons
pub mod reasons {
    /// The device driver is not running for this node
    pub const INACTIVE: &str = "InactiveDeviceDriver";
    /// The device driver is running for this node
    pub const ACTIVE: &str = "ActiveDeviceDriver";
    /// Installation has not been evaluated yet
    pub const UNKNOWN_INSTALL: &str = "UnknownDeviceDriverInstall";
    /// The owned resources are missing or failed to converge
    pub const UNHEALTHY: &str = "UnhealthyDeviceDriver";
    /// The owned resources were established
    pub const HEALTHY: &str = "HealthyDeviceDriver";
    /// Health has not been evaluated yet
    pub const UNKNOWN_HEALTH: &str = "UnknownDeviceDriverHealth";
    /// A Delete sequence failed, so some owned resources may remain
    pub const TEARDOWN_FAILED: &str = "TeardownFailed";
    /// A Create sequence failed part way, so some owned resources may exist
    pub const ESTABLISH_FAILED: &str = "EstablishFailed";
    /// The device answered discovery
    pub const DISCOVERED: &str = "DeviceDriverReady";
    /// The device has not been discovered
    pub const NOT_DISCOVERED: &str = "UndiscoveredDeviceDriver";
    /// Discovery has not been evaluated yet
    pub const UNKNOWN_DISCOVERY: &str = "UnknownDeviceDriverDiscovery";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// The orthogonal axes tracked on a network node
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    /// Installed: driver active vs inactive
    DeviceDriverInstalled,
    /// Healthy: owned resources exist vs not
    DeviceDriverHealthy,
    /// Ready: device discovered vs not
    DeviceDriverReady,
}

impl ConditionKind {
    /// All kinds in display order
    pub const ALL: [ConditionKind; 3] = [
        ConditionKind::DeviceDriverInstalled,
        ConditionKind::DeviceDriverHealthy,
        ConditionKind::DeviceDriverReady,
    ];
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceDriverInstalled => write!(f, "DeviceDriverInstalled"),
            Self::DeviceDriverHealthy => write!(f, "DeviceDriverHealthy"),
            Self::DeviceDriverReady => write!(f, "DeviceDriverReady"),
        }
    }
}

/// Kubernetes-style condition attached to a network node's status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Which axis this condition describes
    pub kind: ConditionKind,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition status changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(kind: ConditionKind, status: ConditionStatus, reason: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            reason: reason.into(),
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Attach a human-readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The driver for this node is running
    pub fn active() -> Self {
        Self::new(
            ConditionKind::DeviceDriverInstalled,
            ConditionStatus::True,
            reasons::ACTIVE,
        )
    }

    /// The driver for this node is not running
    pub fn inactive() -> Self {
        Self::new(
            ConditionKind::DeviceDriverInstalled,
            ConditionStatus::False,
            reasons::INACTIVE,
        )
    }

    /// Installation has not been evaluated yet
    pub fn unknown_install() -> Self {
        Self::new(
            ConditionKind::DeviceDriverInstalled,
            ConditionStatus::Unknown,
            reasons::UNKNOWN_INSTALL,
        )
    }

    /// Owned resources were established
    pub fn healthy() -> Self {
        Self::new(
            ConditionKind::DeviceDriverHealthy,
            ConditionStatus::True,
            reasons::HEALTHY,
        )
    }

    /// Owned resources are absent
    pub fn unhealthy() -> Self {
        Self::new(
            ConditionKind::DeviceDriverHealthy,
            ConditionStatus::False,
            reasons::UNHEALTHY,
        )
    }

    /// Health not yet evaluated
    pub fn unknown_health() -> Self {
        Self::new(
            ConditionKind::DeviceDriverHealthy,
            ConditionStatus::Unknown,
            reasons::UNKNOWN_HEALTH,
        )
    }

    /// A teardown failed; owned resources may remain
    pub fn teardown_failed() -> Self {
        Self::new(
            ConditionKind::DeviceDriverHealthy,
            ConditionStatus::False,
            reasons::TEARDOWN_FAILED,
        )
    }

    /// An establish sequence failed part way; owned resources may exist
    pub fn establish_failed() -> Self {
        Self::new(
            ConditionKind::DeviceDriverHealthy,
            ConditionStatus::False,
            reasons::ESTABLISH_FAILED,
        )
    }

    /// The device answered discovery
    pub fn discovered() -> Self {
        Self::new(
            ConditionKind::DeviceDriverReady,
            ConditionStatus::True,
            reasons::DISCOVERED,
        )
    }

    /// The device has not been discovered
    pub fn not_discovered() -> Self {
        Self::new(
            ConditionKind::DeviceDriverReady,
            ConditionStatus::False,
            reasons::NOT_DISCOVERED,
        )
    }

    /// Discovery not yet evaluated
    pub fn unknown_discovery() -> Self {
        Self::new(
            ConditionKind::DeviceDriverReady,
            ConditionStatus::Unknown,
            reasons::UNKNOWN_DISCOVERY,
        )
    }

    /// The condition a node reports for a kind it has never recorded
    pub fn absent(kind: ConditionKind) -> Self {
        match kind {
            ConditionKind::DeviceDriverInstalled => Self::unknown_install(),
            ConditionKind::DeviceDriverHealthy => Self::unknown_health(),
            ConditionKind::DeviceDriverReady => Self::unknown_discovery(),
        }
    }
}

/// Look up the condition of the given kind; absent kinds read as Unknown
pub fn get_condition(conditions: &[Condition], kind: ConditionKind) -> Condition {
    conditions
        .iter()
        .find(|c| c.kind == kind)
        .cloned()
        .unwrap_or_else(|| Condition::absent(kind))
}

/// Store a condition, replacing any prior entry of the same kind
///
/// The previous transition time is kept when the status did not change, so
/// re-asserting a condition never looks like a transition.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.kind == condition.kind) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}
