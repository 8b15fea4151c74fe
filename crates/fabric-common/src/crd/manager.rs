//! Manager CRD - the singleton describing the whole platform deployment
//!
//! The manager lists which services are enabled (and under which instance
//! name) and carries the cluster-wide staged-upgrade stage in its status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Container;

// =============================================================================
// CRD
// =============================================================================

/// Spec for the platform Manager
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Manager",
    plural = "managers",
    shortname = "mgr",
    namespaced,
    status = "ManagerStatus",
    printcolumn = r#"{"name":"Stage","type":"integer","jsonPath":".status.ziuState"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSpec {
    /// Enabled services
    #[serde(default)]
    pub services: Services,
}

/// Enabled platform services
///
/// Singletons are optional; replicated kinds are lists of instances.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Services {
    /// Analytics SNMP collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_snmp: Option<ServiceInput>,
    /// Analytics alarm generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_alarm: Option<ServiceInput>,
    /// Analytics API and collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<ServiceInput>,
    /// Config API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ServiceInput>,
    /// Control nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ServiceInput>,
    /// Kubernetes network manager (CNI integration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubemanager: Option<ServiceInput>,
    /// Analytics query engine
    #[serde(default, rename = "queryengine", skip_serializing_if = "Option::is_none")]
    pub query_engine: Option<ServiceInput>,
    /// Web UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webui: Option<ServiceInput>,
    /// Forwarding agent fleets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vrouters: Vec<ServiceInput>,
    /// Cassandra clusters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cassandras: Vec<ServiceInput>,
    /// Zookeeper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<ServiceInput>,
    /// RabbitMQ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq: Option<ServiceInput>,
    /// Redis instances
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redis: Vec<ServiceInput>,
}

/// One enabled service instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInput {
    /// Instance metadata
    #[serde(default)]
    pub metadata: InputMetadata,
    /// Instance spec (only the containers matter to the manager)
    #[serde(default)]
    pub spec: InputSpec,
}

impl ServiceInput {
    /// Instance name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Containers of the instance, in declaration order
    pub fn containers(&self) -> &[Container] {
        &self.spec.service_configuration.containers
    }
}

/// Metadata of an enabled service instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct InputMetadata {
    /// Instance name
    #[serde(default)]
    pub name: String,
}

/// Spec of an enabled service instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    /// Service settings
    #[serde(default)]
    pub service_configuration: InputServiceConfiguration,
}

/// Service settings the manager inspects
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct InputServiceConfiguration {
    /// Containers with desired images
    #[serde(default)]
    pub containers: Vec<Container>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the platform Manager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    /// Staged upgrade stage
    #[serde(default)]
    pub ziu_state: ZiuStage,

    /// Kind sequence recorded when the staged upgrade was armed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ziu_kinds: Vec<String>,
}

/// Cluster-wide staged upgrade stage.
///
/// `-1` is idle, `0` is armed, `n >= 1` means the kind at index `n - 1` of the
/// kind sequence is the only one allowed to reconcile. Any other negative
/// value is read as idle.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ZiuStage(i32);

impl Default for ZiuStage {
    fn default() -> Self {
        Self::IDLE
    }
}

impl ZiuStage {
    /// No staged upgrade in progress
    pub const IDLE: ZiuStage = ZiuStage(-1);
    /// Staged upgrade armed, no kind admitted yet
    pub const ARMED: ZiuStage = ZiuStage(0);

    /// Wrap a raw stage value
    pub fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw stage value as stored in the manager status
    pub fn raw(&self) -> i32 {
        self.0
    }

    /// Whether no staged upgrade is in progress
    pub fn is_idle(&self) -> bool {
        self.0 < 0
    }

    /// Index into the kind sequence of the kind admitted at this stage
    pub fn active_index(&self) -> Option<usize> {
        usize::try_from(self.0).ok().and_then(|n| n.checked_sub(1))
    }

    /// The stage following this one
    pub fn next(&self) -> ZiuStage {
        if self.is_idle() {
            Self::ARMED
        } else {
            Self(self.0.saturating_add(1))
        }
    }
}

impl std::fmt::Display for ZiuStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_absent_ziu_state_is_idle() {
        let status: ManagerStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.ziu_state, ZiuStage::IDLE);
        assert!(status.ziu_kinds.is_empty());
    }

    #[test]
    fn test_ziu_state_wire_format() {
        let status: ManagerStatus =
            serde_json::from_str(r#"{"ziuState":3,"ziuKinds":["Config"]}"#).unwrap();
        assert_eq!(status.ziu_state.raw(), 3);
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"ziuState":3,"ziuKinds":["Config"]})
        );
    }

    #[rstest]
    #[case(-1, true, None)]
    #[case(-5, true, None)]
    #[case(0, false, None)]
    #[case(1, false, Some(0))]
    #[case(3, false, Some(2))]
    fn test_stage_interpretation(
        #[case] raw: i32,
        #[case] idle: bool,
        #[case] index: Option<usize>,
    ) {
        let stage = ZiuStage::new(raw);
        assert_eq!(stage.is_idle(), idle);
        assert_eq!(stage.active_index(), index);
    }

    #[test]
    fn test_next_stage() {
        assert_eq!(ZiuStage::IDLE.next(), ZiuStage::ARMED);
        assert_eq!(ZiuStage::ARMED.next(), ZiuStage::new(1));
        assert_eq!(ZiuStage::new(4).next(), ZiuStage::new(5));
    }

    #[test]
    fn test_services_wire_names() {
        let services: Services = serde_json::from_value(serde_json::json!({
            "queryengine": {"metadata": {"name": "queryengine1"}},
            "controls": [{"metadata": {"name": "control1"}, "spec": {"serviceConfiguration": {
                "containers": [{"name": "control", "image": "registry/control:R2"}]
            }}}]
        }))
        .unwrap();
        assert_eq!(services.query_engine.as_ref().map(|s| s.name()), Some("queryengine1"));
        assert_eq!(services.controls[0].containers()[0].image, "registry/control:R2");
    }
}
