//! Vrouter CRD - the per-node forwarding agent fleet
//!
//! One `Vrouter` owns an agent pod on every node it is scheduled to. Its
//! status carries one [`AgentStatus`] per node, which the rollout engine uses
//! to remember how far configuration delivery to that node has progressed.

use std::collections::BTreeMap;

use ipnet::IpNet;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{find_container, Container, NodeInfo};
use crate::Error;

/// Name of the agent container in the vrouter pod
pub const AGENT_CONTAINER: &str = "vrouteragent";

/// Name of the node manager container in the vrouter pod
pub const NODEMANAGER_CONTAINER: &str = "nodemanager";

// =============================================================================
// CRD
// =============================================================================

/// Spec for a Vrouter - the forwarding agent fleet
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fabric.dev",
    version = "v1alpha1",
    kind = "Vrouter",
    plural = "vrouters",
    shortname = "vr",
    namespaced,
    status = "VrouterStatus",
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Controllers","type":"boolean","jsonPath":".status.activeOnControllers"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VrouterSpec {
    /// Pod-level settings shared by every platform service
    #[serde(default)]
    pub common_configuration: CommonConfiguration,

    /// Forwarding agent settings
    #[serde(default)]
    pub service_configuration: VrouterConfiguration,
}

/// Pod-level settings shared by every platform service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfiguration {
    /// Log level: info, debug, warning, error, critical
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Node selector for the agent pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// How the provisioner authenticates against the config API
    #[serde(default)]
    pub auth_parameters: AuthParameters,
}

/// Authentication settings for the config API
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthParameters {
    /// Authentication mode
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Keystone settings, used when `auth_mode` is `Keystone`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystone: Option<KeystoneAuth>,
}

/// Authentication mode for the config API
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication
    #[default]
    Noauth,
    /// Keystone token authentication
    Keystone,
}

impl AuthMode {
    /// Wire name used in rendered configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noauth => "noauth",
            Self::Keystone => "keystone",
        }
    }
}

/// Keystone connection settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneAuth {
    /// Keystone address
    pub address: String,
    /// Keystone public port
    #[serde(default = "default_keystone_port")]
    pub port: u16,
    /// Admin user name
    #[serde(default)]
    pub admin_username: String,
    /// Admin password
    #[serde(default)]
    pub admin_password: String,
    /// Admin tenant
    #[serde(default)]
    pub admin_tenant: String,
    /// Region name
    #[serde(default)]
    pub region: String,
    /// Protocol: http or https
    #[serde(default = "default_keystone_protocol")]
    pub auth_protocol: String,
}

fn default_keystone_port() -> u16 {
    5000
}

fn default_keystone_protocol() -> String {
    "http".to_string()
}

/// Forwarding agent settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VrouterConfiguration {
    /// Containers of the agent pod; `vrouteragent` carries the desired image
    #[serde(default)]
    pub containers: Vec<Container>,

    /// Data-plane interface to bind; autodetected when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_interface: Option<String>,

    /// Name of the Control instance whose members the agent connects to
    #[serde(default = "default_control_instance")]
    pub control_instance: String,

    /// CIDR of the data network; filters control members and addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_subnet: Option<String>,

    /// Default gateway on the data network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrouter_gateway: Option<String>,

    /// L3 multihoming CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l3mh_cidr: Option<String>,

    /// Extra variables appended verbatim to the baseline parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_variables_config: BTreeMap<String, String>,

    /// Orchestrator the agent integrates with (default "kubernetes")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_orchestrator: Option<String>,

    /// Hypervisor type (default "kvm")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor_type: Option<String>,

    /// Agent mode: kernel or dpdk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,

    /// TLS for every agent channel (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_enable: Option<bool>,

    /// Collector port override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_port: Option<String>,

    /// Config API port override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_api_port: Option<String>,

    /// XMPP server port override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xmpp_server_port: Option<String>,

    /// DNS server port override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_server_port: Option<String>,

    /// Log to local files (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_local: Option<i32>,

    /// Subcluster the agent belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcluster: Option<String>,

    /// Number of 2M hugepages for dpdk mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub huge_pages_2m: Option<u32>,

    /// Number of 1G hugepages for dpdk mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub huge_pages_1g: Option<u32>,
}

fn default_control_instance() -> String {
    "control1".to_string()
}

// =============================================================================
// Status
// =============================================================================

/// Status of a Vrouter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VrouterStatus {
    /// Agent pods by pod name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeInfo>,

    /// Every agent converged and every scheduled pod is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    /// Every control-plane node runs a Ready (or upgrading) agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_on_controllers: Option<bool>,

    /// Rollout progress per node
    #[serde(default)]
    pub agents: Vec<AgentStatus>,
}

impl VrouterStatus {
    /// Rollout progress recorded for a node
    pub fn agent(&self, node: &str) -> Option<&AgentStatus> {
        self.agents.iter().find(|a| a.name == node)
    }
}

/// Rollout progress of the forwarding agent on one node
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Node name
    pub name: String,

    /// Rollout phase
    #[serde(default)]
    pub status: AgentPhase,

    /// Control members applied in the live configuration
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub control_nodes: String,

    /// Config members applied in the live configuration
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_nodes: String,

    /// Analytics members applied in the live configuration
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub analytics_nodes: String,

    /// Content hash of the last baseline parameters confirmed in the pod.
    /// Empty means the baseline must be (re)pushed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encrypted_params: String,
}

impl AgentStatus {
    /// Status for a node seen for the first time
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            name: node.into(),
            ..Default::default()
        }
    }
}

/// Rollout phase of an agent
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AgentPhase {
    /// Nothing pushed yet
    #[default]
    Starting,
    /// Baseline pushed, waiting for it to reach the pod
    Updating,
    /// Pod runs an outdated image and waits for replacement
    Upgrading,
    /// Configuration delivered and reloaded
    Ready,
}

impl AgentPhase {
    /// Whether the agent counts as serving traffic for controller readiness
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Ready | Self::Upgrading)
    }
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Updating => write!(f, "Updating"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

impl VrouterSpec {
    /// Image the agent pods are expected to run
    pub fn agent_image(&self) -> Option<&str> {
        find_container(&self.service_configuration.containers, AGENT_CONTAINER)
            .map(|c| c.image.as_str())
            .filter(|image| !image.is_empty())
    }

    /// Parsed data subnet, if configured
    pub fn data_network(&self) -> Result<Option<IpNet>, Error> {
        match self.service_configuration.data_subnet.as_deref() {
            None | Some("") => Ok(None),
            Some(cidr) => cidr.parse::<IpNet>().map(Some).map_err(|e| {
                Error::validation_for_field(
                    "Vrouter",
                    "spec.serviceConfiguration.dataSubnet",
                    format!("invalid CIDR {cidr}: {e}"),
                )
            }),
        }
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<(), Error> {
        if self.agent_image().is_none() {
            return Err(Error::validation_for_field(
                "Vrouter",
                "spec.serviceConfiguration.containers",
                format!("container {AGENT_CONTAINER} with an image is required"),
            ));
        }

        let network = self.data_network()?;
        if let Some(gw) = self
            .service_configuration
            .vrouter_gateway
            .as_deref()
            .filter(|g| !g.is_empty())
        {
            let Some(network) = network else {
                return Err(Error::validation_for_field(
                    "Vrouter",
                    "spec.serviceConfiguration.dataSubnet",
                    "dataSubnet is required when vrouterGateway is set",
                ));
            };
            let addr = gw.parse::<std::net::IpAddr>().map_err(|_| {
                Error::validation_for_field(
                    "Vrouter",
                    "spec.serviceConfiguration.vrouterGateway",
                    format!("invalid gateway address {gw}"),
                )
            })?;
            if !network.contains(&addr) {
                return Err(Error::validation_for_field(
                    "Vrouter",
                    "spec.serviceConfiguration.vrouterGateway",
                    format!("gateway {gw} is outside dataSubnet {network}"),
                ));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
