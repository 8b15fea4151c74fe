//! Shared types used across fabric CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity of one cluster member as seen by a service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Address the member is reachable on
    #[serde(default)]
    pub ip: String,
    /// Resolved hostname of the member
    #[serde(default)]
    pub hostname: String,
}

/// Membership of the services the forwarding agent depends on.
///
/// Every list is a sorted, comma-joined string of member addresses. The
/// value is recomputed every reconcile and never persisted as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClusterNodes {
    /// Control service members (XMPP / DNS servers for the agent)
    pub control_nodes: String,
    /// Config API members
    pub config_nodes: String,
    /// Analytics collector members
    pub analytics_nodes: String,
}

impl ClusterNodes {
    /// Build a comma-joined list from member addresses, sorted for stability
    pub fn join<I, S>(members: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = members.into_iter().map(Into::into).collect();
        list.sort();
        list.dedup();
        list.join(",")
    }
}

/// A container of a managed workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name (e.g. "vrouteragent", "nodemanager")
    pub name: String,
    /// Image reference
    #[serde(default)]
    pub image: String,
    /// Optional command override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

/// Find a container by name
pub fn find_container<'a>(containers: &'a [Container], name: &str) -> Option<&'a Container> {
    containers.iter().find(|c| c.name == name)
}

/// Map a user-facing log level to the level name the platform daemons expect.
///
/// Unknown values pass through unchanged.
pub fn native_log_level(level: &str) -> String {
    match level {
        "info" => "SYS_INFO",
        "debug" => "SYS_DEBUG",
        "warning" => "SYS_WARN",
        "error" => "SYS_ERR",
        "critical" => "SYS_CRIT",
        other => other,
    }
    .to_string()
}
