//! Membership projection of the services the agent depends on

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnet::IpNet;

use fabric_common::crd::{ClusterNodes, NodeInfo};

/// Project service memberships into [`ClusterNodes`].
///
/// Control members outside `data_network` are dropped; the agent only
/// reaches control over the data network.
pub fn project(
    control: &BTreeMap<String, NodeInfo>,
    config: &BTreeMap<String, NodeInfo>,
    analytics: &BTreeMap<String, NodeInfo>,
    data_network: Option<&IpNet>,
) -> ClusterNodes {
    let in_network = |node: &&NodeInfo| match data_network {
        None => true,
        Some(net) => node
            .ip
            .parse::<IpAddr>()
            .is_ok_and(|addr| net.contains(&addr)),
    };
    ClusterNodes {
        control_nodes: ClusterNodes::join(
            control.values().filter(in_network).map(|n| n.ip.as_str()),
        ),
        config_nodes: ClusterNodes::join(config.values().map(|n| n.ip.as_str())),
        analytics_nodes: ClusterNodes::join(analytics.values().map(|n| n.ip.as_str())),
    }
}
