//! Shared Kubernetes helpers
//!
//! Small accessors over `k8s-openapi` objects plus the content hash used to
//! compare pushed configuration with what a pod actually sees.

use std::fmt::Write;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;

/// Label marking control-plane nodes on older clusters
pub const MASTER_ROLE_LABEL: &str = "node-role.kubernetes.io/master";

/// Label marking control-plane nodes
pub const CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Pod annotation holding the resolved hostname of the node it runs on
pub const HOSTNAME_ANNOTATION: &str = "hostname";

/// Compute the content hash of a configuration blob.
///
/// Full hex SHA-256, identical to what `sha256sum` prints inside a pod, so
/// the same function serves both as the persisted token for pushed params
/// and as the expected value for in-pod file verification.
pub fn content_hash(content: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, content.as_bytes());
    hash.as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Extract the tag of a container image reference.
///
/// Returns the text after the last `:`; an image without a tag yields the
/// whole reference, matching how deployed and desired images are compared.
pub fn image_tag(image: &str) -> &str {
    image.rsplit(':').next().unwrap_or(image)
}

/// Strip one pair of surrounding double quotes
pub fn strip_quotes(value: &str) -> &str {
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value)
}

/// IP address assigned to a pod, if any
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

/// Whether the pod phase is `Running`
pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

/// Image of the first container in the pod spec
pub fn first_container_image(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())
}

/// Name of the node a pod is scheduled on
pub fn pod_node_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
}

/// Hostname the agent should register under.
///
/// Prefers the `hostname` annotation written by the node-init container and
/// falls back to the scheduled node name.
pub fn pod_hostname(pod: &Pod) -> String {
    pod.annotations()
        .get(HOSTNAME_ANNOTATION)
        .filter(|h| !h.is_empty())
        .cloned()
        .or_else(|| pod_node_name(pod).map(str::to_string))
        .unwrap_or_default()
}

/// Whether a node carries a control-plane role label
pub fn is_control_plane_node(node: &Node) -> bool {
    let labels = node.labels();
    labels.contains_key(MASTER_ROLE_LABEL) || labels.contains_key(CONTROL_PLANE_ROLE_LABEL)
}
