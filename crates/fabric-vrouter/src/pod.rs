//! In-pod operations on a forwarding agent pod
//!
//! Everything the rollout engine learns about or does to a running agent
//! goes through [`AgentPod`]. [`VrouterPod`] implements it by running shell
//! commands in the pod's containers over [`RemoteExec`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fabric_common::crd::{AGENT_CONTAINER, NODEMANAGER_CONTAINER};
use fabric_common::exec::{PodRef, RemoteExec};
use fabric_common::kube_utils::{content_hash, strip_quotes};
use fabric_common::{Error, CONFIG_MOUNT_PATH};

use crate::params::parse_parameters;

/// Marker printed by the interface check when vhost0 must be rebuilt
pub const REBIND_MARKER: &str = "REQUIRES VHOST RELOAD";

const INTERFACE_CHECK: &str = r#"[ -z "$PHYSICAL_INTERFACE" ] || exit 0 ;
[ -z "$L3MH_CIDR" ] || exit 0 ;
wait_vhost0 1 0 || exit 0 ;
[[ $(get_vrouter_physical_iface) == vhost0 ]] || echo "REQUIRES VHOST RELOAD""#;

/// Operations on the agent running on one node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentPod: Send + Sync {
    /// Whether the agent shell answers at all
    async fn is_agent_running(&self) -> bool;

    /// Whether the file at `path` inside the agent container holds exactly
    /// `content`. A missing file never matches.
    async fn file_matches(&self, path: &str, content: &str) -> Result<bool, Error>;

    /// Whether the data-plane interface must be rebound, which the agent
    /// cannot do without being recreated
    async fn needs_interface_rebind(&self) -> Result<bool, Error>;

    /// Recompute node-local parameters from the baseline and return them
    async fn derived_parameters(&self) -> Result<BTreeMap<String, String>, Error>;

    /// Ask the agent to reload its configuration
    async fn reload_agent(&self) -> Result<(), Error>;

    /// Ask the node manager to reload its configuration
    async fn reload_nodemanager(&self) -> Result<(), Error>;
}

/// Agent pod reached over remote exec
pub struct VrouterPod {
    exec: Arc<dyn RemoteExec>,
    pod: PodRef,
}

impl VrouterPod {
    pub fn new(exec: Arc<dyn RemoteExec>, pod: PodRef) -> Self {
        Self { exec, pod }
    }

    /// Run `command` in the agent container with the agent helpers loaded.
    /// Fails when the pod's baseline parameters are not mounted yet.
    async fn agent_shell(&self, command: &str) -> Result<String, Error> {
        let script = format!(
            "source {CONFIG_MOUNT_PATH}/params.env.${{POD_IP}} || exit 1;\n\
             source /actions.sh;\n\
             source /common.sh;\n\
             source /agent-functions.sh;\n\
             {command}"
        );
        let argv = vec!["/usr/bin/bash".to_string(), "-c".to_string(), script];
        let out = self.exec.exec(&self.pod, AGENT_CONTAINER, &argv).await?;
        Ok(out.stdout)
    }
}

#[async_trait]
impl AgentPod for VrouterPod {
    async fn is_agent_running(&self) -> bool {
        match self.agent_shell("true").await {
            Ok(_) => true,
            Err(e) => {
                debug!(pod = %self.pod.name, error = %e, "agent shell not reachable");
                false
            }
        }
    }

    async fn file_matches(&self, path: &str, content: &str) -> Result<bool, Error> {
        let argv = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("[ ! -e {path} ] || /usr/bin/sha256sum {path}"),
        ];
        let out = self.exec.exec(&self.pod, AGENT_CONTAINER, &argv).await?;
        let Some(actual) = out.stdout.split_whitespace().next() else {
            return Ok(false);
        };
        Ok(actual == content_hash(content))
    }

    async fn needs_interface_rebind(&self) -> Result<bool, Error> {
        let stdout = self.agent_shell(INTERFACE_CHECK).await?;
        Ok(stdout
            .lines()
            .any(|line| strip_quotes(line.trim()) == REBIND_MARKER))
    }

    async fn derived_parameters(&self) -> Result<BTreeMap<String, String>, Error> {
        self.agent_shell("prepare_agent_config_vars").await?;
        let stdout = self.agent_shell("get_parameters").await?;
        Ok(parse_parameters(&stdout))
    }

    async fn reload_agent(&self) -> Result<(), Error> {
        info!(pod = %self.pod.name, "reloading agent configuration");
        self.agent_shell("reload_config").await?;
        Ok(())
    }

    async fn reload_nodemanager(&self) -> Result<(), Error> {
        info!(pod = %self.pod.name, "reloading node manager");
        let argv = vec![
            "/usr/bin/bash".to_string(),
            "-c".to_string(),
            "kill -HUP 1".to_string(),
        ];
        self.exec
            .exec(&self.pod, NODEMANAGER_CONTAINER, &argv)
            .await?;
        Ok(())
    }
}
