//! Agent configuration rollout
//!
//! Converges the configuration of the agent on one node in two phases:
//!
//! 1. push the baseline parameters and wait until the pod sees them
//! 2. let the agent recompute its node-local parameters, render and push
//!    the full file set, wait until the pod sees all of it, then reload
//!
//! Configuration reaches the pod through a mounted ConfigMap, so every
//! write is followed by at least one more tick before it can be verified.
//! A change of the data-plane interface cannot be applied by a reload; the
//! pod is deleted instead and the rollout starts over on the new pod.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use fabric_common::crd::{AgentPhase, AgentStatus};
use fabric_common::exec::PodRef;
use fabric_common::kube_utils::content_hash;
use fabric_common::template::TemplateRenderer;
use fabric_common::Error;

use crate::configs::{AgentFile, ConfigUpdate};
use crate::params::DesiredAgent;
use crate::pod::AgentPod;
use crate::store::{AgentConfigStore, ConfigMapRef};

/// The node a tick works on
pub struct NodeTarget<'a> {
    /// Node name
    pub node: &'a str,
    /// Agent pod on the node
    pub pod: &'a PodRef,
    /// Address of the agent pod; suffix of its ConfigMap keys
    pub pod_ip: &'a str,
    /// Image the agent container currently runs
    pub running_image: &'a str,
    /// In-pod operations
    pub agent: &'a dyn AgentPod,
}

/// The shared agent ConfigMap, threaded through every tick of a reconcile
#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    /// ConfigMap identity
    pub map: ConfigMapRef,
    /// Current data, kept in step with every write
    pub entries: BTreeMap<String, String>,
}

impl AgentConfig {
    pub fn new(map: ConfigMapRef, entries: BTreeMap<String, String>) -> Self {
        Self { map, entries }
    }

    async fn write(&mut self, store: &dyn AgentConfigStore, update: ConfigUpdate) -> Result<(), Error> {
        store.update(&self.map, &update).await?;
        update.apply(&mut self.entries);
        Ok(())
    }

    fn has_all(&self, pod_ip: &str) -> bool {
        std::iter::once(AgentFile::Params)
            .chain(AgentFile::DERIVED)
            .all(|file| self.entries.contains_key(&file.key(pod_ip)))
    }
}

/// What a tick did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RolloutStep {
    /// Pod runs an outdated image
    Upgrading,
    /// Baseline written, waiting for it to reach the pod
    BaselinePushed,
    /// Agent shell not reachable yet
    AwaitingAgent,
    /// Baseline written but not yet visible in the pod
    AwaitingBaseline,
    /// Pod deleted to rebind the data-plane interface
    InterfaceRebind,
    /// Full file set written
    DerivedWritten,
    /// Full file set written but not yet visible in the pod
    AwaitingConfigs,
    /// Pushed files for this pod are gone; rollout restarted
    ConfigsMissing,
    /// Configuration reloaded and node marked Ready
    Reloaded,
    /// Nothing to do
    Converged,
}

/// Result of one tick
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    /// Updated status of the node
    pub status: AgentStatus,
    /// The node needs another tick soon
    pub again: bool,
    /// What happened
    pub step: RolloutStep,
}

impl TickOutcome {
    fn again(status: AgentStatus, step: RolloutStep) -> Self {
        Self {
            status,
            again: true,
            step,
        }
    }
}

/// Drives the rollout state machine
#[derive(Clone)]
pub struct RolloutEngine {
    renderer: Arc<dyn TemplateRenderer>,
    store: Arc<dyn AgentConfigStore>,
}

impl RolloutEngine {
    pub fn new(renderer: Arc<dyn TemplateRenderer>, store: Arc<dyn AgentConfigStore>) -> Self {
        Self { renderer, store }
    }

    /// Advance the rollout on one node by one step.
    ///
    /// Collaborator failures are returned as errors; a node that simply is
    /// not there yet reports `again`.
    #[instrument(skip_all, fields(node = %target.node, pod = %target.pod.name))]
    pub async fn tick(
        &self,
        target: &NodeTarget<'_>,
        desired: &DesiredAgent,
        current: &AgentStatus,
        config: &mut AgentConfig,
    ) -> Result<TickOutcome, Error> {
        let mut status = current.clone();
        let ip = target.pod_ip;

        if target.running_image != desired.image {
            if status.status != AgentPhase::Upgrading {
                info!(
                    running = %target.running_image,
                    desired = %desired.image,
                    "agent image outdated, waiting for pod replacement"
                );
            }
            status.status = AgentPhase::Upgrading;
            status.encrypted_params.clear();
            return Ok(TickOutcome::again(status, RolloutStep::Upgrading));
        }

        let hash = content_hash(&desired.baseline);
        let mut wrote_derived = false;

        if status.encrypted_params != hash {
            let params_key = AgentFile::Params.key(ip);
            let pushed = config.entries.get(&params_key) == Some(&desired.baseline);

            // A baseline that changed while waiting is pushed again.
            if status.status != AgentPhase::Updating || !pushed {
                config
                    .write(
                        self.store.as_ref(),
                        ConfigUpdate::default().set(params_key, desired.baseline.clone()),
                    )
                    .await?;
                info!(
                    current = %status.encrypted_params,
                    new = %hash,
                    "baseline parameters pushed"
                );
                status.status = AgentPhase::Updating;
                return Ok(TickOutcome::again(status, RolloutStep::BaselinePushed));
            }

            if !target.agent.is_agent_running().await {
                debug!("agent not running yet");
                return Ok(TickOutcome::again(status, RolloutStep::AwaitingAgent));
            }

            let path = AgentFile::Params.mount_path(ip);
            if !target.agent.file_matches(&path, &desired.baseline).await? {
                debug!("baseline parameters not visible in pod yet");
                return Ok(TickOutcome::again(status, RolloutStep::AwaitingBaseline));
            }

            if target.agent.needs_interface_rebind().await? {
                let update = AgentFile::DERIVED
                    .iter()
                    .fold(ConfigUpdate::default(), |u, file| u.remove(file.key(ip)));
                config.write(self.store.as_ref(), update).await?;
                self.store.delete_pod(target.pod).await?;
                info!("data-plane interface changed, agent pod replaced");
                status.status = AgentPhase::Starting;
                status.encrypted_params.clear();
                return Ok(TickOutcome::again(status, RolloutStep::InterfaceRebind));
            }

            let derived = target.agent.derived_parameters().await?;
            let files = desired.render_files(self.renderer.as_ref(), &derived, ip)?;
            let update = files
                .into_iter()
                .fold(ConfigUpdate::default(), |u, (file, content)| {
                    u.set(file.key(ip), content)
                });
            config.write(self.store.as_ref(), update).await?;
            status.encrypted_params = hash;
            wrote_derived = true;
            info!(hash = %status.encrypted_params, "agent configuration written");
        }

        if !config.has_all(ip) {
            info!("agent configuration missing from store, restarting rollout");
            status.status = AgentPhase::Starting;
            status.encrypted_params.clear();
            return Ok(TickOutcome::again(status, RolloutStep::ConfigsMissing));
        }

        if status.status == AgentPhase::Ready {
            return Ok(TickOutcome {
                status,
                again: false,
                step: RolloutStep::Converged,
            });
        }

        for file in AgentFile::VERIFIED {
            let content = config
                .entries
                .get(&file.key(ip))
                .map(String::as_str)
                .unwrap_or_default();
            if !target.agent.file_matches(&file.mount_path(ip), content).await? {
                debug!(file = file.file_name(), "configuration not visible in pod yet");
                let step = if wrote_derived {
                    RolloutStep::DerivedWritten
                } else {
                    RolloutStep::AwaitingConfigs
                };
                return Ok(TickOutcome::again(status, step));
            }
        }

        target.agent.reload_nodemanager().await?;
        target.agent.reload_agent().await?;

        status.control_nodes = desired.cluster.control_nodes.clone();
        status.config_nodes = desired.cluster.config_nodes.clone();
        status.analytics_nodes = desired.cluster.analytics_nodes.clone();
        let again = status.status != AgentPhase::Ready;
        status.status = AgentPhase::Ready;
        info!("agent configuration reloaded");

        Ok(TickOutcome {
            status,
            again,
            step: RolloutStep::Reloaded,
        })
    }
}
