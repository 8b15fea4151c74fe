//! Vrouter controller
//!
//! Reconciles the forwarding agent fleet. Each reconcile asks the staged
//! upgrade gate for admission, projects the current membership of the
//! services the agent depends on, and then runs one rollout tick for every
//! node the fleet is scheduled to. Nodes are processed one after another;
//! a node that fails only marks itself for another pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kube::api::{Api, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use fabric_common::crd::{AgentPhase, AgentStatus, NodeInfo, Vrouter, VrouterStatus};
use fabric_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use fabric_common::exec::{KubeRemoteExec, PodRef, RemoteExec};
use fabric_common::kube_utils::{
    first_container_image, is_control_plane_node, is_pod_running, pod_hostname, pod_ip,
    pod_node_name,
};
use fabric_common::retry::{retry_with_backoff, RetryConfig};
use fabric_common::template::{MiniJinjaRenderer, TemplateRenderer};
use fabric_common::{
    Error, FABRIC_API_GROUP, FABRIC_API_VERSION, FIELD_MANAGER, REQUEUE_CONVERGED, REQUEUE_ERROR,
};
use fabric_upgrade::{ServiceKind, UpgradeGate};

use crate::cluster_nodes::project;
use crate::configs::{config_map_name, ConfigUpdate};
use crate::error::ReconcileError;
use crate::params::DesiredAgent;
use crate::pod::VrouterPod;
use crate::rollout::{AgentConfig, NodeTarget, RolloutEngine, RolloutStep};
use crate::store::{AgentConfigStore, ConfigMapRef, KubeAgentConfigStore};

/// Label carrying the owning Vrouter name on agent pods
pub const VROUTER_LABEL: &str = "vrouter";

/// Instance name of the Config service
pub const CONFIG_INSTANCE: &str = "config1";

/// Instance name of the Analytics service
pub const ANALYTICS_INSTANCE: &str = "analytics1";

/// Name of the DaemonSet running the agent pods of a Vrouter
pub fn daemonset_name(vrouter: &str) -> String {
    format!("{vrouter}-vrouter-daemonset")
}

// =============================================================================
// Kubernetes client abstraction
// =============================================================================

/// Cluster reads and status writes of the Vrouter controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VrouterKubeClient: Send + Sync {
    /// List every node of the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// List the agent pods of a Vrouter
    async fn list_agent_pods(&self, namespace: &str, vrouter: &str) -> Result<Vec<Pod>, Error>;

    /// Members recorded in `status.nodes` of a service object; empty when
    /// the object does not exist
    async fn service_nodes(
        &self,
        namespace: &str,
        kind: ServiceKind,
        name: &str,
    ) -> Result<BTreeMap<String, NodeInfo>, Error>;

    /// Data of the agent ConfigMap, created empty when missing
    async fn agent_config_entries(
        &self,
        vrouter: &Vrouter,
    ) -> Result<BTreeMap<String, String>, Error>;

    /// Whether every scheduled agent pod is ready; `None` without a DaemonSet
    async fn daemonset_ready(&self, namespace: &str, name: &str) -> Result<Option<bool>, Error>;

    /// Patch the Vrouter status. `removed_nodes` are dropped from
    /// `status.nodes`.
    async fn patch_vrouter_status(
        &self,
        name: &str,
        namespace: &str,
        status: &VrouterStatus,
        removed_nodes: &[String],
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct VrouterKubeClientImpl {
    client: Client,
}

impl VrouterKubeClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn service_resource(kind: ServiceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(FABRIC_API_GROUP, FABRIC_API_VERSION, kind.as_str());
    let plural = match kind {
        ServiceKind::Analytics => kind.workload_fragment(),
        _ => format!("{}s", kind.workload_fragment()),
    };
    ApiResource::from_gvk_with_plural(&gvk, &plural)
}

#[async_trait]
impl VrouterKubeClient for VrouterKubeClientImpl {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_agent_pods(&self, namespace: &str, vrouter: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{VROUTER_LABEL}={vrouter}"));
        Ok(api.list(&params).await?.items)
    }

    async fn service_nodes(
        &self,
        namespace: &str,
        kind: ServiceKind,
        name: &str,
    ) -> Result<BTreeMap<String, NodeInfo>, Error> {
        let ar = service_resource(kind);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let Some(obj) = api.get_opt(name).await? else {
            debug!(%kind, name, "service object not found");
            return Ok(BTreeMap::new());
        };
        match obj.data.get("status").and_then(|s| s.get("nodes")) {
            Some(nodes) => serde_json::from_value(nodes.clone())
                .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string())),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn agent_config_entries(
        &self,
        vrouter: &Vrouter,
    ) -> Result<BTreeMap<String, String>, Error> {
        let namespace = vrouter.namespace().unwrap_or_default();
        let name = config_map_name(vrouter);
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        if let Some(cm) = api.get_opt(&name).await? {
            return Ok(cm.data.unwrap_or_default());
        }

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                owner_references: vrouter.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => {
                info!(configmap = %name, "agent ConfigMap created");
                Ok(BTreeMap::new())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Ok(api.get(&name).await?.data.unwrap_or_default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn daemonset_ready(&self, namespace: &str, name: &str) -> Result<Option<bool>, Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let Some(ds) = api.get_opt(name).await? else {
            return Ok(None);
        };
        Ok(Some(ds.status.is_some_and(|s| {
            s.desired_number_scheduled > 0 && s.number_ready == s.desired_number_scheduled
        })))
    }

    async fn patch_vrouter_status(
        &self,
        name: &str,
        namespace: &str,
        status: &VrouterStatus,
        removed_nodes: &[String],
    ) -> Result<(), Error> {
        let api: Api<Vrouter> = Api::namespaced(self.client.clone(), namespace);
        let mut status_json = serde_json::to_value(status)
            .map_err(|e| Error::serialization_for_kind("Vrouter", e.to_string()))?;
        if !removed_nodes.is_empty() {
            let nodes = status_json
                .as_object_mut()
                .map(|s| s.entry("nodes").or_insert_with(|| serde_json::json!({})));
            if let Some(serde_json::Value::Object(nodes)) = nodes {
                for node in removed_nodes {
                    nodes.insert(node.clone(), serde_json::Value::Null);
                }
            }
        }

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status_json })),
        )
        .await?;
        Ok(())
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Shared state of the Vrouter controller
pub struct VrouterContext {
    /// Cluster reads and status writes
    pub kube: Arc<dyn VrouterKubeClient>,
    /// Agent ConfigMap writes and pod deletion
    pub store: Arc<dyn AgentConfigStore>,
    /// Command execution in agent pods
    pub exec: Arc<dyn RemoteExec>,
    /// Renderer for the agent configuration files
    pub renderer: Arc<dyn TemplateRenderer>,
    /// Staged upgrade admission
    pub gate: UpgradeGate,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Retry policy for status writes
    pub retry: RetryConfig,
    /// Requeue delay while any node still has work to do
    pub requeue: Duration,
    /// Requeue delay while blocked by the staged upgrade gate
    pub ziu_requeue: Duration,
}

impl VrouterContext {
    /// Create a context from a Kubernetes client
    pub fn from_client(
        client: Client,
        gate: UpgradeGate,
        requeue: Duration,
        ziu_requeue: Duration,
    ) -> Self {
        Self {
            kube: Arc::new(VrouterKubeClientImpl::new(client.clone())),
            store: Arc::new(KubeAgentConfigStore::new(client.clone())),
            exec: Arc::new(KubeRemoteExec::new(client.clone())),
            renderer: Arc::new(MiniJinjaRenderer::new()),
            gate,
            events: Arc::new(KubeEventPublisher::new(client, "fabric-vrouter-controller")),
            retry: RetryConfig::default(),
            requeue,
            ziu_requeue,
        }
    }

    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn VrouterKubeClient>,
        store: Arc<dyn AgentConfigStore>,
        exec: Arc<dyn RemoteExec>,
        gate: UpgradeGate,
    ) -> Self {
        Self {
            kube,
            store,
            exec,
            renderer: Arc::new(MiniJinjaRenderer::new()),
            gate,
            events: Arc::new(fabric_common::events::NoopEventPublisher),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
            requeue: fabric_common::REQUEUE_PROGRESS,
            ziu_requeue: fabric_common::REQUEUE_UPGRADE_GATED,
        }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile a Vrouter
#[instrument(skip(vrouter, ctx), fields(vrouter = %vrouter.name_any()))]
pub async fn reconcile(
    vrouter: Arc<Vrouter>,
    ctx: Arc<VrouterContext>,
) -> Result<Action, ReconcileError> {
    let name = vrouter.name_any();
    let namespace = vrouter
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;

    if vrouter.metadata.deletion_timestamp.is_some() {
        debug!("vrouter is being deleted");
        return Ok(Action::await_change());
    }

    if !ctx.gate.can_reconcile(ServiceKind::Vrouter.as_str()).await? {
        info!("reconcile blocked by staged upgrade");
        ctx.events
            .publish(
                &vrouter.object_ref(&()),
                EventType::Normal,
                reasons::UPGRADE_GATED,
                actions::RECONCILE,
                Some("Agent configuration frozen while a staged upgrade runs".to_string()),
            )
            .await;
        return Ok(Action::requeue(ctx.ziu_requeue));
    }

    vrouter.spec.validate()?;
    let image = vrouter.spec.agent_image().unwrap_or_default();
    let network = vrouter.spec.data_network()?;

    let control_instance = &vrouter.spec.service_configuration.control_instance;
    let control = ctx
        .kube
        .service_nodes(&namespace, ServiceKind::Control, control_instance)
        .await?;
    let config = ctx
        .kube
        .service_nodes(&namespace, ServiceKind::Config, CONFIG_INSTANCE)
        .await?;
    let analytics = ctx
        .kube
        .service_nodes(&namespace, ServiceKind::Analytics, ANALYTICS_INSTANCE)
        .await?;
    let cluster = project(&control, &config, &analytics, network.as_ref());
    debug!(?cluster, "cluster membership");

    let mut agent_config = AgentConfig::new(
        ConfigMapRef::new(config_map_name(&vrouter), &namespace),
        ctx.kube.agent_config_entries(&vrouter).await?,
    );

    let all_nodes = ctx.kube.list_nodes().await?;
    let selector = &vrouter.spec.common_configuration.node_selector;
    let pods = ctx.kube.list_agent_pods(&namespace, &name).await?;
    let prior = vrouter.status.clone().unwrap_or_default();
    let engine = RolloutEngine::new(ctx.renderer.clone(), ctx.store.clone());

    let mut agents = Vec::new();
    let mut nodes = BTreeMap::new();
    let mut again = false;

    for node in all_nodes.iter().filter(|n| selects(selector, n)) {
        let node_name = node.name_any();
        let current = prior.agent(&node_name).cloned();

        let Some((pod, ip)) = pods
            .iter()
            .filter(|p| pod_node_name(p) == Some(node_name.as_str()))
            .filter(|p| is_pod_running(p))
            .find_map(|p| pod_ip(p).map(|ip| (p, ip)))
        else {
            debug!(node = %node_name, "agent pod not running yet");
            again = true;
            agents.extend(current);
            continue;
        };

        let hostname = pod_hostname(pod);
        nodes.insert(
            pod.name_any(),
            NodeInfo {
                ip: ip.to_string(),
                hostname: hostname.clone(),
            },
        );

        let current = current.unwrap_or_else(|| AgentStatus::new(&node_name));
        let pod_ref = PodRef::from_pod(pod);
        let agent = VrouterPod::new(ctx.exec.clone(), pod_ref.clone());
        let target = NodeTarget {
            node: &node_name,
            pod: &pod_ref,
            pod_ip: ip,
            running_image: first_container_image(pod).unwrap_or_default(),
            agent: &agent,
        };

        let outcome = match DesiredAgent::resolve(
            ctx.renderer.as_ref(),
            &vrouter.spec,
            image,
            cluster.clone(),
            &hostname,
        ) {
            Ok(desired) => engine.tick(&target, &desired, &current, &mut agent_config).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                again |= outcome.again;
                publish_step(&ctx, &vrouter, &node_name, &current, outcome.step).await;
                agents.push(outcome.status);
            }
            Err(e) => {
                warn!(node = %node_name, error = %e, "agent rollout failed");
                again = true;
                agents.push(current);
            }
        }
    }

    if let Err(e) = prune_stale_configs(&ctx, &pods, &mut agent_config).await {
        warn!(error = %e, "failed to remove configuration of departed pods");
        again = true;
    }

    let pruned: Vec<&str> = prior
        .agents
        .iter()
        .map(|a| a.name.as_str())
        .filter(|n| !agents.iter().any(|a| a.name == *n))
        .collect();
    if !pruned.is_empty() {
        info!(?pruned, "dropping status of nodes no longer in the fleet");
    }

    let active_on_controllers = !agents.is_empty()
        && all_nodes
            .iter()
            .filter(|n| is_control_plane_node(n))
            .all(|n| {
                let node_name = n.name_any();
                agents
                    .iter()
                    .any(|a| a.name == node_name && a.status.is_serving())
            });

    let active = !again
        && ctx
            .kube
            .daemonset_ready(&namespace, &daemonset_name(&name))
            .await?
            .unwrap_or(true);

    let status = VrouterStatus {
        nodes,
        active: Some(active),
        active_on_controllers: Some(active_on_controllers),
        agents,
    };

    if status != prior {
        let removed: Vec<String> = prior
            .nodes
            .keys()
            .filter(|k| !status.nodes.contains_key(*k))
            .cloned()
            .collect();
        retry_with_backoff(
            &ctx.retry,
            "patch_vrouter_status",
            Error::is_retryable,
            || ctx.kube.patch_vrouter_status(&name, &namespace, &status, &removed),
        )
        .await?;
    }

    if again || !active {
        debug!(again, active, "rollout in progress");
        Ok(Action::requeue(ctx.requeue))
    } else {
        Ok(Action::requeue(REQUEUE_CONVERGED))
    }
}

/// Remove ConfigMap keys of pod IPs no agent pod holds any more. Skipped
/// while any pod is still waiting for an address.
async fn prune_stale_configs(
    ctx: &VrouterContext,
    pods: &[Pod],
    agent_config: &mut AgentConfig,
) -> Result<(), Error> {
    let live: Option<BTreeSet<&str>> = pods.iter().map(pod_ip).collect();
    let Some(live) = live else {
        debug!("agent pod without address, keeping configuration keys");
        return Ok(());
    };

    let update = ConfigUpdate::prune_except(&agent_config.entries, &live);
    if update.is_empty() {
        return Ok(());
    }
    info!(keys = update.remove.len(), "removing configuration of departed pods");
    ctx.store.update(&agent_config.map, &update).await?;
    update.apply(&mut agent_config.entries);
    Ok(())
}

/// Whether a node matches a node selector
fn selects(selector: &BTreeMap<String, String>, node: &Node) -> bool {
    let labels = node.labels();
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|l| l == v))
}

async fn publish_step(
    ctx: &VrouterContext,
    vrouter: &Vrouter,
    node: &str,
    previous: &AgentStatus,
    step: RolloutStep,
) {
    let (type_, reason, action, note) = match step {
        RolloutStep::Reloaded => (
            EventType::Normal,
            reasons::AGENT_READY,
            actions::RELOAD,
            format!("Agent on {node} reloaded its configuration"),
        ),
        RolloutStep::InterfaceRebind => (
            EventType::Warning,
            reasons::INTERFACE_REBIND,
            actions::REPLACE_POD,
            format!("Agent pod on {node} replaced to rebind the data-plane interface"),
        ),
        RolloutStep::Upgrading if previous.status != AgentPhase::Upgrading => (
            EventType::Normal,
            reasons::AGENT_UPGRADING,
            actions::RECONCILE,
            format!("Agent pod on {node} runs an outdated image"),
        ),
        _ => return,
    };
    ctx.events
        .publish(&vrouter.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// Error policy for the Vrouter controller
///
/// Retryable errors requeue after a fixed delay; configuration errors wait
/// for a spec change.
pub fn error_policy(
    vrouter: Arc<Vrouter>,
    error: &ReconcileError,
    _ctx: Arc<VrouterContext>,
) -> Action {
    error!(
        ?error,
        vrouter = %vrouter.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(REQUEUE_ERROR)
    } else {
        Action::await_change()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use fabric_common::crd::{
        Container, Manager, ManagerSpec, ManagerStatus, VrouterConfiguration, VrouterSpec,
        ZiuStage, AGENT_CONTAINER,
    };
    use fabric_common::{REQUEUE_PROGRESS, REQUEUE_UPGRADE_GATED};
    use fabric_common::exec::ExecOutput;
    use fabric_common::kube_utils::{content_hash, CONTROL_PLANE_ROLE_LABEL};
    use fabric_upgrade::ZiuStore;
    use k8s_openapi::api::core::v1::{Container as PodContainer, PodSpec, PodStatus};

    use crate::configs::{AgentFile, ConfigUpdate};
    use crate::store::MockAgentConfigStore;

    const IMAGE: &str = "registry/agent:R2";

    // =========================================================================
    // Fakes
    // =========================================================================

    struct FakeZiuStore {
        manager: Option<Manager>,
    }

    #[async_trait]
    impl ZiuStore for FakeZiuStore {
        async fn get_manager(&self) -> Result<Option<Manager>, Error> {
            Ok(self.manager.clone())
        }

        async fn set_stage(&self, _: ZiuStage, _: Option<Vec<String>>) -> Result<(), Error> {
            Ok(())
        }

        async fn workload_image(&self, _: &str) -> Result<Option<String>, Error> {
            Ok(None)
        }
    }

    fn gate(stage: Option<i32>) -> UpgradeGate {
        let manager = stage.map(|s| {
            let mut m = Manager::new("cluster1", ManagerSpec::default());
            m.status = Some(ManagerStatus {
                ziu_state: ZiuStage::new(s),
                ziu_kinds: Vec::new(),
            });
            m
        });
        UpgradeGate::new(Arc::new(FakeZiuStore { manager }))
    }

    /// Exec that must never be reached
    struct NoExec;

    #[async_trait]
    impl RemoteExec for NoExec {
        async fn exec(&self, pod: &PodRef, container: &str, _: &[String]) -> Result<ExecOutput, Error> {
            panic!("unexpected exec in {}/{container}", pod.name);
        }
    }

    /// Exec whose commands all fail
    struct BrokenExec;

    #[async_trait]
    impl RemoteExec for BrokenExec {
        async fn exec(&self, pod: &PodRef, container: &str, _: &[String]) -> Result<ExecOutput, Error> {
            Err(Error::exec(&pod.name, container, "connection refused"))
        }
    }

    fn node(name: &str, control_plane: bool) -> Node {
        let mut labels = BTreeMap::new();
        if control_plane {
            labels.insert(CONTROL_PLANE_ROLE_LABEL.to_string(), String::new());
        }
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod(node: &str, ip: Option<&str>, image: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("vrouter1-vrouter-daemonset-{node}")),
                namespace: Some("fabric".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                containers: vec![PodContainer {
                    name: AGENT_CONTAINER.to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ip: ip.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    fn vrouter(agents: Vec<AgentStatus>) -> Vrouter {
        let mut vr = Vrouter::new(
            "vrouter1",
            VrouterSpec {
                service_configuration: VrouterConfiguration {
                    containers: vec![Container {
                        name: AGENT_CONTAINER.to_string(),
                        image: IMAGE.to_string(),
                        command: None,
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        vr.metadata.namespace = Some("fabric".to_string());
        vr.metadata.uid = Some("uid-1".to_string());
        vr.status = Some(VrouterStatus {
            agents,
            ..Default::default()
        });
        vr
    }

    fn agent(node: &str, phase: AgentPhase, hash: &str) -> AgentStatus {
        AgentStatus {
            name: node.to_string(),
            status: phase,
            encrypted_params: hash.to_string(),
            ..Default::default()
        }
    }

    type Patched = Arc<Mutex<Vec<VrouterStatus>>>;

    fn mock_kube(
        nodes: Vec<Node>,
        pods: Vec<Pod>,
        entries: BTreeMap<String, String>,
    ) -> (MockVrouterKubeClient, Patched) {
        let (mut kube, patched) = mock_reads(nodes, pods, entries);
        let sink = patched.clone();
        kube.expect_patch_vrouter_status()
            .returning(move |_, _, status, _| {
                sink.lock().unwrap().push(status.clone());
                Ok(())
            });
        (kube, patched)
    }

    /// Mock serving every read; status writes are left to the caller
    fn mock_reads(
        nodes: Vec<Node>,
        pods: Vec<Pod>,
        entries: BTreeMap<String, String>,
    ) -> (MockVrouterKubeClient, Patched) {
        let patched: Patched = Arc::default();
        let mut kube = MockVrouterKubeClient::new();
        kube.expect_list_nodes()
            .returning(move || Ok(nodes.clone()));
        kube.expect_list_agent_pods()
            .returning(move |_, _| Ok(pods.clone()));
        kube.expect_service_nodes()
            .returning(|_, _, _| Ok(BTreeMap::new()));
        kube.expect_agent_config_entries()
            .returning(move |_| Ok(entries.clone()));
        kube.expect_daemonset_ready()
            .returning(|_, _| Ok(Some(true)));
        (kube, patched)
    }

    fn context(kube: MockVrouterKubeClient, exec: Arc<dyn RemoteExec>, gate: UpgradeGate) -> Arc<VrouterContext> {
        let mut store = MockAgentConfigStore::new();
        store.expect_update().returning(|_, _| Ok(()));
        store.expect_delete_pod().returning(|_| Ok(()));
        Arc::new(VrouterContext::for_testing(
            Arc::new(kube),
            Arc::new(store),
            exec,
            gate,
        ))
    }

    /// ConfigMap data and status of a node whose rollout already finished
    fn converged(node: &str, ip: &str) -> (BTreeMap<String, String>, AgentStatus) {
        let desired = DesiredAgent::resolve(
            &MiniJinjaRenderer::new(),
            &vrouter(vec![]).spec,
            IMAGE,
            Default::default(),
            node,
        )
        .unwrap();
        let mut entries = BTreeMap::new();
        let mut update = ConfigUpdate::default().set(AgentFile::Params.key(ip), desired.baseline.clone());
        for file in AgentFile::DERIVED {
            update = update.set(file.key(ip), "x");
        }
        update.apply(&mut entries);
        (entries, agent(node, AgentPhase::Ready, &content_hash(&desired.baseline)))
    }

    // =========================================================================
    // Gate
    // =========================================================================

    /// Story: while a staged upgrade runs the agent fleet is frozen, and the
    /// controller touches nothing but the gate.
    #[tokio::test]
    async fn story_staged_upgrade_freezes_agents() {
        let kube = MockVrouterKubeClient::new();
        let ctx = context(kube, Arc::new(NoExec), gate(Some(2)));

        let action = reconcile(Arc::new(vrouter(vec![])), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_UPGRADE_GATED));
    }

    #[tokio::test]
    async fn test_missing_namespace_is_permanent() {
        let mut vr = vrouter(vec![]);
        vr.metadata.namespace = None;
        let ctx = context(MockVrouterKubeClient::new(), Arc::new(NoExec), gate(None));

        let err = reconcile(Arc::new(vr), ctx.clone()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::MissingNamespace));
        assert_eq!(
            error_policy(Arc::new(vrouter(vec![])), &err, ctx),
            Action::await_change()
        );
    }

    #[tokio::test]
    async fn test_invalid_spec_waits_for_change() {
        let mut vr = vrouter(vec![]);
        vr.spec.service_configuration.containers.clear();
        let ctx = context(MockVrouterKubeClient::new(), Arc::new(NoExec), gate(None));

        let err = reconcile(Arc::new(vr), ctx.clone()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    // =========================================================================
    // Fleet
    // =========================================================================

    /// Story: nodes whose pod is missing, pending or without an address are
    /// retried soon and keep whatever status they had.
    #[tokio::test]
    async fn story_unready_pods_are_retried() {
        let (kube, patched) = mock_kube(
            vec![node("w1", false), node("w2", false), node("w3", false)],
            vec![
                pod("w2", Some("10.0.0.2"), IMAGE, "Pending"),
                pod("w3", None, IMAGE, "Running"),
            ],
            BTreeMap::new(),
        );
        let ctx = context(kube, Arc::new(NoExec), gate(None));
        let prior = agent("w1", AgentPhase::Ready, "abc");

        let action = reconcile(Arc::new(vrouter(vec![prior.clone()])), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_PROGRESS));

        let status = patched.lock().unwrap().pop().unwrap();
        assert_eq!(status.agents, vec![prior]);
        assert_eq!(status.active, Some(false));
        assert!(status.nodes.is_empty());
    }

    /// Story: a pod still running the previous image is marked Upgrading
    /// without any exec, and its node keeps the controllers serving.
    #[tokio::test]
    async fn story_outdated_pod_marks_upgrading() {
        let (kube, patched) = mock_kube(
            vec![node("m1", true)],
            vec![pod("m1", Some("10.0.0.1"), "registry/agent:R1", "Running")],
            BTreeMap::new(),
        );
        let ctx = context(kube, Arc::new(NoExec), gate(None));

        reconcile(Arc::new(vrouter(vec![agent("m1", AgentPhase::Ready, "abc")])), ctx)
            .await
            .unwrap();

        let status = patched.lock().unwrap().pop().unwrap();
        assert_eq!(status.agents[0].status, AgentPhase::Upgrading);
        assert_eq!(status.agents[0].encrypted_params, "");
        assert_eq!(status.active_on_controllers, Some(true));
        assert_eq!(status.nodes["vrouter1-vrouter-daemonset-m1"].ip, "10.0.0.1");
    }

    /// Story: a converged fleet is left alone: no exec, no writes, a long
    /// requeue and an active status.
    #[tokio::test]
    async fn story_converged_fleet_is_quiet() {
        let (entries, ready) = converged("m1", "10.0.0.1");
        let (kube, patched) = mock_kube(
            vec![node("m1", true)],
            vec![pod("m1", Some("10.0.0.1"), IMAGE, "Running")],
            entries,
        );
        let ctx = context(kube, Arc::new(NoExec), gate(None));

        let action = reconcile(Arc::new(vrouter(vec![ready.clone()])), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_CONVERGED));

        let status = patched.lock().unwrap().pop().unwrap();
        assert_eq!(status.agents, vec![ready]);
        assert_eq!(status.active, Some(true));
        assert_eq!(status.active_on_controllers, Some(true));
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_patched() {
        let (entries, ready) = converged("m1", "10.0.0.1");
        let (kube, patched) = mock_kube(
            vec![node("m1", true)],
            vec![pod("m1", Some("10.0.0.1"), IMAGE, "Running")],
            entries,
        );
        let ctx = context(kube, Arc::new(NoExec), gate(None));
        let mut vr = vrouter(vec![]);
        vr.status = Some(VrouterStatus {
            agents: vec![ready],
            nodes: BTreeMap::from([(
                "vrouter1-vrouter-daemonset-m1".to_string(),
                NodeInfo {
                    ip: "10.0.0.1".to_string(),
                    hostname: "m1".to_string(),
                },
            )]),
            active: Some(true),
            active_on_controllers: Some(true),
        });

        reconcile(Arc::new(vr), ctx).await.unwrap();
        assert!(patched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_agents_are_pruned() {
        let (kube, patched) = mock_kube(vec![node("w1", false)], vec![], BTreeMap::new());
        let ctx = context(kube, Arc::new(NoExec), gate(None));

        reconcile(
            Arc::new(vrouter(vec![agent("gone", AgentPhase::Ready, "abc")])),
            ctx,
        )
        .await
        .unwrap();

        let status = patched.lock().unwrap().pop().unwrap();
        assert!(status.agents.is_empty());
    }

    #[tokio::test]
    async fn test_node_selector_limits_fleet() {
        let mut labelled = node("w1", false);
        labelled
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("fabric/agent".to_string(), "true".to_string());
        let (kube, patched) = mock_kube(vec![labelled, node("w2", false)], vec![], BTreeMap::new());
        let ctx = context(kube, Arc::new(NoExec), gate(None));
        let mut vr = vrouter(vec![
            agent("w1", AgentPhase::Ready, "a"),
            agent("w2", AgentPhase::Ready, "b"),
        ]);
        vr.spec
            .common_configuration
            .node_selector
            .insert("fabric/agent".to_string(), "true".to_string());

        reconcile(Arc::new(vr), ctx).await.unwrap();
        let status = patched.lock().unwrap().pop().unwrap();
        assert_eq!(status.agents.len(), 1);
        assert_eq!(status.agents[0].name, "w1");
    }

    /// Story: one node failing does not stop the others; it is retried.
    #[tokio::test]
    async fn story_node_failure_is_isolated() {
        let (entries, ready) = converged("w2", "10.0.0.2");
        let (kube, patched) = mock_kube(
            vec![node("w1", false), node("w2", false)],
            vec![
                pod("w1", Some("10.0.0.1"), IMAGE, "Running"),
                pod("w2", Some("10.0.0.2"), IMAGE, "Running"),
            ],
            entries,
        );

        // w1 needs its baseline pushed; the store refuses.
        let mut store = MockAgentConfigStore::new();
        store
            .expect_update()
            .returning(|_, _| Err(Error::internal("etcd timeout")));
        let ctx = Arc::new(VrouterContext::for_testing(
            Arc::new(kube),
            Arc::new(store),
            Arc::new(BrokenExec),
            gate(None),
        ));

        let action = reconcile(Arc::new(vrouter(vec![ready.clone()])), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_PROGRESS));

        let status = patched.lock().unwrap().pop().unwrap();
        assert_eq!(status.agents, vec![AgentStatus::new("w1"), ready]);
        assert_eq!(status.active, Some(false));
    }

    /// Story: the agent on m1 came back on a new address after a rebind. The
    /// keys written for its old address are removed once, and only those.
    #[tokio::test]
    async fn story_departed_pod_configs_are_removed() {
        let (mut entries, ready) = converged("m1", "10.0.0.1");
        let (old, _) = converged("m1", "10.0.0.99");
        entries.extend(old);
        entries.insert("operator-notes".to_string(), "keep".to_string());
        let (kube, _) = mock_kube(
            vec![node("m1", true)],
            vec![pod("m1", Some("10.0.0.1"), IMAGE, "Running")],
            entries,
        );

        let written: Arc<Mutex<Vec<ConfigUpdate>>> = Arc::default();
        let sink = written.clone();
        let mut store = MockAgentConfigStore::new();
        store.expect_update().returning(move |_, update| {
            sink.lock().unwrap().push(update.clone());
            Ok(())
        });
        let ctx = Arc::new(VrouterContext::for_testing(
            Arc::new(kube),
            Arc::new(store),
            Arc::new(NoExec),
            gate(None),
        ));

        let action = reconcile(Arc::new(vrouter(vec![ready])), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_CONVERGED));

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].set.is_empty());
        assert_eq!(written[0].remove.len(), 7);
        assert!(written[0].remove.iter().all(|k| k.ends_with(".10.0.0.99")));
    }

    #[tokio::test]
    async fn test_configs_kept_while_a_pod_has_no_address() {
        let (mut entries, ready) = converged("m1", "10.0.0.1");
        let (old, _) = converged("m1", "10.0.0.99");
        entries.extend(old);
        let (kube, _) = mock_kube(
            vec![node("m1", true), node("w1", false)],
            vec![
                pod("m1", Some("10.0.0.1"), IMAGE, "Running"),
                pod("w1", None, IMAGE, "Pending"),
            ],
            entries,
        );
        let mut store = MockAgentConfigStore::new();
        store.expect_update().never();
        let ctx = Arc::new(VrouterContext::for_testing(
            Arc::new(kube),
            Arc::new(store),
            Arc::new(NoExec),
            gate(None),
        ));

        let action = reconcile(Arc::new(vrouter(vec![ready])), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_PROGRESS));
    }

    #[tokio::test]
    async fn test_status_write_failure_is_retried_then_returned() {
        let (entries, ready) = converged("m1", "10.0.0.1");
        let (mut kube, _) = mock_reads(
            vec![node("m1", true)],
            vec![pod("m1", Some("10.0.0.1"), IMAGE, "Running")],
            entries,
        );
        kube.expect_patch_vrouter_status()
            .times(3)
            .returning(|_, _, _, _| Err(Error::internal("conflict")));
        let ctx = context(kube, Arc::new(NoExec), gate(None));

        let err = reconcile(Arc::new(vrouter(vec![ready])), ctx.clone())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            error_policy(Arc::new(vrouter(vec![])), &err, ctx),
            Action::requeue(REQUEUE_ERROR)
        );
    }

    #[test]
    fn test_service_resource_plurals() {
        assert_eq!(service_resource(ServiceKind::Control).plural, "controls");
        assert_eq!(service_resource(ServiceKind::Config).plural, "configs");
        assert_eq!(service_resource(ServiceKind::Analytics).plural, "analytics");
        assert_eq!(service_resource(ServiceKind::Control).group, "fabric.dev");
    }

    #[test]
    fn test_selector_matching() {
        let mut n = node("w1", false);
        n.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("zone".to_string(), "a".to_string());
        assert!(selects(&BTreeMap::new(), &n));
        assert!(selects(&BTreeMap::from([("zone".to_string(), "a".to_string())]), &n));
        assert!(!selects(&BTreeMap::from([("zone".to_string(), "b".to_string())]), &n));
    }
}
