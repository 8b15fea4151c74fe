//! Controller runner - builds the controller futures of the operator
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! drives to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use fabric_common::crd::{Manager, Vrouter};
use fabric_upgrade::{KubeZiuStore, UpgradeGate};
use fabric_vrouter::controller::{VROUTER_LABEL, VrouterContext};
use fabric_vrouter::{error_policy, reconcile};

use crate::config::OperatorConfig;

/// Suffix of the DaemonSet name running a Vrouter's agent pods
const DAEMONSET_SUFFIX: &str = "-vrouter-daemonset";

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the Vrouter controller future
///
/// Besides the Vrouter objects themselves the controller reacts to its agent
/// pods, the agent DaemonSet, the agent ConfigMap, node inventory changes and
/// Manager changes (a staged upgrade finishing releases the fleet).
pub fn build_vrouter_controllers(client: Client, config: &OperatorConfig) -> Vec<ControllerFuture> {
    let ns = config.namespace.clone();
    let gate = UpgradeGate::new(Arc::new(KubeZiuStore::new(
        client.clone(),
        &ns,
        &config.manager_name,
    )));
    let ctx = Arc::new(VrouterContext::from_client(
        client.clone(),
        gate,
        config.requeue,
        config.ziu_requeue,
    ));
    let watcher = || WatcherConfig::default().timeout(config.watch_timeout_secs);

    let vrouters: Api<Vrouter> = Api::namespaced(client.clone(), &ns);
    let pods: Api<Pod> = Api::namespaced(client.clone(), &ns);
    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), &ns);
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &ns);
    let managers: Api<Manager> = Api::namespaced(client.clone(), &ns);
    let nodes: Api<Node> = Api::all(client);

    let controller = Controller::new(vrouters, watcher());
    let for_nodes = controller.store();
    let for_managers = controller.store();

    tracing::info!(namespace = %ns, "- Vrouter controller");

    let vrouter_ctrl = controller
        .owns(config_maps, watcher())
        .watches(pods, watcher().labels(VROUTER_LABEL), |pod| {
            let namespace = pod.namespace()?;
            let vrouter = pod.labels().get(VROUTER_LABEL)?;
            Some(ObjectRef::<Vrouter>::new(vrouter).within(&namespace))
        })
        .watches(daemonsets, watcher(), |ds| {
            let namespace = ds.namespace()?;
            let name = ds.name_any();
            let vrouter = name.strip_suffix(DAEMONSET_SUFFIX)?;
            Some(ObjectRef::<Vrouter>::new(vrouter).within(&namespace))
        })
        .watches(nodes, watcher(), move |_| all_vrouters(&for_nodes))
        .watches(managers, watcher(), move |_| all_vrouters(&for_managers))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Vrouter"));

    vec![Box::pin(vrouter_ctrl)]
}

/// Every Vrouter the controller currently knows
fn all_vrouters(store: &Store<Vrouter>) -> Vec<ObjectRef<Vrouter>> {
    store
        .state()
        .iter()
        .map(|vrouter| ObjectRef::from_obj(vrouter.as_ref()))
        .collect()
}

/// Log the result of each reconciliation
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(controller, ?action, "Reconciliation completed"),
            Err(e) => tracing::error!(controller, error = ?e, "Reconciliation error"),
        }
        std::future::ready(())
    }
}
