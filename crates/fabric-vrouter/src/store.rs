//! Writes the rollout engine makes to the cluster store

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use tracing::{debug, info};

use fabric_common::error::is_not_found;
use fabric_common::exec::PodRef;
use fabric_common::{Error, FIELD_MANAGER};

use crate::configs::ConfigUpdate;

/// Identity of the shared agent ConfigMap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigMapRef {
    pub name: String,
    pub namespace: String,
}

impl ConfigMapRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Mutations of agent configuration and pods
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentConfigStore: Send + Sync {
    /// Apply a batch of key changes to the agent ConfigMap
    async fn update(&self, map: &ConfigMapRef, update: &ConfigUpdate) -> Result<(), Error>;

    /// Delete a pod so its controller recreates it. A pod that is already
    /// gone counts as deleted.
    async fn delete_pod(&self, pod: &PodRef) -> Result<(), Error>;
}

/// [`AgentConfigStore`] backed by the Kubernetes API
pub struct KubeAgentConfigStore {
    client: Client,
}

impl KubeAgentConfigStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentConfigStore for KubeAgentConfigStore {
    async fn update(&self, map: &ConfigMapRef, update: &ConfigUpdate) -> Result<(), Error> {
        if update.is_empty() {
            return Ok(());
        }
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &map.namespace);
        debug!(
            configmap = %map.name,
            set = update.set.len(),
            removed = update.remove.len(),
            "patching agent configuration"
        );
        api.patch(
            &map.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&update.to_patch()),
        )
        .await?;
        Ok(())
    }

    async fn delete_pod(&self, pod: &PodRef) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        match api.delete(&pod.name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(pod = %pod.name, "agent pod deleted");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
