//! Cluster store access for the upgrade gate

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use fabric_common::crd::{Manager, ZiuStage};
use fabric_common::{Error, FIELD_MANAGER};

/// Reads and writes the state the upgrade gate depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ZiuStore: Send + Sync {
    /// The platform manager, if one exists
    async fn get_manager(&self) -> Result<Option<Manager>, Error>;

    /// Persist a new stage; `kinds` replaces the recorded sequence when given
    async fn set_stage(&self, stage: ZiuStage, kinds: Option<Vec<String>>) -> Result<(), Error>;

    /// Image of the first container of a deployed workload, if it exists
    async fn workload_image(&self, name: &str) -> Result<Option<String>, Error>;
}

/// [`ZiuStore`] backed by the Kubernetes API
pub struct KubeZiuStore {
    client: Client,
    namespace: String,
    manager_name: String,
}

impl KubeZiuStore {
    /// Create a store for the manager `manager_name` in `namespace`
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        manager_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            manager_name: manager_name.into(),
        }
    }
}

#[async_trait]
impl ZiuStore for KubeZiuStore {
    async fn get_manager(&self) -> Result<Option<Manager>, Error> {
        let api: Api<Manager> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(&self.manager_name).await?)
    }

    async fn set_stage(&self, stage: ZiuStage, kinds: Option<Vec<String>>) -> Result<(), Error> {
        let api: Api<Manager> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut status = serde_json::json!({ "ziuState": stage.raw() });
        if let Some(kinds) = kinds {
            status["ziuKinds"] = serde_json::json!(kinds);
        }
        debug!(manager = %self.manager_name, %stage, "setting staged upgrade stage");
        api.patch_status(
            &self.manager_name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await?;
        Ok(())
    }

    async fn workload_image(&self, name: &str) -> Result<Option<String>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
        let Some(sts) = api.get_opt(name).await? else {
            return Ok(None);
        };
        Ok(sts
            .spec
            .and_then(|s| s.template.spec)
            .and_then(|s| s.containers.into_iter().next())
            .and_then(|c| c.image))
    }
}
