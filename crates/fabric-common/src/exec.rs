//! Remote command execution inside pod containers
//!
//! The rollout engine probes liveness, verifies file contents, recomputes
//! derived parameters and delivers reload signals by running commands in
//! the agent pod. [`RemoteExec`] is the seam; [`KubeRemoteExec`] runs the
//! commands through the pod `exec` subresource.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::{Client, ResourceExt};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::Error;

/// Identity of a pod to exec into
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRef {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
}

impl PodRef {
    /// Create a reference from name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Reference an existing pod object
    pub fn from_pod(pod: &Pod) -> Self {
        Self {
            name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
        }
    }
}

/// Captured output of a finished command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Run a command in a named container of a pod
///
/// A non-zero exit status is reported as [`Error::Exec`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Execute `argv` in `container` of `pod` and capture its output
    async fn exec(&self, pod: &PodRef, container: &str, argv: &[String])
        -> Result<ExecOutput, Error>;
}

/// [`RemoteExec`] over the Kubernetes pod exec subresource
pub struct KubeRemoteExec {
    client: Client,
}

impl KubeRemoteExec {
    /// Create an executor using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteExec for KubeRemoteExec {
    async fn exec(
        &self,
        pod: &PodRef,
        container: &str,
        argv: &[String],
    ) -> Result<ExecOutput, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        trace!(pod = %pod.name, container, ?argv, "exec");
        let mut attached = api.exec(&pod.name, argv.to_vec(), &params).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let status = attached.take_status();
        let out_reader = attached.stdout();
        let err_reader = attached.stderr();

        let read_out = async {
            if let Some(mut r) = out_reader {
                r.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_err = async {
            if let Some(mut r) = err_reader {
                r.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out_res, err_res) = tokio::join!(read_out, read_err);
        out_res
            .and(err_res)
            .map_err(|e| Error::exec(&pod.name, container, format!("read output: {e}")))?;

        let status = match status {
            Some(fut) => fut.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::exec(&pod.name, container, e.to_string()))?;

        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                let message = status.message.unwrap_or_default();
                debug!(pod = %pod.name, container, %message, %stderr, "command failed");
                return Err(Error::exec(
                    &pod.name,
                    container,
                    format!("{message}: {}", stderr.trim()),
                ));
            }
        }

        Ok(ExecOutput { stdout, stderr })
    }
}
