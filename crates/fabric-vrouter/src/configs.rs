//! Per-pod configuration files in the shared agent ConfigMap
//!
//! Every agent pod reads its files from one ConfigMap mounted at
//! [`CONFIG_MOUNT_PATH`]; keys are suffixed with the pod IP so pods on
//! different nodes never see each other's configuration.

use std::collections::{BTreeMap, BTreeSet};

use fabric_common::crd::Vrouter;
use fabric_common::CONFIG_MOUNT_PATH;
use kube::ResourceExt;

/// One configuration file delivered to an agent pod
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentFile {
    /// Baseline parameters, pushed first
    Params,
    /// Agent daemon configuration
    AgentConf,
    /// Load-balancer auth configuration
    LbaasAuth,
    /// Config API client configuration
    VncApiLib,
    /// Node manager configuration
    NodemgrConf,
    /// Node manager environment (always empty)
    NodemgrEnv,
    /// Provisioner environment
    ProvisionerEnv,
}

impl AgentFile {
    /// Files rendered from the derived parameters. An interface rebind
    /// removes these and keeps only the baseline.
    pub const DERIVED: [AgentFile; 6] = [
        AgentFile::AgentConf,
        AgentFile::LbaasAuth,
        AgentFile::VncApiLib,
        AgentFile::NodemgrConf,
        AgentFile::NodemgrEnv,
        AgentFile::ProvisionerEnv,
    ];

    /// Files that must be visible in the pod before a reload
    pub const VERIFIED: [AgentFile; 5] = [
        AgentFile::AgentConf,
        AgentFile::LbaasAuth,
        AgentFile::VncApiLib,
        AgentFile::NodemgrConf,
        AgentFile::ProvisionerEnv,
    ];

    /// File name without the pod suffix
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Params => "params.env",
            Self::AgentConf => "contrail-vrouter-agent.conf",
            Self::LbaasAuth => "contrail-lbaas.auth.conf",
            Self::VncApiLib => "vnc_api_lib.ini",
            Self::NodemgrConf => "vrouter-nodemgr.conf",
            Self::NodemgrEnv => "vrouter-nodemgr.env",
            Self::ProvisionerEnv => "vrouter-provisioner.env",
        }
    }

    /// ConfigMap key for the pod with address `pod_ip`
    pub fn key(&self, pod_ip: &str) -> String {
        format!("{}.{}", self.file_name(), pod_ip)
    }

    /// Pod IP a ConfigMap key belongs to; `None` for keys of other files
    pub fn pod_ip_of(key: &str) -> Option<&str> {
        std::iter::once(AgentFile::Params)
            .chain(AgentFile::DERIVED)
            .find_map(|file| {
                key.strip_prefix(file.file_name())
                    .and_then(|rest| rest.strip_prefix('.'))
            })
            .filter(|ip| !ip.is_empty())
    }

    /// Path of the file as mounted inside the pod
    pub fn mount_path(&self, pod_ip: &str) -> String {
        format!("{}/{}", CONFIG_MOUNT_PATH, self.key(pod_ip))
    }
}

/// Name of the ConfigMap holding the per-pod agent files
pub fn config_map_name(vrouter: &Vrouter) -> String {
    format!("{}-vrouter-agent-config", vrouter.name_any())
}

/// A batch of changes to the agent ConfigMap
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    /// Keys to write
    pub set: BTreeMap<String, String>,
    /// Keys to delete
    pub remove: BTreeSet<String>,
}

impl ConfigUpdate {
    /// Write one key
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.remove.remove(&key);
        self.set.insert(key, value.into());
        self
    }

    /// Delete one key
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.set.remove(&key);
        self.remove.insert(key);
        self
    }

    /// Remove every per-pod key whose pod IP is not in `live_ips`. Keys
    /// that do not belong to an agent file are left alone.
    pub fn prune_except(entries: &BTreeMap<String, String>, live_ips: &BTreeSet<&str>) -> Self {
        entries
            .keys()
            .filter(|key| AgentFile::pod_ip_of(key).is_some_and(|ip| !live_ips.contains(ip)))
            .fold(Self::default(), |update, key| update.remove(key.as_str()))
    }

    /// Whether the batch changes nothing
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Apply the batch to a local copy of the ConfigMap data
    pub fn apply(&self, entries: &mut BTreeMap<String, String>) {
        for key in &self.remove {
            entries.remove(key);
        }
        for (key, value) in &self.set {
            entries.insert(key.clone(), value.clone());
        }
    }

    /// JSON merge patch for the ConfigMap; removed keys are set to null
    pub fn to_patch(&self) -> serde_json::Value {
        let mut data = serde_json::Map::new();
        for (key, value) in &self.set {
            data.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        for key in &self.remove {
            data.insert(key.clone(), serde_json::Value::Null);
        }
        serde_json::json!({ "data": data })
    }
}
