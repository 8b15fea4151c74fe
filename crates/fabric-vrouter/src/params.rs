//! Desired agent configuration
//!
//! [`DesiredAgent`] is everything the rollout engine needs to know about
//! what one node should run: the image, the rendered baseline parameters,
//! the provisioner environment and the inputs for the derived file set.

use std::collections::BTreeMap;

use serde::Serialize;

use fabric_common::crd::{native_log_level, ClusterNodes, KeystoneAuth, VrouterSpec};
use fabric_common::kube_utils::strip_quotes;
use fabric_common::template::TemplateRenderer;
use fabric_common::Error;

use crate::configs::AgentFile;
use crate::templates;

const DEFAULT_ORCHESTRATOR: &str = "kubernetes";
const DEFAULT_HYPERVISOR: &str = "kvm";
const DEFAULT_AGENT_MODE: &str = "kernel";
const DEFAULT_LOG_LEVEL: &str = "SYS_NOTICE";
const DEFAULT_LOG_LOCAL: i32 = 1;
const DEFAULT_COLLECTOR_PORT: &str = "8086";
const DEFAULT_CONFIG_API_PORT: &str = "8082";
const DEFAULT_XMPP_PORT: &str = "5269";
const DEFAULT_DNS_PORT: &str = "53";

/// Parameters the derived templates read. Keys the agent did not report
/// render as empty values.
const TEMPLATE_KEYS: &[&str] = &[
    "AGENT_MODE",
    "AUTH_MODE",
    "CONFIG_API_PORT",
    "CONFIG_NODES",
    "HYPERVISOR_TYPE",
    "INTROSPECT_SSL_ENABLE",
    "KEYSTONE_AUTH_ADMIN_PASSWORD",
    "KEYSTONE_AUTH_ADMIN_TENANT",
    "KEYSTONE_AUTH_ADMIN_USER",
    "KEYSTONE_AUTH_REGION_NAME",
    "KEYSTONE_AUTH_URL",
    "LOG_LEVEL",
    "LOG_LOCAL",
    "PHYS_INT",
    "PHYS_INT_MAC",
    "SANDESH_SSL_ENABLE",
    "SSL_ENABLE",
    "SUBCLUSTER",
    "VROUTER_CIDR",
    "VROUTER_GATEWAY",
    "XMPP_SSL_ENABLE",
];

/// Agent settings with defaults applied
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentSettings {
    pub cloud_orchestrator: String,
    pub hypervisor_type: String,
    pub agent_mode: String,
    pub ssl_enable: bool,
    pub log_local: i32,
    pub collector_port: String,
    pub config_api_port: String,
    pub xmpp_server_port: String,
    pub dns_server_port: String,
    pub physical_interface: String,
    pub vrouter_gateway: String,
    pub l3mh_cidr: String,
    pub subcluster: String,
    pub huge_pages_2m: Option<u32>,
    pub huge_pages_1g: Option<u32>,
}

impl AgentSettings {
    /// Resolve the settings of a Vrouter spec
    pub fn from_spec(spec: &VrouterSpec) -> Self {
        let cfg = &spec.service_configuration;
        let or = |value: &Option<String>, default: &str| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            cloud_orchestrator: or(&cfg.cloud_orchestrator, DEFAULT_ORCHESTRATOR),
            hypervisor_type: or(&cfg.hypervisor_type, DEFAULT_HYPERVISOR),
            agent_mode: or(&cfg.agent_mode, DEFAULT_AGENT_MODE),
            ssl_enable: cfg.ssl_enable.unwrap_or(true),
            log_local: cfg.log_local.unwrap_or(DEFAULT_LOG_LOCAL),
            collector_port: or(&cfg.collector_port, DEFAULT_COLLECTOR_PORT),
            config_api_port: or(&cfg.config_api_port, DEFAULT_CONFIG_API_PORT),
            xmpp_server_port: or(&cfg.xmpp_server_port, DEFAULT_XMPP_PORT),
            dns_server_port: or(&cfg.dns_server_port, DEFAULT_DNS_PORT),
            physical_interface: or(&cfg.physical_interface, ""),
            vrouter_gateway: or(&cfg.vrouter_gateway, ""),
            l3mh_cidr: or(&cfg.l3mh_cidr, ""),
            subcluster: or(&cfg.subcluster, ""),
            huge_pages_2m: cfg.huge_pages_2m,
            huge_pages_1g: cfg.huge_pages_1g,
        }
    }
}

#[derive(Serialize)]
struct AuthVars<'a> {
    mode: &'static str,
    keystone: Option<&'a KeystoneAuth>,
}

/// What one node should run, computed fresh every reconcile
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredAgent {
    /// Desired agent image
    pub image: String,
    /// Hostname the agent registers under
    pub hostname: String,
    /// Membership applied by this configuration
    pub cluster: ClusterNodes,
    /// Resolved agent settings
    pub settings: AgentSettings,
    /// Rendered baseline parameters
    pub baseline: String,
    /// Rendered provisioner environment
    pub provisioner_env: String,
}

impl DesiredAgent {
    /// Render the desired configuration of the agent on one node
    pub fn resolve(
        renderer: &dyn TemplateRenderer,
        spec: &VrouterSpec,
        image: &str,
        cluster: ClusterNodes,
        hostname: &str,
    ) -> Result<Self, Error> {
        let settings = AgentSettings::from_spec(spec);
        let common = &spec.common_configuration;
        let log_level = common
            .log_level
            .as_deref()
            .map(native_log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        // Agent scripts compare against lowercase literals
        let ssl_flag = settings.ssl_enable.to_string();

        let baseline = renderer.render(
            templates::PARAMS_ENV,
            &serde_json::json!({
                "config": settings,
                "cluster": cluster,
                "hostname": hostname,
                "log_level": log_level,
                "ssl_enable": ssl_flag,
                "env": spec.service_configuration.env_variables_config,
            }),
        )?;

        let auth = &common.auth_parameters;
        let provisioner_env = renderer.render(
            templates::PROVISIONER_ENV,
            &serde_json::json!({
                "cluster": cluster,
                "hostname": hostname,
                "ssl_enable": ssl_flag,
                "auth": AuthVars {
                    mode: auth.auth_mode.as_str(),
                    keystone: auth.keystone.as_ref(),
                },
                "physical_interface": settings.physical_interface,
                "vrouter_gateway": settings.vrouter_gateway,
                "l3mh_cidr": settings.l3mh_cidr,
            }),
        )?;

        Ok(Self {
            image: image.to_string(),
            hostname: hostname.to_string(),
            cluster,
            settings,
            baseline,
            provisioner_env,
        })
    }

    /// Render the full file set for a pod from the parameters its agent
    /// recomputed on the node. Recomputed values override the baseline.
    pub fn render_files(
        &self,
        renderer: &dyn TemplateRenderer,
        derived: &BTreeMap<String, String>,
        pod_ip: &str,
    ) -> Result<BTreeMap<AgentFile, String>, Error> {
        let mut params: BTreeMap<String, String> = TEMPLATE_KEYS
            .iter()
            .map(|k| (k.to_string(), String::new()))
            .collect();
        params.extend(parse_parameters(&self.baseline));
        params.extend(derived.iter().map(|(k, v)| (k.clone(), v.clone())));

        let vars = serde_json::json!({
            "params": params,
            "hostname": self.hostname,
            "host_ip": pod_ip,
            "control_servers": endpoints(&self.cluster.control_nodes, &self.settings.xmpp_server_port),
            "dns_servers": endpoints(&self.cluster.control_nodes, &self.settings.dns_server_port),
            "collectors": endpoints(&self.cluster.analytics_nodes, &self.settings.collector_port),
        });

        let mut files = BTreeMap::new();
        for (file, template) in [
            (AgentFile::AgentConf, templates::AGENT_CONF),
            (AgentFile::LbaasAuth, templates::LBAAS_AUTH),
            (AgentFile::VncApiLib, templates::VNC_API_LIB_INI),
            (AgentFile::NodemgrConf, templates::NODEMGR_CONF),
        ] {
            files.insert(file, renderer.render(template, &vars)?);
        }
        files.insert(AgentFile::NodemgrEnv, String::new());
        files.insert(AgentFile::ProvisionerEnv, self.provisioner_env.clone());
        Ok(files)
    }
}

/// Parse `KEY=VALUE` lines. Surrounding double quotes are stripped and
/// lines without `=` are skipped.
pub fn parse_parameters(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), strip_quotes(value.trim()).to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Space-separated `ip:port` list for a comma-joined member list
fn endpoints(members: &str, port: &str) -> String {
    members
        .split(',')
        .filter(|m| !m.is_empty())
        .map(|m| format!("{m}:{port}"))
        .collect::<Vec<_>>()
        .join(" ")
}
