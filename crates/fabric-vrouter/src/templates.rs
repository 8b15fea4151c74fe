//! Agent configuration templates
//!
//! Rendered by [`fabric_common::template::TemplateRenderer`] with strict
//! undefined handling. `PARAMS_ENV` and `PROVISIONER_ENV` see the resolved
//! spec; the remaining files see the baseline merged with the parameters
//! the agent recomputed on its node (`params`).

/// Baseline parameters sourced by every agent shell
pub const PARAMS_ENV: &str = r#"CLOUD_ORCHESTRATOR="{{ config.cloud_orchestrator }}"
HYPERVISOR_TYPE="{{ config.hypervisor_type }}"
AGENT_MODE="{{ config.agent_mode }}"
VROUTER_HOSTNAME="{{ hostname }}"
CONTROL_NODES="{{ cluster.control_nodes }}"
CONFIG_NODES="{{ cluster.config_nodes }}"
ANALYTICS_NODES="{{ cluster.analytics_nodes }}"
CONFIG_API_PORT="{{ config.config_api_port }}"
COLLECTOR_PORT="{{ config.collector_port }}"
XMPP_SERVER_PORT="{{ config.xmpp_server_port }}"
DNS_SERVER_PORT="{{ config.dns_server_port }}"
LOG_LEVEL="{{ log_level }}"
LOG_LOCAL="{{ config.log_local }}"
SSL_ENABLE="{{ ssl_enable }}"
XMPP_SSL_ENABLE="{{ ssl_enable }}"
SANDESH_SSL_ENABLE="{{ ssl_enable }}"
INTROSPECT_SSL_ENABLE="{{ ssl_enable }}"
PHYSICAL_INTERFACE="{{ config.physical_interface }}"
VROUTER_GATEWAY="{{ config.vrouter_gateway }}"
L3MH_CIDR="{{ config.l3mh_cidr }}"
SUBCLUSTER="{{ config.subcluster }}"
{% if config.huge_pages_2m %}
HUGE_PAGES_2MB="{{ config.huge_pages_2m }}"
{% endif %}
{% if config.huge_pages_1g %}
HUGE_PAGES_1GB="{{ config.huge_pages_1g }}"
{% endif %}
{% for key, value in env|items %}
{{ key }}="{{ value }}"
{% endfor %}
"#;

/// Agent daemon configuration
pub const AGENT_CONF: &str = r#"[CONTROL-NODE]
servers={{ control_servers }}
{% if params.SUBCLUSTER %}
subcluster_name={{ params.SUBCLUSTER }}
{% endif %}

[DEFAULT]
agent_name={{ hostname }}
http_server_ip=0.0.0.0
collectors={{ collectors }}
log_file=/var/log/contrail/contrail-vrouter-agent.log
log_level={{ params.LOG_LEVEL }}
log_local={{ params.LOG_LOCAL }}
hostname={{ hostname }}
agent_mode={{ params.AGENT_MODE }}
xmpp_auth_enable={{ params.XMPP_SSL_ENABLE }}
sandesh_ssl_enable={{ params.SANDESH_SSL_ENABLE }}
introspect_ssl_enable={{ params.INTROSPECT_SSL_ENABLE }}

[DNS]
servers={{ dns_servers }}

[METADATA]
metadata_proxy_secret=contrail

[VIRTUAL-HOST-INTERFACE]
name=vhost0
ip={{ params.VROUTER_CIDR }}
physical_interface={{ params.PHYS_INT }}
physical_interface_mac={{ params.PHYS_INT_MAC }}
{% if params.VROUTER_GATEWAY %}
gateway={{ params.VROUTER_GATEWAY }}
{% endif %}
compute_node_address={{ host_ip }}

[SERVICE-INSTANCE]
netns_command=/usr/bin/opencontrail-vrouter-netns
docker_command=/usr/bin/opencontrail-vrouter-docker

[HYPERVISOR]
type={{ params.HYPERVISOR_TYPE }}
"#;

/// Load-balancer auth configuration
pub const LBAAS_AUTH: &str = r#"[BARBICAN]
admin_tenant_name={{ params.KEYSTONE_AUTH_ADMIN_TENANT }}
admin_user={{ params.KEYSTONE_AUTH_ADMIN_USER }}
admin_password={{ params.KEYSTONE_AUTH_ADMIN_PASSWORD }}
auth_url={{ params.KEYSTONE_AUTH_URL }}
region={{ params.KEYSTONE_AUTH_REGION_NAME }}
"#;

/// Config API client configuration
pub const VNC_API_LIB_INI: &str = r#"[global]
WEB_SERVER={{ params.CONFIG_NODES }}
WEB_PORT={{ params.CONFIG_API_PORT }}
BASE_URL=/
{% if params.SSL_ENABLE == "true" %}
insecure=false
certfile=/etc/certificates/client-{{ host_ip }}.crt
keyfile=/etc/certificates/client-key-{{ host_ip }}.pem
cafile=/etc/ssl/certs/kubernetes/ca-bundle.crt
{% endif %}

[auth]
AUTHN_TYPE={{ params.AUTH_MODE }}
"#;

/// Node manager configuration
pub const NODEMGR_CONF: &str = r#"[DEFAULTS]
http_server_ip=0.0.0.0
log_file=/var/log/contrail/vrouter-nodemgr.log
log_level={{ params.LOG_LEVEL }}
log_local={{ params.LOG_LOCAL }}
hostname={{ hostname }}
hostip={{ host_ip }}

[COLLECTOR]
server_list={{ collectors }}

[SANDESH]
sandesh_ssl_enable={{ params.SANDESH_SSL_ENABLE }}
introspect_ssl_enable={{ params.INTROSPECT_SSL_ENABLE }}
"#;

/// Provisioner environment: registers the node with the config API
pub const PROVISIONER_ENV: &str = r#"CONTROL_NODES={{ cluster.control_nodes }}
CONFIG_NODES={{ cluster.config_nodes }}
ANALYTICS_NODES={{ cluster.analytics_nodes }}
VROUTER_HOSTNAME={{ hostname }}
SSL_ENABLE={{ ssl_enable }}
AUTH_MODE={{ auth.mode }}
{% if auth.keystone %}
KEYSTONE_AUTH_HOST={{ auth.keystone.address }}
KEYSTONE_AUTH_PROTO={{ auth.keystone.authProtocol }}
KEYSTONE_AUTH_PUBLIC_PORT={{ auth.keystone.port }}
KEYSTONE_AUTH_ADMIN_USER={{ auth.keystone.adminUsername }}
KEYSTONE_AUTH_ADMIN_PASSWORD={{ auth.keystone.adminPassword }}
KEYSTONE_AUTH_ADMIN_TENANT={{ auth.keystone.adminTenant }}
KEYSTONE_AUTH_REGION_NAME={{ auth.keystone.region }}
{% endif %}
{% if physical_interface %}
PHYSICAL_INTERFACE={{ physical_interface }}
{% endif %}
{% if vrouter_gateway %}
VROUTER_GATEWAY={{ vrouter_gateway }}
{% endif %}
{% if l3mh_cidr %}
L3MH_CIDR={{ l3mh_cidr }}
{% endif %}
"#;
