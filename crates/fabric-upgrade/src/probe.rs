//! Idle-state check: is a staged upgrade about to start?
//!
//! While no staged upgrade is running, the desired image tag of one
//! representative service is compared with the tag actually deployed. A
//! mismatch means the stage driver is about to arm an upgrade and nobody
//! should race it.

use fabric_common::crd::Services;
use fabric_common::kube_utils::image_tag;
use fabric_common::Error;
use tracing::debug;

use crate::sequence::ServiceKind;
use crate::store::ZiuStore;

/// Kinds scanned for the representative workload, first enabled one wins
pub const PROBE_ORDER: [ServiceKind; 12] = [
    ServiceKind::Kubemanager,
    ServiceKind::Webui,
    ServiceKind::Control,
    ServiceKind::Rabbitmq,
    ServiceKind::Zookeeper,
    ServiceKind::Cassandra,
    ServiceKind::QueryEngine,
    ServiceKind::Redis,
    ServiceKind::AnalyticsSnmp,
    ServiceKind::AnalyticsAlarm,
    ServiceKind::Analytics,
    ServiceKind::Config,
];

/// Workload inspected to detect a pending upgrade
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Kind the workload belongs to
    pub kind: ServiceKind,
    /// Workload (statefulset) name
    pub workload: String,
    /// Desired image of its first container
    pub image: String,
}

/// Pick the representative workload for the enabled services.
///
/// Returns `None` when nothing is enabled or the first enabled kind has no
/// containers declared.
pub fn upgrade_probe_target(services: &Services) -> Option<ProbeTarget> {
    let (kind, instance) = PROBE_ORDER
        .iter()
        .find_map(|kind| kind.first_instance(services).map(|i| (*kind, i)))?;
    let image = instance.containers().first().map(|c| c.image.clone())?;
    if image.is_empty() {
        return None;
    }
    Some(ProbeTarget {
        kind,
        workload: format!("{}-{}-statefulset", instance.name(), kind.workload_fragment()),
        image,
    })
}

/// Whether the deployed image tag of the representative workload differs
/// from the desired one. A workload that does not exist yet (first install)
/// never requires an upgrade.
pub async fn is_upgrade_required(services: &Services, store: &dyn ZiuStore) -> Result<bool, Error> {
    let Some(target) = upgrade_probe_target(services) else {
        return Ok(false);
    };
    let Some(deployed) = store.workload_image(&target.workload).await? else {
        debug!(workload = %target.workload, "probe workload not deployed yet");
        return Ok(false);
    };
    let desired_tag = image_tag(&target.image);
    let deployed_tag = image_tag(&deployed);
    debug!(
        workload = %target.workload,
        kind = %target.kind,
        desired_tag,
        deployed_tag,
        "compared image tags"
    );
    Ok(desired_tag != deployed_tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockZiuStore;
    use fabric_common::crd::{
        Container, InputMetadata, InputServiceConfiguration, InputSpec, ServiceInput,
    };

    fn input(name: &str, image: &str) -> ServiceInput {
        ServiceInput {
            metadata: InputMetadata {
                name: name.to_string(),
            },
            spec: InputSpec {
                service_configuration: InputServiceConfiguration {
                    containers: vec![Container {
                        name: "main".to_string(),
                        image: image.to_string(),
                        command: None,
                    }],
                },
            },
        }
    }

    #[test]
    fn test_probe_prefers_kubemanager() {
        let services = Services {
            config: Some(input("config1", "registry/config:R2")),
            kubemanager: Some(input("km1", "registry/km:R2")),
            webui: Some(input("webui1", "registry/webui:R2")),
            ..Default::default()
        };
        let target = upgrade_probe_target(&services).unwrap();
        assert_eq!(target.kind, ServiceKind::Kubemanager);
        assert_eq!(target.workload, "km1-kubemanager-statefulset");
    }

    #[test]
    fn test_probe_uses_first_replicated_instance() {
        let services = Services {
            cassandras: vec![input("cassandra1", "c:R1"), input("cassandra2", "c:R1")],
            config: Some(input("config1", "cfg:R1")),
            ..Default::default()
        };
        let target = upgrade_probe_target(&services).unwrap();
        assert_eq!(target.workload, "cassandra1-cassandra-statefulset");
        assert_eq!(target.image, "c:R1");
    }

    #[test]
    fn test_probe_none_without_containers() {
        assert!(upgrade_probe_target(&Services::default()).is_none());

        let services = Services {
            webui: Some(ServiceInput::default()),
            config: Some(input("config1", "cfg:R1")),
            ..Default::default()
        };
        assert!(upgrade_probe_target(&services).is_none());
    }

    #[tokio::test]
    async fn test_tag_mismatch_requires_upgrade() {
        let services = Services {
            controls: vec![input("control1", "registry:5000/control:R2")],
            ..Default::default()
        };
        let mut store = MockZiuStore::new();
        store
            .expect_workload_image()
            .withf(|name| name == "control1-control-statefulset")
            .returning(|_| Ok(Some("registry:5000/control:R1".to_string())));

        assert!(is_upgrade_required(&services, &store).await.unwrap());
    }

    #[tokio::test]
    async fn test_matching_tag_and_first_install_do_not_require_upgrade() {
        let services = Services {
            controls: vec![input("control1", "other-registry/control:R1")],
            ..Default::default()
        };

        let mut store = MockZiuStore::new();
        store
            .expect_workload_image()
            .returning(|_| Ok(Some("registry/control:R1".to_string())));
        assert!(!is_upgrade_required(&services, &store).await.unwrap());

        let mut store = MockZiuStore::new();
        store.expect_workload_image().returning(|_| Ok(None));
        assert!(!is_upgrade_required(&services, &store).await.unwrap());
    }
}
