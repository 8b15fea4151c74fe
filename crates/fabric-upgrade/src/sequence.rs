//! Service kinds and the fixed order they are upgraded in

use std::fmt;
use std::str::FromStr;

use fabric_common::crd::{ServiceInput, Services};
use fabric_common::Error;

/// A platform service kind that runs its own reconcile driver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Config API
    Config,
    /// Analytics API and collector
    Analytics,
    /// Analytics alarm generator
    AnalyticsAlarm,
    /// Analytics SNMP collector
    AnalyticsSnmp,
    /// Redis
    Redis,
    /// Analytics query engine
    QueryEngine,
    /// Cassandra
    Cassandra,
    /// Zookeeper
    Zookeeper,
    /// RabbitMQ
    Rabbitmq,
    /// Control nodes
    Control,
    /// Web UI
    Webui,
    /// Kubernetes network manager
    Kubemanager,
    /// Forwarding agent fleet
    Vrouter,
}

impl ServiceKind {
    /// Every kind, in declaration order
    pub const ALL: [ServiceKind; 13] = [
        Self::Config,
        Self::Analytics,
        Self::AnalyticsAlarm,
        Self::AnalyticsSnmp,
        Self::Redis,
        Self::QueryEngine,
        Self::Cassandra,
        Self::Zookeeper,
        Self::Rabbitmq,
        Self::Control,
        Self::Webui,
        Self::Kubemanager,
        Self::Vrouter,
    ];

    /// Kind name as used by the reconcile drivers and in the manager status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "Config",
            Self::Analytics => "Analytics",
            Self::AnalyticsAlarm => "AnalyticsAlarm",
            Self::AnalyticsSnmp => "AnalyticsSnmp",
            Self::Redis => "Redis",
            Self::QueryEngine => "QueryEngine",
            Self::Cassandra => "Cassandra",
            Self::Zookeeper => "Zookeeper",
            Self::Rabbitmq => "Rabbitmq",
            Self::Control => "Control",
            Self::Webui => "Webui",
            Self::Kubemanager => "Kubemanager",
            Self::Vrouter => "Vrouter",
        }
    }

    /// Name fragment of the kind's workload objects (`<instance>-<fragment>-statefulset`)
    pub fn workload_fragment(&self) -> String {
        self.as_str().to_lowercase()
    }

    /// First enabled instance of this kind in the manager services
    pub fn first_instance<'a>(&self, services: &'a Services) -> Option<&'a ServiceInput> {
        match self {
            Self::Config => services.config.as_ref(),
            Self::Analytics => services.analytics.as_ref(),
            Self::AnalyticsAlarm => services.analytics_alarm.as_ref(),
            Self::AnalyticsSnmp => services.analytics_snmp.as_ref(),
            Self::Redis => services.redis.first(),
            Self::QueryEngine => services.query_engine.as_ref(),
            Self::Cassandra => services.cassandras.first(),
            Self::Zookeeper => services.zookeeper.as_ref(),
            Self::Rabbitmq => services.rabbitmq.as_ref(),
            Self::Control => services.controls.first(),
            Self::Webui => services.webui.as_ref(),
            Self::Kubemanager => services.kubemanager.as_ref(),
            Self::Vrouter => services.vrouters.first(),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::upgrade_sequence(s))
    }
}

/// Upgrade order used when the network manager is not deployed
const BASE_SEQUENCE: [ServiceKind; 11] = [
    ServiceKind::Config,
    ServiceKind::Analytics,
    ServiceKind::AnalyticsAlarm,
    ServiceKind::AnalyticsSnmp,
    ServiceKind::Redis,
    ServiceKind::QueryEngine,
    ServiceKind::Cassandra,
    ServiceKind::Zookeeper,
    ServiceKind::Rabbitmq,
    ServiceKind::Control,
    ServiceKind::Webui,
];

/// Ordered list of kinds a staged upgrade walks through.
///
/// Every kind appears at most once. The forwarding agent is never part of a
/// sequence: it is held back for the whole staged upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindSequence(Vec<ServiceKind>);

impl KindSequence {
    /// Sequence for a deployment without the network manager
    pub fn base() -> Self {
        Self(BASE_SEQUENCE.to_vec())
    }

    /// Sequence for a deployment with the network manager, which goes last
    pub fn with_kubemanager() -> Self {
        let mut kinds = BASE_SEQUENCE.to_vec();
        kinds.push(ServiceKind::Kubemanager);
        Self(kinds)
    }

    /// Pick the sequence matching the enabled services
    pub fn for_services(services: &Services) -> Self {
        if services.kubemanager.is_some() {
            Self::with_kubemanager()
        } else {
            Self::base()
        }
    }

    /// Rebuild a sequence recorded as kind names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, Error> {
        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let kind: ServiceKind = name.as_ref().parse()?;
            if kind == ServiceKind::Vrouter || kinds.contains(&kind) {
                return Err(Error::validation_for_field(
                    "Manager",
                    "status.ziuKinds",
                    format!("kind {kind} cannot appear in the upgrade sequence here"),
                ));
            }
            kinds.push(kind);
        }
        Ok(Self(kinds))
    }

    /// Kind names, for recording in the manager status
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|k| k.as_str().to_string()).collect()
    }

    /// Position of a kind (by name) in the sequence
    pub fn position(&self, kind: &str) -> Option<usize> {
        self.0.iter().position(|k| k.as_str() == kind)
    }

    /// Kind at a position
    pub fn get(&self, index: usize) -> Option<ServiceKind> {
        self.0.get(index).copied()
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the sequence has no kinds
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_common::crd::ServiceInput;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ServiceKind::ALL {
            assert_eq!(kind.as_str().parse::<ServiceKind>().unwrap(), kind);
        }
        assert!(matches!(
            "NotInSequence".parse::<ServiceKind>(),
            Err(Error::UpgradeSequence { .. })
        ));
    }

    #[test]
    fn test_workload_fragment() {
        assert_eq!(ServiceKind::QueryEngine.workload_fragment(), "queryengine");
        assert_eq!(ServiceKind::AnalyticsSnmp.workload_fragment(), "analyticssnmp");
    }

    #[test]
    fn test_sequences() {
        let base = KindSequence::base();
        assert_eq!(base.len(), 11);
        assert_eq!(base.position("Config"), Some(0));
        assert_eq!(base.position("Cassandra"), Some(6));
        assert_eq!(base.position("Kubemanager"), None);
        assert_eq!(base.position("Vrouter"), None);

        let full = KindSequence::with_kubemanager();
        assert_eq!(full.len(), 12);
        assert_eq!(full.position("Kubemanager"), Some(11));
    }

    #[test]
    fn test_sequence_follows_enabled_services() {
        let mut services = Services::default();
        assert_eq!(KindSequence::for_services(&services), KindSequence::base());
        services.kubemanager = Some(ServiceInput::default());
        assert_eq!(
            KindSequence::for_services(&services),
            KindSequence::with_kubemanager()
        );
    }

    #[test]
    fn test_from_names() {
        let seq = KindSequence::from_names(&["Config", "Analytics", "Cassandra"]).unwrap();
        assert_eq!(seq.position("Cassandra"), Some(2));
        assert_eq!(seq.names(), vec!["Config", "Analytics", "Cassandra"]);

        assert!(KindSequence::from_names(&["Config", "Config"]).is_err());
        assert!(KindSequence::from_names(&["Vrouter"]).is_err());
        assert!(KindSequence::from_names(&["Bogus"]).is_err());
    }
}
