//! Custom Resource Definitions for the fabric operator

mod manager;
mod types;
mod vrouter;

pub use manager::{
    InputMetadata, InputServiceConfiguration, InputSpec, Manager, ManagerSpec, ManagerStatus,
    ServiceInput, Services, ZiuStage,
};
pub use types::{find_container, native_log_level, ClusterNodes, Container, NodeInfo};
pub use vrouter::{
    AgentPhase, AgentStatus, AuthMode, AuthParameters, CommonConfiguration, KeystoneAuth,
    Vrouter, VrouterConfiguration, VrouterSpec, VrouterStatus, AGENT_CONTAINER,
    NODEMANAGER_CONTAINER,
};
