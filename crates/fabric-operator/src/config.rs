//! Operator configuration
//!
//! Read from the environment through [`EnvSource`] so tests never touch
//! process-global state.

use std::time::Duration;

use thiserror::Error;

/// Namespace the operator watches; required
pub const WATCH_NAMESPACE_VAR: &str = "WATCH_NAMESPACE";
/// Name of the Manager object holding the staged upgrade state
pub const MANAGER_NAME_VAR: &str = "FABRIC_MANAGER_NAME";
/// Requeue delay in seconds while a rollout progresses
pub const REQUEUE_SECS_VAR: &str = "FABRIC_REQUEUE_SECS";
/// Requeue delay in seconds while blocked by a staged upgrade
pub const ZIU_REQUEUE_SECS_VAR: &str = "FABRIC_ZIU_REQUEUE_SECS";
/// Server-side watch timeout in seconds
pub const WATCH_TIMEOUT_SECS_VAR: &str = "FABRIC_WATCH_TIMEOUT_SECS";

const DEFAULT_MANAGER_NAME: &str = "cluster1";
const DEFAULT_REQUEUE_SECS: u64 = 3;
const DEFAULT_ZIU_REQUEUE_SECS: u64 = 20;
/// Must stay below the client read timeout (30s) so idle watches are closed
/// by the API server first.
const DEFAULT_WATCH_TIMEOUT_SECS: u32 = 25;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty
    #[error("environment variable {0} is required")]
    Missing(&'static str),

    /// A variable does not parse
    #[error("environment variable {var} has invalid value {value:?}: {message}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Parse failure
        message: String,
    },
}

/// Source of environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `key`, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Clone, Default)]
pub struct OsEnvSource;

impl EnvSource for OsEnvSource {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Settings of the operator process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace holding the Vrouter and Manager objects
    pub namespace: String,
    /// Name of the Manager object
    pub manager_name: String,
    /// Requeue delay while a rollout progresses
    pub requeue: Duration,
    /// Requeue delay while blocked by a staged upgrade
    pub ziu_requeue: Duration,
    /// Server-side watch timeout in seconds
    pub watch_timeout_secs: u32,
}

impl OperatorConfig {
    /// Read the configuration from `env`
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let namespace = env
            .var(WATCH_NAMESPACE_VAR)
            .filter(|ns| !ns.is_empty())
            .ok_or(ConfigError::Missing(WATCH_NAMESPACE_VAR))?;
        let manager_name = env
            .var(MANAGER_NAME_VAR)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_MANAGER_NAME.to_string());

        Ok(Self {
            namespace,
            manager_name,
            requeue: Duration::from_secs(parse_or(env, REQUEUE_SECS_VAR, DEFAULT_REQUEUE_SECS)?),
            ziu_requeue: Duration::from_secs(parse_or(
                env,
                ZIU_REQUEUE_SECS_VAR,
                DEFAULT_ZIU_REQUEUE_SECS,
            )?),
            watch_timeout_secs: parse_or(env, WATCH_TIMEOUT_SECS_VAR, DEFAULT_WATCH_TIMEOUT_SECS)?,
        })
    }
}

fn parse_or<T>(env: &dyn EnvSource, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env.var(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            message: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> MockEnvSource {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(move |key| vars.get(key).cloned());
        mock
    }

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::from_env(&env(&[("WATCH_NAMESPACE", "fabric")])).unwrap();
        assert_eq!(
            config,
            OperatorConfig {
                namespace: "fabric".to_string(),
                manager_name: "cluster1".to_string(),
                requeue: Duration::from_secs(3),
                ziu_requeue: Duration::from_secs(20),
                watch_timeout_secs: 25,
            }
        );
    }

    #[test]
    fn test_overrides() {
        let config = OperatorConfig::from_env(&env(&[
            ("WATCH_NAMESPACE", "fabric"),
            ("FABRIC_MANAGER_NAME", "prod"),
            ("FABRIC_REQUEUE_SECS", "5"),
            ("FABRIC_ZIU_REQUEUE_SECS", " 40 "),
            ("FABRIC_WATCH_TIMEOUT_SECS", "10"),
        ]))
        .unwrap();
        assert_eq!(config.manager_name, "prod");
        assert_eq!(config.requeue, Duration::from_secs(5));
        assert_eq!(config.ziu_requeue, Duration::from_secs(40));
        assert_eq!(config.watch_timeout_secs, 10);
    }

    #[rstest::rstest]
    #[case::unset(&[])]
    #[case::empty(&[("WATCH_NAMESPACE", "")])]
    fn test_namespace_required(#[case] vars: &[(&str, &str)]) {
        let err = OperatorConfig::from_env(&env(vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WATCH_NAMESPACE")));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = OperatorConfig::from_env(&env(&[
            ("WATCH_NAMESPACE", "fabric"),
            ("FABRIC_REQUEUE_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FABRIC_REQUEUE_SECS"));
    }
}
