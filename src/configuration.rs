use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{common::DEFAULT_CLUSTER_NAME, crd::GroupVersion, Result};

fn default_cluster() -> String {
    DEFAULT_CLUSTER_NAME.to_owned()
}

fn default_workers() -> usize {
    1
}

fn default_upstream_version() -> GroupVersion {
    GroupVersion::V2
}

#[derive(Debug, TypedBuilder, Deserialize)]
pub struct Configuration {
    #[builder(setter(into))]
    pub controller_name: String,
    #[builder(default)]
    pub enable_open_telemetry: Option<bool>,
    /// Gateway cluster whose upstreams are kept in sync.
    #[serde(default = "default_cluster")]
    #[builder(default = default_cluster(), setter(into))]
    pub default_cluster_name: String,
    /// Workers per queue.
    #[serde(default = "default_workers")]
    #[builder(default = default_workers())]
    pub workers: usize,
    /// Namespaces to reconcile; empty means all of them.
    #[serde(default)]
    #[builder(default)]
    pub watching_namespaces: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    pub disable_status_updates: bool,
    #[serde(default)]
    #[builder(default)]
    pub resync_interval_seconds: Option<u64>,
    #[serde(default = "default_upstream_version")]
    #[builder(default = default_upstream_version())]
    pub upstream_version: GroupVersion,
}

#[derive(Error, Debug)]
enum ConfigurationError {
    #[error("controller name must be not empty")]
    ControllerName,
    #[error("default cluster name must be not empty")]
    ClusterName,
    #[error("at least one worker must be configured")]
    Workers,
    #[error("resync interval must be positive")]
    ResyncInterval,
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.is_empty() {
            return Err(ConfigurationError::ControllerName.into());
        }
        if self.default_cluster_name.is_empty() {
            return Err(ConfigurationError::ClusterName.into());
        }
        if self.workers == 0 {
            return Err(ConfigurationError::Workers.into());
        }
        if self.resync_interval_seconds == Some(0) {
            return Err(ConfigurationError::ResyncInterval.into());
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_seconds.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration: Configuration = serde_yaml::from_str("controller_name: apisix.apache.org/upstream-controller").unwrap();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.default_cluster_name, DEFAULT_CLUSTER_NAME);
        assert_eq!(configuration.workers, 1);
        assert!(configuration.watching_namespaces.is_empty());
        assert!(!configuration.disable_status_updates);
        assert_eq!(configuration.resync_interval(), None);
        assert_eq!(configuration.upstream_version, GroupVersion::V2);
    }

    #[test]
    fn test_full_configuration() {
        let yaml = r"
controller_name: apisix.apache.org/upstream-controller
enable_open_telemetry: true
default_cluster_name: edge
workers: 4
watching_namespaces:
- apps
- infra
disable_status_updates: true
resync_interval_seconds: 300
upstream_version: apisix.apache.org/v2beta3
";
        let configuration: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.enable_open_telemetry, Some(true));
        assert_eq!(configuration.default_cluster_name, "edge");
        assert_eq!(configuration.workers, 4);
        assert_eq!(configuration.watching_namespaces, vec!["apps".to_owned(), "infra".to_owned()]);
        assert!(configuration.disable_status_updates);
        assert_eq!(configuration.resync_interval(), Some(Duration::from_secs(300)));
        assert_eq!(configuration.upstream_version, GroupVersion::V2beta3);
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let yaml = "controller_name: c\nupstream_version: apisix.apache.org/v1";
        assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let configuration = Configuration::builder().controller_name("c").build();
        assert_eq!(configuration.default_cluster_name, DEFAULT_CLUSTER_NAME);
        assert_eq!(configuration.workers, 1);
        assert_eq!(configuration.upstream_version, GroupVersion::V2);
    }

    #[test]
    fn test_validate() {
        assert!(Configuration::builder().controller_name("").build().validate().is_err());
        assert!(Configuration::builder().controller_name("c").default_cluster_name("").build().validate().is_err());
        assert!(Configuration::builder().controller_name("c").workers(0).build().validate().is_err());
        assert!(Configuration::builder().controller_name("c").resync_interval_seconds(Some(0)).build().validate().is_err());
        assert!(Configuration::builder().controller_name("c").build().validate().is_ok());
    }
}
