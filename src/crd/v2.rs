use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use super::types::*;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apisix.apache.org",
    version = "v2",
    kind = "ApisixUpstream",
    plural = "apisixupstreams",
    shortname = "au",
    namespaced,
    status = "ApisixStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixUpstreamSpec {
    #[serde(flatten)]
    pub config: ApisixUpstreamConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_nodes: Vec<ApisixUpstreamExternalNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_level_settings: Vec<PortLevelSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApisixUpstreamConfig {
    #[serde(rename = "loadbalancer", default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UpstreamTimeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<ApisixSecret>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsets: Vec<ApisixUpstreamSubset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Discovery>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PortLevelSettings {
    pub port: i32,
    #[serde(flatten)]
    pub config: ApisixUpstreamConfig,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExternalType {
    #[default]
    Domain,
    Service,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ApisixUpstreamExternalNode {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: ExternalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    #[serde(default)]
    pub service_name: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl Discovery {
    pub fn is_complete(&self) -> bool {
        !self.service_name.is_empty() && !self.type_.is_empty()
    }
}
