use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

pub const LB_ROUND_ROBIN: &str = "roundrobin";
pub const LB_CHASH: &str = "chash";
pub const LB_EWMA: &str = "ewma";
pub const LB_LEAST_CONN: &str = "least_conn";

pub const HASH_ON_VARS: &str = "vars";
pub const HASH_ON_VARS_COMBINATION: &str = "vars_combinations";
pub const HASH_ON_HEADER: &str = "header";
pub const HASH_ON_COOKIE: &str = "cookie";
pub const HASH_ON_CONSUMER: &str = "consumer";

pub const SCHEME_HTTP: &str = "http";
pub const SCHEME_HTTPS: &str = "https";
pub const SCHEME_GRPC: &str = "grpc";
pub const SCHEME_GRPCS: &str = "grpcs";

pub const HEALTH_CHECK_HTTP: &str = "http";
pub const HEALTH_CHECK_HTTPS: &str = "https";
pub const HEALTH_CHECK_TCP: &str = "tcp";
pub const HEALTH_CHECK_MAX_CONSECUTIVE_NUMBER: i32 = 254;

pub const PASS_HOST_PASS: &str = "pass";
pub const PASS_HOST_NODE: &str = "node";
pub const PASS_HOST_REWRITE: &str = "rewrite";

/// Seconds
pub const DEFAULT_UPSTREAM_TIMEOUT: i64 = 60;

const MANAGED_BY_LABEL: &str = "managed-by";
const MANAGED_BY: &str = "apisix-ingress-controller";
const DEFAULT_DESCRIPTION: &str = "Created by apisix-ingress-controller, DO NOT modify it manually";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamNode {
    pub host: String,
    pub port: i32,
    pub weight: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTimeout {
    pub connect: i64,
    pub send: i64,
    pub read: i64,
}

impl Default for UpstreamTimeout {
    fn default() -> Self {
        Self {
            connect: DEFAULT_UPSTREAM_TIMEOUT,
            send: DEFAULT_UPSTREAM_TIMEOUT,
            read: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTls {
    pub cert: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamHealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<UpstreamActiveHealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive: Option<UpstreamPassiveHealthCheck>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamActiveHealthCheck {
    #[serde(rename = "type")]
    pub type_: String,
    /// Seconds
    pub timeout: f64,
    pub concurrency: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    pub port: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_path: String,
    pub https_verify_certificate: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub req_headers: Vec<String>,
    pub healthy: ActiveHealthCheckHealthy,
    pub unhealthy: ActiveHealthCheckUnhealthy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHealthCheckHealthy {
    /// Seconds
    pub interval: i64,
    pub successes: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHealthCheckUnhealthy {
    /// Seconds
    pub interval: i64,
    pub http_failures: i32,
    pub tcp_failures: i32,
    pub timeouts: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamPassiveHealthCheck {
    #[serde(rename = "type")]
    pub type_: String,
    pub healthy: PassiveHealthCheckHealthy,
    pub unhealthy: PassiveHealthCheckUnhealthy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveHealthCheckHealthy {
    pub successes: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveHealthCheckUnhealthy {
    pub http_failures: i32,
    pub tcp_failures: i32,
    pub timeouts: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<i32>,
}

/// Gateway side backend target group.
///
/// `metadata` and `nodes` belong to the endpoint discovery component; every in-place update has to carry
/// them over from the object stored in the gateway.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(flatten)]
    pub metadata: Metadata,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash_on: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<UpstreamHealthCheck>,
    #[serde(default)]
    pub nodes: Vec<UpstreamNode>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UpstreamTimeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ClientTls>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pass_host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upstream_host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub discovery_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub discovery_args: BTreeMap<String, String>,
}

impl Upstream {
    /// The configuration an upstream falls back to once its `ApisixUpstream` is gone.
    pub fn new_default() -> Self {
        Self {
            metadata: Metadata {
                desc: DEFAULT_DESCRIPTION.to_owned(),
                labels: BTreeMap::from([(MANAGED_BY_LABEL.to_owned(), MANAGED_BY.to_owned())]),
                ..Default::default()
            },
            type_: LB_ROUND_ROBIN.to_owned(),
            scheme: SCHEME_HTTP.to_owned(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.metadata.name);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResolveGranularity {
    Endpoint,
    Service,
}

impl ResolveGranularity {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolveGranularity::Endpoint => "endpoint",
            ResolveGranularity::Service => "service",
        }
    }
}

impl Display for ResolveGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `namespace_name[_subset]_port[_granularity]`; the endpoint granularity is the default and is never spelled out.
pub fn compose_upstream_name(namespace: &str, name: &str, subset: &str, port: i32, granularity: Option<ResolveGranularity>) -> String {
    let mut upstream_name = format!("{namespace}_{name}_");
    if !subset.is_empty() {
        upstream_name.push_str(subset);
        upstream_name.push('_');
    }
    upstream_name.push_str(&port.to_string());
    if let Some(ResolveGranularity::Service) = granularity {
        upstream_name.push('_');
        upstream_name.push_str(ResolveGranularity::Service.as_str());
    }
    upstream_name
}

pub fn compose_external_upstream_name(namespace: &str, name: &str) -> String {
    format!("{namespace}_{name}")
}
