mod external_nodes;
mod upstream_config;

use std::sync::Arc;

use thiserror::Error;
use typed_builder::TypedBuilder;

pub use upstream_config::parse_duration;
use upstream_config::ConfigView;

use crate::{
    common::{ResourceKey, Upstream, UpstreamNode},
    controllers::{SecretLister, ServiceLister},
    crd::{v2, v2beta3},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("{field} => {reason}")]
    InvalidField { field: String, reason: String },
    #[error("secret {0} not found")]
    SecretNotFound(ResourceKey),
    #[error("secret {secret} has no {field} entry")]
    MissingSecretField { secret: ResourceKey, field: &'static str },
    #[error("external node {index} of {owner}: invalid port in {name:?}")]
    InvalidExternalNodePort { owner: ResourceKey, index: usize, name: String },
    #[error("external node {index} of {owner} must refer to an ExternalName service, {service} is not one")]
    NotExternalNameService { owner: ResourceKey, index: usize, service: ResourceKey },
}

impl TranslationError {
    pub(crate) fn invalid_value(field: &str) -> Self {
        Self::InvalidField {
            field: field.to_owned(),
            reason: "invalid value".to_owned(),
        }
    }

    pub(crate) fn invalid(field: &str, reason: &str) -> Self {
        Self::InvalidField {
            field: field.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

pub trait Translator: Send + Sync {
    /// `namespace` is the namespace of the owning resource; it scopes secret references without one.
    fn translate_upstream_config_v2(&self, namespace: &str, config: &v2::ApisixUpstreamConfig) -> Result<Upstream, TranslationError>;
    fn translate_upstream_config_v2beta3(&self, namespace: &str, config: &v2beta3::ApisixUpstreamConfig) -> Result<Upstream, TranslationError>;
    fn translate_external_nodes(&self, upstream: &v2::ApisixUpstream) -> Result<Vec<UpstreamNode>, TranslationError>;
}

#[derive(Clone, TypedBuilder)]
pub struct DefaultTranslator {
    service_lister: Arc<dyn ServiceLister>,
    secret_lister: Arc<dyn SecretLister>,
}

impl Translator for DefaultTranslator {
    fn translate_upstream_config_v2(&self, namespace: &str, config: &v2::ApisixUpstreamConfig) -> Result<Upstream, TranslationError> {
        upstream_config::translate(&ConfigView::from(config), namespace, self.secret_lister.as_ref())
    }

    fn translate_upstream_config_v2beta3(&self, namespace: &str, config: &v2beta3::ApisixUpstreamConfig) -> Result<Upstream, TranslationError> {
        upstream_config::translate(&ConfigView::from(config), namespace, self.secret_lister.as_ref())
    }

    fn translate_external_nodes(&self, upstream: &v2::ApisixUpstream) -> Result<Vec<UpstreamNode>, TranslationError> {
        external_nodes::translate(upstream, self.service_lister.as_ref())
    }
}
