use std::{collections::BTreeMap, time::Duration};

use k8s_openapi::{api::core::v1::Secret, ByteString};

use super::TranslationError;
use crate::{
    common::{
        ActiveHealthCheckHealthy, ActiveHealthCheckUnhealthy, ClientTls, PassiveHealthCheckHealthy, PassiveHealthCheckUnhealthy, ResourceKey, Upstream,
        UpstreamActiveHealthCheck, UpstreamHealthCheck, UpstreamPassiveHealthCheck, UpstreamTimeout, DEFAULT_UPSTREAM_TIMEOUT, HASH_ON_CONSUMER, HASH_ON_COOKIE,
        HASH_ON_HEADER, HASH_ON_VARS, HASH_ON_VARS_COMBINATION, HEALTH_CHECK_HTTP, HEALTH_CHECK_HTTPS, HEALTH_CHECK_MAX_CONSECUTIVE_NUMBER, HEALTH_CHECK_TCP,
        LB_CHASH, LB_EWMA, LB_LEAST_CONN, LB_ROUND_ROBIN, PASS_HOST_NODE, PASS_HOST_PASS, PASS_HOST_REWRITE, SCHEME_GRPC, SCHEME_GRPCS, SCHEME_HTTP,
        SCHEME_HTTPS,
    },
    controllers::SecretLister,
    crd::{types as schema, v2, v2beta3},
};

const ACTIVE_HEALTH_CHECK_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// The fields both served versions have in common; v2beta3 simply never sets the v2 only ones.
pub(super) struct ConfigView<'a> {
    load_balancer: Option<&'a schema::LoadBalancer>,
    scheme: Option<&'a str>,
    retries: Option<i64>,
    timeout: Option<&'a schema::UpstreamTimeout>,
    health_check: Option<&'a schema::HealthCheck>,
    tls_secret: Option<&'a schema::ApisixSecret>,
    pass_host: Option<&'a str>,
    upstream_host: Option<&'a str>,
    discovery: Option<&'a v2::Discovery>,
}

impl<'a> From<&'a v2::ApisixUpstreamConfig> for ConfigView<'a> {
    fn from(config: &'a v2::ApisixUpstreamConfig) -> Self {
        Self {
            load_balancer: config.load_balancer.as_ref(),
            scheme: config.scheme.as_deref(),
            retries: config.retries,
            timeout: config.timeout.as_ref(),
            health_check: config.health_check.as_ref(),
            tls_secret: config.tls_secret.as_ref(),
            pass_host: config.pass_host.as_deref(),
            upstream_host: config.upstream_host.as_deref(),
            discovery: config.discovery.as_ref(),
        }
    }
}

impl<'a> From<&'a v2beta3::ApisixUpstreamConfig> for ConfigView<'a> {
    fn from(config: &'a v2beta3::ApisixUpstreamConfig) -> Self {
        Self {
            load_balancer: config.load_balancer.as_ref(),
            scheme: config.scheme.as_deref(),
            retries: config.retries,
            timeout: config.timeout.as_ref(),
            health_check: config.health_check.as_ref(),
            tls_secret: config.tls_secret.as_ref(),
            pass_host: None,
            upstream_host: None,
            discovery: None,
        }
    }
}

pub(super) fn translate(config: &ConfigView<'_>, namespace: &str, secrets: &dyn SecretLister) -> Result<Upstream, TranslationError> {
    let mut upstream = Upstream::new_default();
    translate_scheme(config.scheme, &mut upstream)?;
    translate_load_balancer(config.load_balancer, &mut upstream)?;
    translate_retries_and_timeout(config.retries, config.timeout, &mut upstream)?;
    upstream.checks = translate_health_check(config.health_check)?;
    if let Some(reference) = config.tls_secret {
        upstream.tls = Some(translate_client_tls(reference, namespace, secrets)?);
    }
    translate_pass_host(config.pass_host, config.upstream_host, &mut upstream)?;
    if let Some(discovery) = config.discovery {
        upstream.discovery_type.clone_from(&discovery.type_);
        upstream.service_name.clone_from(&discovery.service_name);
        upstream.discovery_args.clone_from(&discovery.args);
    }
    Ok(upstream)
}

fn translate_scheme(scheme: Option<&str>, upstream: &mut Upstream) -> Result<(), TranslationError> {
    match scheme.unwrap_or_default() {
        "" => SCHEME_HTTP.clone_into(&mut upstream.scheme),
        scheme @ (SCHEME_HTTP | SCHEME_HTTPS | SCHEME_GRPC | SCHEME_GRPCS) => scheme.clone_into(&mut upstream.scheme),
        _ => return Err(TranslationError::invalid_value("scheme")),
    }
    Ok(())
}

fn translate_load_balancer(load_balancer: Option<&schema::LoadBalancer>, upstream: &mut Upstream) -> Result<(), TranslationError> {
    let Some(load_balancer) = load_balancer.filter(|lb| !lb.type_.is_empty()) else {
        LB_ROUND_ROBIN.clone_into(&mut upstream.type_);
        return Ok(());
    };
    match load_balancer.type_.as_str() {
        LB_ROUND_ROBIN | LB_LEAST_CONN | LB_EWMA => load_balancer.type_.clone_into(&mut upstream.type_),
        LB_CHASH => {
            let hash_on = match load_balancer.hash_on.as_str() {
                "" => HASH_ON_VARS,
                hash_on @ (HASH_ON_VARS | HASH_ON_HEADER | HASH_ON_COOKIE | HASH_ON_CONSUMER | HASH_ON_VARS_COMBINATION) => hash_on,
                _ => return Err(TranslationError::invalid_value("loadbalancer.hashOn")),
            };
            if load_balancer.key.is_empty() {
                return Err(TranslationError::invalid("loadbalancer.key", "missing key"));
            }
            LB_CHASH.clone_into(&mut upstream.type_);
            hash_on.clone_into(&mut upstream.hash_on);
            load_balancer.key.clone_into(&mut upstream.key);
        },
        _ => return Err(TranslationError::invalid_value("loadbalancer.type")),
    }
    Ok(())
}

fn translate_retries_and_timeout(retries: Option<i64>, timeout: Option<&schema::UpstreamTimeout>, upstream: &mut Upstream) -> Result<(), TranslationError> {
    if retries.is_some_and(|retries| retries < 0) {
        return Err(TranslationError::invalid_value("retries"));
    }
    upstream.retries = retries;

    let Some(timeout) = timeout else {
        return Ok(());
    };
    // The gateway rejects a partially filled timeout, every missing entry falls back to the default.
    upstream.timeout = Some(UpstreamTimeout {
        connect: timeout_seconds(timeout.connect.as_deref(), "timeout.connect")?,
        send: timeout_seconds(timeout.send.as_deref(), "timeout.send")?,
        read: timeout_seconds(timeout.read.as_deref(), "timeout.read")?,
    });
    Ok(())
}

fn timeout_seconds(value: Option<&str>, field: &str) -> Result<i64, TranslationError> {
    let Some(value) = value else {
        return Ok(DEFAULT_UPSTREAM_TIMEOUT);
    };
    let duration = parse_duration(value).ok_or_else(|| TranslationError::invalid_value(field))?;
    if duration.is_zero() {
        Ok(DEFAULT_UPSTREAM_TIMEOUT)
    } else {
        Ok(whole_seconds(duration))
    }
}

fn translate_health_check(config: Option<&schema::HealthCheck>) -> Result<Option<UpstreamHealthCheck>, TranslationError> {
    let Some(config) = config else {
        return Ok(None);
    };
    if config.active.is_none() && config.passive.is_none() {
        return Ok(None);
    }
    Ok(Some(UpstreamHealthCheck {
        active: config.active.as_ref().map(translate_active_health_check).transpose()?,
        passive: config.passive.as_ref().map(translate_passive_health_check).transpose()?,
    }))
}

fn translate_active_health_check(config: &schema::ActiveHealthCheck) -> Result<UpstreamActiveHealthCheck, TranslationError> {
    let type_ = health_check_type(&config.type_, "healthCheck.active.type")?;
    let timeout = match config.timeout.as_deref() {
        Some(timeout) => parse_duration(timeout).ok_or_else(|| TranslationError::invalid_value("healthCheck.active.timeout"))?.as_secs_f64(),
        None => 0.0,
    };
    if !(0..=65535).contains(&config.port) {
        return Err(TranslationError::invalid_value("healthCheck.active.port"));
    }
    if config.concurrency < 0 {
        return Err(TranslationError::invalid_value("healthCheck.active.concurrency"));
    }

    let mut active = UpstreamActiveHealthCheck {
        type_,
        timeout,
        concurrency: config.concurrency,
        host: config.host.clone(),
        port: config.port,
        http_path: config.http_path.clone(),
        https_verify_certificate: config.strict_tls.unwrap_or(true),
        req_headers: config.request_headers.clone(),
        ..Default::default()
    };

    if let Some(healthy) = &config.healthy {
        active.healthy = ActiveHealthCheckHealthy {
            successes: consecutive_number(healthy.successes, "healthCheck.active.healthy.successes")?,
            http_statuses: http_codes(healthy.http_codes.as_ref(), "healthCheck.active.healthy.httpCodes")?,
            interval: interval_seconds(healthy.interval.as_deref(), "healthCheck.active.healthy.interval")?,
        };
    }

    if let Some(unhealthy) = &config.unhealthy {
        active.unhealthy = ActiveHealthCheckUnhealthy {
            http_failures: consecutive_number(unhealthy.http_failures, "healthCheck.active.unhealthy.httpFailures")?,
            tcp_failures: consecutive_number(unhealthy.tcp_failures, "healthCheck.active.unhealthy.tcpFailures")?,
            timeouts: unhealthy.timeouts,
            http_statuses: http_codes(unhealthy.http_codes.as_ref(), "healthCheck.active.unhealthy.httpCodes")?,
            interval: interval_seconds(unhealthy.interval.as_deref(), "healthCheck.active.unhealthy.interval")?,
        };
    }
    Ok(active)
}

fn translate_passive_health_check(config: &schema::PassiveHealthCheck) -> Result<UpstreamPassiveHealthCheck, TranslationError> {
    let mut passive = UpstreamPassiveHealthCheck {
        type_: health_check_type(&config.type_, "healthCheck.passive.type")?,
        ..Default::default()
    };

    if let Some(healthy) = &config.healthy {
        passive.healthy = PassiveHealthCheckHealthy {
            successes: consecutive_number(healthy.successes, "healthCheck.passive.healthy.successes")?,
            http_statuses: http_codes(healthy.http_codes.as_ref(), "healthCheck.passive.healthy.httpCodes")?,
        };
    }

    if let Some(unhealthy) = &config.unhealthy {
        passive.unhealthy = PassiveHealthCheckUnhealthy {
            http_failures: consecutive_number(unhealthy.http_failures, "healthCheck.passive.unhealthy.httpFailures")?,
            tcp_failures: consecutive_number(unhealthy.tcp_failures, "healthCheck.passive.unhealthy.tcpFailures")?,
            timeouts: unhealthy.timeouts,
            http_statuses: http_codes(unhealthy.http_codes.as_ref(), "healthCheck.passive.unhealthy.httpCodes")?,
        };
    }
    Ok(passive)
}

fn health_check_type(type_: &str, field: &str) -> Result<String, TranslationError> {
    match type_ {
        "" => Ok(HEALTH_CHECK_HTTP.to_owned()),
        HEALTH_CHECK_HTTP | HEALTH_CHECK_HTTPS | HEALTH_CHECK_TCP => Ok(type_.to_owned()),
        _ => Err(TranslationError::invalid_value(field)),
    }
}

fn consecutive_number(value: i32, field: &str) -> Result<i32, TranslationError> {
    if (0..=HEALTH_CHECK_MAX_CONSECUTIVE_NUMBER).contains(&value) {
        Ok(value)
    } else {
        Err(TranslationError::invalid_value(field))
    }
}

fn http_codes(codes: Option<&Vec<i32>>, field: &str) -> Result<Vec<i32>, TranslationError> {
    match codes {
        Some(codes) if codes.is_empty() => Err(TranslationError::invalid(field, "empty")),
        Some(codes) => Ok(codes.clone()),
        None => Ok(Vec::new()),
    }
}

fn interval_seconds(value: Option<&str>, field: &str) -> Result<i64, TranslationError> {
    let interval = value.and_then(parse_duration).unwrap_or_default();
    if interval < ACTIVE_HEALTH_CHECK_MIN_INTERVAL {
        return Err(TranslationError::invalid_value(field));
    }
    Ok(whole_seconds(interval))
}

fn translate_client_tls(reference: &schema::ApisixSecret, namespace: &str, secrets: &dyn SecretLister) -> Result<ClientTls, TranslationError> {
    let secret_namespace = if reference.namespace.is_empty() { namespace } else { &reference.namespace };
    let key = ResourceKey::namespaced(&reference.name, secret_namespace);
    let secret = secrets.get(&key.namespace, &key.name).ok_or_else(|| TranslationError::SecretNotFound(key.clone()))?;

    let cert = secret_entry(&secret, &["cert", "tls.crt"]).ok_or_else(|| TranslationError::MissingSecretField {
        secret: key.clone(),
        field: "cert",
    })?;
    let private_key = secret_entry(&secret, &["key", "tls.key"]).ok_or(TranslationError::MissingSecretField { secret: key, field: "key" })?;
    Ok(ClientTls { cert, key: private_key })
}

fn secret_entry(secret: &Secret, names: &[&str]) -> Option<String> {
    let data: &BTreeMap<String, ByteString> = secret.data.as_ref()?;
    names.iter().find_map(|name| data.get(*name)).map(|ByteString(bytes)| String::from_utf8_lossy(bytes).into_owned())
}

fn translate_pass_host(pass_host: Option<&str>, upstream_host: Option<&str>, upstream: &mut Upstream) -> Result<(), TranslationError> {
    let pass_host = pass_host.unwrap_or_default();
    let upstream_host = upstream_host.unwrap_or_default();
    match pass_host {
        "" | PASS_HOST_PASS | PASS_HOST_NODE => {},
        PASS_HOST_REWRITE if upstream_host.is_empty() => return Err(TranslationError::invalid("upstreamHost", "empty")),
        PASS_HOST_REWRITE => {},
        _ => return Err(TranslationError::invalid_value("passHost")),
    }
    pass_host.clone_into(&mut upstream.pass_host);
    upstream_host.clone_into(&mut upstream.upstream_host);
    Ok(())
}

fn whole_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Parses durations written as `300ms`, `1.5h` or `2h45m`; a bare `0` is accepted as well.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value == "0" {
        return Some(Duration::ZERO);
    }
    if value.is_empty() {
        return None;
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = value;
    let mut seconds = 0.0_f64;
    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if number_end == 0 {
            return None;
        }
        let number: f64 = rest[..number_end].parse().ok()?;
        rest = &rest[number_end..];

        let unit_end = rest.find(is_number).unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        seconds += number * scale;
        rest = &rest[unit_end..];
    }
    Duration::try_from_secs_f64(seconds).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::{Secret, Service};
    use kube::api::ObjectMeta;

    use super::*;
    use crate::{
        controllers::populated_store,
        translation::{DefaultTranslator, Translator},
    };

    fn translator(secrets: Vec<Secret>) -> DefaultTranslator {
        DefaultTranslator::builder()
            .service_lister(Arc::new(populated_store::<Service>(Vec::new())))
            .secret_lister(Arc::new(populated_store(secrets)))
            .build()
    }

    fn config(yaml: &str) -> v2::ApisixUpstreamConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn invalid_field(error: TranslationError) -> String {
        match error {
            TranslationError::InvalidField { field, .. } => field,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("5 seconds"), None);
        assert_eq!(parse_duration("-5s"), None);
    }

    #[test]
    fn test_empty_config_translates_to_default() {
        let upstream = translator(vec![]).translate_upstream_config_v2("ns", &config("{}")).unwrap();
        assert_eq!(upstream, Upstream::new_default());
    }

    #[test]
    fn test_scheme() {
        let translator = translator(vec![]);
        assert_eq!(translator.translate_upstream_config_v2("ns", &config("scheme: grpcs")).unwrap().scheme, SCHEME_GRPCS);
        let error = translator.translate_upstream_config_v2("ns", &config("scheme: udp")).unwrap_err();
        assert_eq!(error.to_string(), "scheme => invalid value");
    }

    #[test]
    fn test_load_balancer() {
        let translator = translator(vec![]);
        let upstream = translator.translate_upstream_config_v2("ns", &config("loadbalancer:\n  type: chash\n  key: uri")).unwrap();
        assert_eq!(upstream.type_, LB_CHASH);
        assert_eq!(upstream.hash_on, HASH_ON_VARS);
        assert_eq!(upstream.key, "uri");

        let upstream = translator.translate_upstream_config_v2("ns", &config("loadbalancer:\n  type: ewma")).unwrap();
        assert_eq!(upstream.type_, LB_EWMA);
        assert!(upstream.hash_on.is_empty());

        let error = translator.translate_upstream_config_v2("ns", &config("loadbalancer:\n  type: chash")).unwrap_err();
        assert_eq!(error.to_string(), "loadbalancer.key => missing key");
        let error = translator.translate_upstream_config_v2("ns", &config("loadbalancer:\n  type: chash\n  hashOn: body\n  key: a")).unwrap_err();
        assert_eq!(invalid_field(error), "loadbalancer.hashOn");
        let error = translator.translate_upstream_config_v2("ns", &config("loadbalancer:\n  type: random")).unwrap_err();
        assert_eq!(invalid_field(error), "loadbalancer.type");
    }

    #[test]
    fn test_retries_and_timeout() {
        let translator = translator(vec![]);
        let upstream = translator.translate_upstream_config_v2("ns", &config("retries: 2\ntimeout:\n  connect: 5s\n  read: 2m")).unwrap();
        assert_eq!(upstream.retries, Some(2));
        assert_eq!(upstream.timeout, Some(UpstreamTimeout { connect: 5, send: 60, read: 120 }));

        let error = translator.translate_upstream_config_v2("ns", &config("retries: -1")).unwrap_err();
        assert_eq!(invalid_field(error), "retries");
        let error = translator.translate_upstream_config_v2("ns", &config("timeout:\n  send: soon")).unwrap_err();
        assert_eq!(invalid_field(error), "timeout.send");
    }

    #[test]
    fn test_active_health_check() {
        let translator = translator(vec![]);
        let upstream = translator
            .translate_upstream_config_v2(
                "ns",
                &config(
                    r"
healthCheck:
  active:
    type: https
    timeout: 1500ms
    httpPath: /healthz
    healthy:
      successes: 2
      interval: 3s
      httpCodes: [200]
    unhealthy:
      httpFailures: 3
      interval: 1s
",
                ),
            )
            .unwrap();
        let active = upstream.checks.unwrap().active.unwrap();
        assert_eq!(active.type_, HEALTH_CHECK_HTTPS);
        assert!((active.timeout - 1.5).abs() < 1e-6);
        assert!(active.https_verify_certificate);
        assert_eq!(active.http_path, "/healthz");
        assert_eq!(active.healthy.interval, 3);
        assert_eq!(active.healthy.http_statuses, vec![200]);
        assert_eq!(active.unhealthy.http_failures, 3);
    }

    #[test]
    fn test_invalid_health_checks() {
        let translator = translator(vec![]);
        let cases = [
            ("healthCheck:\n  active:\n    type: udp", "healthCheck.active.type"),
            ("healthCheck:\n  active:\n    port: 70000", "healthCheck.active.port"),
            ("healthCheck:\n  active:\n    concurrency: -1", "healthCheck.active.concurrency"),
            ("healthCheck:\n  active:\n    healthy:\n      interval: 500ms", "healthCheck.active.healthy.interval"),
            ("healthCheck:\n  active:\n    healthy:\n      interval: 1s\n      httpCodes: []", "healthCheck.active.healthy.httpCodes"),
            ("healthCheck:\n  active:\n    unhealthy:\n      interval: 1s\n      tcpFailures: 255", "healthCheck.active.unhealthy.tcpFailures"),
            ("healthCheck:\n  passive:\n    healthy:\n      successes: 300", "healthCheck.passive.healthy.successes"),
            ("healthCheck:\n  passive:\n    unhealthy:\n      httpFailures: -1", "healthCheck.passive.unhealthy.httpFailures"),
        ];
        for (yaml, field) in cases {
            let error = translator.translate_upstream_config_v2("ns", &config(yaml)).unwrap_err();
            assert_eq!(invalid_field(error), field, "{yaml}");
        }
    }

    #[test]
    fn test_strict_tls_disabled() {
        let upstream = translator(vec![]).translate_upstream_config_v2("ns", &config("healthCheck:\n  active:\n    strictTLS: false")).unwrap();
        assert!(!upstream.checks.unwrap().active.unwrap().https_verify_certificate);
    }

    #[test]
    fn test_tls_secret() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("client-cert".to_owned()),
                namespace: Some("ns".to_owned()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("cert".to_owned(), ByteString(b"CERT".to_vec())),
                ("tls.key".to_owned(), ByteString(b"KEY".to_vec())),
            ])),
            ..Default::default()
        };
        let translator = translator(vec![secret]);

        let upstream = translator.translate_upstream_config_v2("ns", &config("tlsSecret:\n  name: client-cert")).unwrap();
        assert_eq!(
            upstream.tls,
            Some(ClientTls {
                cert: "CERT".to_owned(),
                key: "KEY".to_owned()
            })
        );

        let error = translator.translate_upstream_config_v2("ns", &config("tlsSecret:\n  name: client-cert\n  namespace: other")).unwrap_err();
        assert_eq!(error, TranslationError::SecretNotFound(ResourceKey::namespaced("client-cert", "other")));
    }

    #[test]
    fn test_pass_host_and_discovery() {
        let translator = translator(vec![]);
        let upstream = translator
            .translate_upstream_config_v2(
                "ns",
                &config("passHost: rewrite\nupstreamHost: internal.example.com\ndiscovery:\n  serviceName: httpbin\n  type: dns\n  args:\n    group: a"),
            )
            .unwrap();
        assert_eq!(upstream.pass_host, PASS_HOST_REWRITE);
        assert_eq!(upstream.upstream_host, "internal.example.com");
        assert_eq!(upstream.discovery_type, "dns");
        assert_eq!(upstream.service_name, "httpbin");
        assert_eq!(upstream.discovery_args.get("group").map(String::as_str), Some("a"));

        let error = translator.translate_upstream_config_v2("ns", &config("passHost: rewrite")).unwrap_err();
        assert_eq!(invalid_field(error), "upstreamHost");
        let error = translator.translate_upstream_config_v2("ns", &config("passHost: always")).unwrap_err();
        assert_eq!(invalid_field(error), "passHost");
    }

    #[test]
    fn test_v2beta3_config() {
        let config: v2beta3::ApisixUpstreamConfig = serde_yaml::from_str("scheme: https\nretries: 1").unwrap();
        let upstream = translator(vec![]).translate_upstream_config_v2beta3("ns", &config).unwrap();
        assert_eq!(upstream.scheme, SCHEME_HTTPS);
        assert_eq!(upstream.retries, Some(1));
        assert!(upstream.pass_host.is_empty());
    }
}
