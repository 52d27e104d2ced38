use super::ConfigBuilder;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Intermediate structure for deserializing environment variables
///
/// Environment variable `UNPROXY_FOO_BAR` deserializes in to struct member `foo_bar`. These vars
/// have high precedence and must be prefixed to avoid collisions.
#[derive(Deserialize)]
pub struct EnvConfig {
    trusted_proxies: Option<Vec<IpNetwork>>,
    service_tag: Option<String>,
    ip_ranges_url: Option<Url>,
    fetch_attempts: Option<u32>,
    fetch_backoff_ms: Option<u64>,
}

impl EnvConfig {
    pub fn parse_and_apply(builder: &mut ConfigBuilder) {
        let parsed: EnvConfig = envy::prefixed("UNPROXY_")
            .from_env()
            .expect("Could not parse environment variables");
        Self::apply(parsed, builder);
    }

    fn apply(parsed: EnvConfig, builder: &mut ConfigBuilder) {
        if let Some(val) = parsed.trusted_proxies {
            builder.trusted_proxies = val;
        }
        if let Some(val) = parsed.service_tag {
            builder.service_tag = val;
        }
        if let Some(val) = parsed.ip_ranges_url {
            builder.ip_ranges_url = val;
        }
        if let Some(val) = parsed.fetch_attempts {
            builder.fetch_attempts = val;
        }
        if let Some(val) = parsed.fetch_backoff_ms {
            builder.fetch_backoff = Duration::from_millis(val);
        }
    }
}
