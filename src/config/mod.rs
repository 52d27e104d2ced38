mod env;

use self::env::EnvConfig;
use crate::agents::{FetchAgent, FetchUrl, RetryPolicy};
use crate::utils::agent::{Agent, Sender};
use ipnetwork::IpNetwork;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Well-known URL of the public range-list document.
const DEFAULT_IP_RANGES_URL: &str = "https://ip-ranges.amazonaws.com/ip-ranges.json";

/// Service tag whose prefixes are merged into the trusted set.
const DEFAULT_SERVICE_TAG: &str = "CLOUDFRONT";

/// Private networks treated as proxies out of the box.
const DEFAULT_TRUSTED_PROXIES: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

pub type ConfigRc = Arc<Config>;

pub struct Config {
    /// Networks whose addresses are always treated as proxies.
    pub trusted_proxies: Vec<IpNetwork>,
    /// Service tag to select from the fetched range-list document.
    pub service_tag: String,
    /// URL of the range-list document.
    pub ip_ranges_url: Url,
    /// Transport used to fetch the range-list document.
    pub fetcher: Box<dyn Sender<FetchUrl>>,
}

/// Mutable container for assembling a `Config`.
///
/// Fields are public so the embedding process can set them directly;
/// `from_env` additionally applies `UNPROXY_*` environment overrides.
pub struct ConfigBuilder {
    pub trusted_proxies: Vec<IpNetwork>,
    pub service_tag: String,
    pub ip_ranges_url: Url,
    pub fetch_attempts: u32,
    pub fetch_backoff: Duration,
    pub fetcher: Option<Box<dyn Sender<FetchUrl>>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let policy = RetryPolicy::default();
        ConfigBuilder {
            trusted_proxies: DEFAULT_TRUSTED_PROXIES
                .iter()
                .map(|range| range.parse().expect("default trusted proxy range is valid"))
                .collect(),
            service_tag: DEFAULT_SERVICE_TAG.to_owned(),
            ip_ranges_url: DEFAULT_IP_RANGES_URL
                .parse()
                .expect("default ip ranges url is valid"),
            fetch_attempts: policy.attempts,
            fetch_backoff: policy.backoff,
            fetcher: None,
        }
    }

    /// Create a builder with defaults, then apply environment overrides.
    pub fn from_env() -> Self {
        let mut builder = Self::new();
        EnvConfig::parse_and_apply(&mut builder);
        builder
    }

    /// Finish configuration, spawning the fetch agent if none was injected.
    pub fn done(self) -> ConfigRc {
        let fetcher = self.fetcher.unwrap_or_else(|| {
            let policy = RetryPolicy {
                attempts: self.fetch_attempts,
                backoff: self.fetch_backoff,
            };
            Box::new(FetchAgent::new(policy).start())
        });
        Arc::new(Config {
            trusted_proxies: self.trusted_proxies,
            service_tag: self.service_tag,
            ip_ranges_url: self.ip_ranges_url,
            fetcher,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
