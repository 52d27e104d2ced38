use crate::agents::{FetchError, FetchUrl};
use crate::config::ConfigRc;
use crate::metrics;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use tokio::sync::OnceCell;

/// The document served by the range-list source.
#[derive(Deserialize)]
pub struct RangeDocument {
    #[serde(default)]
    pub prefixes: Vec<Ipv4Prefix>,
    #[serde(default)]
    pub ipv6_prefixes: Vec<Ipv6Prefix>,
}

/// An IPv4 entry of the range-list document.
#[derive(Deserialize)]
pub struct Ipv4Prefix {
    pub ip_prefix: String,
    pub service: String,
    pub region: String,
}

/// An IPv6 entry of the range-list document.
///
/// Part of the document schema, but not merged into the trusted set.
#[derive(Deserialize)]
pub struct Ipv6Prefix {
    pub ipv6_prefix: String,
    pub service: String,
    pub region: String,
}

/// The set of network ranges whose addresses are treated as proxies.
///
/// The set is computed on first access and memoized for the lifetime of the
/// instance: the configured fixed ranges, followed by the ranges fetched from
/// the range-list source that carry the configured service tag. A failed
/// fetch degrades to the fixed ranges alone; it is memoized all the same, so
/// an unreachable range source is consulted once per instance, not once per
/// request.
pub struct TrustedProxies {
    app: ConfigRc,
    ranges: OnceCell<Vec<IpNetwork>>,
}

impl TrustedProxies {
    pub fn new(app: ConfigRc) -> Self {
        TrustedProxies {
            app,
            ranges: OnceCell::new(),
        }
    }

    /// The trusted ranges, in match order.
    ///
    /// Concurrent first accesses coalesce on a single fetch; everyone sees
    /// the fully-built set once it's published.
    pub async fn ranges(&self) -> &[IpNetwork] {
        self.ranges.get_or_init(|| self.build_ranges()).await
    }

    async fn build_ranges(&self) -> Vec<IpNetwork> {
        let mut ranges = self.app.trusted_proxies.clone();
        match self.fetch_document().await {
            Ok(doc) => {
                for prefix in doc.prefixes {
                    if prefix.service != self.app.service_tag {
                        continue;
                    }
                    match prefix.ip_prefix.parse() {
                        Ok(range) => ranges.push(range),
                        Err(err) => log::warn!(
                            "skipping unparseable range '{}' from {}: {}",
                            prefix.ip_prefix,
                            self.app.ip_ranges_url,
                            err
                        ),
                    }
                }
            }
            Err(err) => {
                metrics::FETCH_FAILURES.inc();
                log::warn!(
                    "unable to retrieve {} ranges from {}: {}",
                    self.app.service_tag,
                    self.app.ip_ranges_url,
                    err
                );
            }
        }
        ranges
    }

    async fn fetch_document(&self) -> Result<RangeDocument, FetchError> {
        let result = self
            .app
            .fetcher
            .send(FetchUrl::get(self.app.ip_ranges_url.clone()))
            .await?;
        Ok(serde_json::from_str(&result.data)?)
    }
}
