use crate::metrics;
use crate::utils::agent::{Agent, Handler, Message, ReplySender};
use crate::utils::BoxError;
use bytes::{Bytes, BytesMut};
use futures_util::stream::StreamExt;
use http::StatusCode;
use hyper::client::{Client, HttpConnector};
use hyper::Body;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[cfg(feature = "rustls")]
type Connector = hyper_rustls::HttpsConnector<HttpConnector>;
#[cfg(all(feature = "native-tls", not(feature = "rustls")))]
type Connector = hyper_tls::HttpsConnector<HttpConnector>;
#[cfg(not(any(feature = "rustls", feature = "native-tls")))]
type Connector = HttpConnector;

/// Maximum size of a response body we're willing to buffer.
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("unexpected HTTP status code: {0}")]
    BadStatus(StatusCode),
    #[error("could not read HTTP response body: {0}")]
    Read(#[source] BoxError),
    #[error("invalid UTF-8 in HTTP response body: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("could not parse HTTP response body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error type used within a `FetchError::Read`, to indicate a size limit was exceeded.
#[derive(Debug, Error)]
#[error("size limit exceeded")]
pub struct SizeLimitExceeded;

/// Retry behavior for an HTTP GET.
///
/// A request is attempted at most `attempts` times. Connect errors and the
/// status codes in `RETRY_STATUS` are retried after an exponentially growing
/// delay; any other outcome is returned as-is.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt. Doubles for each attempt after that.
    pub backoff: Duration,
}

/// Status codes that indicate a transient upstream failure.
const RETRY_STATUS: &[u16] = &[500, 502, 504];

impl RetryPolicy {
    /// Whether a response status warrants another attempt.
    pub fn is_retryable(&self, status: StatusCode) -> bool {
        RETRY_STATUS.contains(&status.as_u16())
    }

    /// The delay to sleep after the given 1-based attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            backoff: Duration::from_millis(100),
        }
    }
}

/// The result of fetching a URL.
pub struct FetchUrlResult {
    /// Data from the response.
    pub data: String,
}

/// Message requesting an HTTP GET of a URL.
pub struct FetchUrl {
    /// The URL to fetch.
    pub url: Url,
}
impl Message for FetchUrl {
    type Reply = Result<FetchUrlResult, FetchError>;
}
impl FetchUrl {
    /// Create a GET request message.
    pub fn get(url: Url) -> Self {
        FetchUrl { url }
    }
}

/// Agent that fetches URLs.
pub struct FetchAgent {
    client: Client<Connector>,
    policy: RetryPolicy,
}

impl FetchAgent {
    pub fn new(policy: RetryPolicy) -> Self {
        #[cfg(feature = "rustls")]
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        #[cfg(all(feature = "native-tls", not(feature = "rustls")))]
        let connector = hyper_tls::HttpsConnector::new();
        #[cfg(not(any(feature = "rustls", feature = "native-tls")))]
        let connector = HttpConnector::new();
        let client = Client::builder().build(connector);
        FetchAgent { client, policy }
    }
}

impl Agent for FetchAgent {}

impl Handler<FetchUrl> for FetchAgent {
    fn handle(&mut self, message: FetchUrl, reply: ReplySender<FetchUrl>) {
        let client = self.client.clone();
        let policy = self.policy.clone();
        reply.later(async move {
            let uri: hyper::Uri = message
                .url
                .as_str()
                .parse()
                .expect("could not convert Url to Hyper Uri");

            let mut attempt = 1;
            let res = loop {
                metrics::FETCH_ATTEMPTS.inc();
                match client.get(uri.clone()).await {
                    Ok(res) if !policy.is_retryable(res.status()) => break res,
                    Ok(res) if attempt >= policy.attempts => break res,
                    Ok(res) => {
                        log::warn!(
                            "retrying {} after status {} (attempt {}/{})",
                            message.url,
                            res.status(),
                            attempt,
                            policy.attempts
                        );
                    }
                    Err(err) if attempt >= policy.attempts => return Err(err.into()),
                    Err(err) => {
                        log::warn!(
                            "retrying {} after error: {} (attempt {}/{})",
                            message.url,
                            err,
                            attempt,
                            policy.attempts
                        );
                    }
                }
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            };

            if res.status() != StatusCode::OK {
                return Err(FetchError::BadStatus(res.status()));
            }

            let chunk = read_body(res.into_body()).await.map_err(FetchError::Read)?;
            let data = String::from_utf8(chunk.to_vec())?;
            Ok(FetchUrlResult { data })
        });
    }
}

/// Read a response body up to a fixed size.
async fn read_body(mut body: Body) -> Result<Bytes, BoxError> {
    let mut acc = BytesMut::new();
    while let Some(result) = body.next().await {
        let chunk = result.map_err(Box::new)?;
        if acc.len() + chunk.len() > MAX_RESPONSE_SIZE {
            return Err(Box::new(SizeLimitExceeded));
        }
        acc.extend(chunk);
    }
    Ok(acc.freeze())
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use http::StatusCode;
    use std::time::Duration;

    #[test]
    fn retryable_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(policy.is_retryable(StatusCode::BAD_GATEWAY));
        assert!(policy.is_retryable(StatusCode::GATEWAY_TIMEOUT));

        assert!(!policy.is_retryable(StatusCode::OK));
        assert!(!policy.is_retryable(StatusCode::NOT_FOUND));
        assert!(!policy.is_retryable(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            attempts: 5,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
    }
}
