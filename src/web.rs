use crate::metrics;
use crate::ranges::TrustedProxies;
use crate::resolve::resolve;
use crate::utils::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use hyper::server::conn::AddrStream;
use hyper::service::Service as HyperService;
use hyper::Body;
use ipnetwork::IpNetwork;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

lazy_static::lazy_static! {
    static ref X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
}

/// Standard request type.
pub type Request = hyper::Request<Body>;

/// Request extension carrying the resolved client address.
///
/// This is a string rather than an `IpAddr`: the resolved address is either
/// the peer address of the connection or a verbatim forwarding-chain entry,
/// and chain entries are attacker-controlled and need not parse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientAddr(pub String);

/// Rewrite the address metadata of a request in place.
///
/// Resolves the real client address from the peer address and the
/// `X-Forwarded-For` header, stores it as a `ClientAddr` extension, and
/// truncates or removes the header to match. A header value that isn't
/// visible ASCII is left untouched and treated as absent.
pub fn unproxy_request<B>(
    req: &mut hyper::Request<B>,
    remote_addr: SocketAddr,
    trusted: &[IpNetwork],
) {
    let forwarded = req
        .headers()
        .get(&*X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let resolution = resolve(&remote_addr.ip().to_string(), forwarded.as_deref(), trusted);
    log::debug!("{} resolved to {}", remote_addr, resolution.client_addr);
    metrics::REQUESTS.inc();

    match resolution.forwarded {
        Some(value) => {
            let value = HeaderValue::from_str(&value)
                .expect("rewritten forwarding chain is a valid header value");
            req.headers_mut().insert(&*X_FORWARDED_FOR, value);
        }
        None if forwarded.is_some() => {
            req.headers_mut().remove(&*X_FORWARDED_FOR);
        }
        None => {}
    }
    req.extensions_mut().insert(ClientAddr(resolution.client_addr));
}

/// Service wrapper that corrects client address metadata before delegating.
///
/// Created per connection, like any hyper service. The wrapped service finds
/// the resolved address in the request extensions and an `X-Forwarded-For`
/// header that no longer includes trusted proxy hops.
pub struct UnproxyService<S> {
    proxies: Arc<TrustedProxies>,
    remote_addr: SocketAddr,
    inner: S,
}

impl<S> UnproxyService<S> {
    /// Create the service for a connection, wrapping `inner`.
    pub fn new(proxies: Arc<TrustedProxies>, stream: &AddrStream, inner: S) -> Self {
        Self::with_remote_addr(proxies, stream.remote_addr(), inner)
    }

    /// Like `new`, for hosts that track the peer address themselves.
    pub fn with_remote_addr(
        proxies: Arc<TrustedProxies>,
        remote_addr: SocketAddr,
        inner: S,
    ) -> Self {
        UnproxyService {
            proxies,
            remote_addr,
            inner,
        }
    }
}

impl<S> HyperService<Request> for UnproxyService<S>
where
    S: HyperService<Request> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let proxies = Arc::clone(&self.proxies);
        let remote_addr = self.remote_addr;
        // The inner service is taken by the future; leave a clone behind for
        // the next request on this connection.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            let ranges = proxies.ranges().await;
            unproxy_request(&mut req, remote_addr, ranges);
            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{unproxy_request, ClientAddr, Request, UnproxyService, X_FORWARDED_FOR};
    use crate::agents::{FetchError, FetchUrl, FetchUrlResult};
    use crate::config::ConfigBuilder;
    use crate::ranges::TrustedProxies;
    use crate::utils::agent::{Agent, Handler, ReplySender};
    use crate::utils::BoxFuture;
    use http::header::HeaderValue;
    use http::StatusCode;
    use hyper::service::Service;
    use hyper::Body;
    use ipnetwork::IpNetwork;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    fn test_one(
        remote_addr: &str,
        header: Option<&'static str>,
        trusted: &[&str],
        expect_addr: &str,
        expect_header: Option<&str>,
    ) {
        let remote_addr: SocketAddr = remote_addr.parse().unwrap();
        let trusted: Vec<IpNetwork> = trusted.iter().map(|net| net.parse().unwrap()).collect();

        let mut req = http::Request::new(());
        if let Some(header) = header {
            req.headers_mut()
                .insert(&*X_FORWARDED_FOR, HeaderValue::from_static(header));
        }

        unproxy_request(&mut req, remote_addr, &trusted);

        assert_eq!(
            req.extensions().get::<ClientAddr>(),
            Some(&ClientAddr(expect_addr.to_owned()))
        );
        let header = req
            .headers()
            .get(&*X_FORWARDED_FOR)
            .map(|value| value.to_str().unwrap().to_owned());
        assert_eq!(header.as_deref(), expect_header);
    }

    #[test]
    fn no_header_passes_through() {
        test_one("10.0.1.1:1234", None, &["10.0.0.0/8"], "10.0.1.1", None);
    }

    #[test]
    fn rewrites_addr_and_removes_header() {
        test_one(
            "10.0.0.99:1234",
            Some("1.2.1.2, 172.20.46.123"),
            &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"],
            "1.2.1.2",
            None,
        );
    }

    #[test]
    fn truncates_header_to_remaining_chain() {
        test_one(
            "10.0.0.99:1234",
            Some("1.2.1.2, 1.2.3.3"),
            &["10.0.0.0/8"],
            "1.2.3.3",
            Some("1.2.1.2"),
        );
    }

    #[test]
    fn untrusted_peer_left_alone() {
        test_one(
            "88.88.88.88:1234",
            Some("11.22.33.44"),
            &["10.0.0.0/8"],
            "88.88.88.88",
            Some("11.22.33.44"),
        );
    }

    #[test]
    fn v6_peer() {
        test_one(
            "[fc00::1:1]:1234",
            Some("1.2.1.2"),
            &["fc00::/7"],
            "1.2.1.2",
            None,
        );
    }

    /// Fetch transport with a canned reply.
    struct StubFetch {
        body: Option<&'static str>,
    }

    impl Agent for StubFetch {}

    impl Handler<FetchUrl> for StubFetch {
        fn handle(&mut self, _message: FetchUrl, reply: ReplySender<FetchUrl>) {
            reply.send(match self.body {
                Some(data) => Ok(FetchUrlResult {
                    data: data.to_owned(),
                }),
                None => Err(FetchError::BadStatus(StatusCode::SERVICE_UNAVAILABLE)),
            });
        }
    }

    fn test_proxies(body: Option<&'static str>) -> Arc<TrustedProxies> {
        let mut builder = ConfigBuilder::new();
        builder.fetcher = Some(Box::new(StubFetch { body }.start()));
        Arc::new(TrustedProxies::new(builder.done()))
    }

    /// Inner service that records the `ClientAddr` extension it was handed.
    #[derive(Clone)]
    struct RecordAddr {
        seen: Arc<Mutex<Option<ClientAddr>>>,
    }

    impl Service<Request> for RecordAddr {
        type Response = hyper::Response<Body>;
        type Error = hyper::Error;
        type Future = BoxFuture<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request) -> Self::Future {
            *self.seen.lock().unwrap() = req.extensions().get::<ClientAddr>().cloned();
            Box::pin(async { Ok(hyper::Response::new(Body::empty())) })
        }
    }

    #[tokio::test]
    async fn service_delegates_with_resolved_addr() {
        let seen = Arc::new(Mutex::new(None));
        let inner = RecordAddr {
            seen: Arc::clone(&seen),
        };

        let remote_addr = "10.0.0.99:1234".parse().unwrap();
        let mut service = UnproxyService::with_remote_addr(test_proxies(None), remote_addr, inner);

        let mut req = Request::new(Body::empty());
        req.headers_mut().insert(
            &*X_FORWARDED_FOR,
            HeaderValue::from_static("1.2.1.2, 172.20.46.123"),
        );

        let res = service.call(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(*seen.lock().unwrap(), Some(ClientAddr("1.2.1.2".to_owned())));
    }

    #[tokio::test]
    async fn service_always_delegates() {
        let seen = Arc::new(Mutex::new(None));
        let inner = RecordAddr {
            seen: Arc::clone(&seen),
        };

        let remote_addr = "88.88.88.88:1234".parse().unwrap();
        let mut service = UnproxyService::with_remote_addr(test_proxies(None), remote_addr, inner);

        let res = service.call(Request::new(Body::empty())).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        // The peer itself is the client when no header is present.
        assert_eq!(
            *seen.lock().unwrap(),
            Some(ClientAddr("88.88.88.88".to_owned()))
        );
    }
}
