use prometheus::{register_int_counter, IntCounter};

lazy_static::lazy_static! {
    pub static ref REQUESTS: IntCounter = register_int_counter!(
        "unproxy_requests",
        "Number of requests whose client address was resolved"
    ).unwrap();

    pub static ref PROXIES_SKIPPED: IntCounter = register_int_counter!(
        "unproxy_proxies_skipped",
        "Number of proxy addresses skipped while walking forwarding chains"
    ).unwrap();

    pub static ref FETCH_ATTEMPTS: IntCounter = register_int_counter!(
        "unproxy_range_fetch_attempts",
        "Number of attempts made to fetch the public range list"
    ).unwrap();

    pub static ref FETCH_FAILURES: IntCounter = register_int_counter!(
        "unproxy_range_fetch_failures",
        "Number of times the public range list could not be retrieved"
    ).unwrap();
}
