//! Filter that corrects client address metadata for requests arriving
//! through trusted reverse proxies.
//!
//! Wrap a hyper service in an [`UnproxyService`] and downstream handlers see
//! the real originating client: the peer address is walked backward through
//! the `X-Forwarded-For` chain past every hop inside a trusted proxy range
//! (a fixed private-network list plus the CDN ranges fetched from a public
//! range-list document), and the request's address metadata is rewritten
//! accordingly. Resolution never fails; when trust data is unavailable, no
//! addresses are skipped.

pub mod agents;
pub mod config;
pub mod metrics;
pub mod ranges;
pub mod resolve;
pub mod utils;
pub mod web;

pub use crate::config::{Config, ConfigBuilder, ConfigRc};
pub use crate::ranges::TrustedProxies;
pub use crate::resolve::{is_trusted_proxy, resolve, Resolution};
pub use crate::web::{unproxy_request, ClientAddr, Request, UnproxyService};
