use crate::metrics;
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// The outcome of resolving a peer address against a forwarding chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolution {
    /// The address determined to be the originating client.
    pub client_addr: String,
    /// The remaining forwarding chain, or `None` if the header should be
    /// removed from the request.
    pub forwarded: Option<String>,
}

/// Whether an address string falls inside one of the trusted ranges.
///
/// A string that doesn't parse as an IP address is never a proxy; garbage in
/// the chain must look like a client, not like something safe to skip past.
pub fn is_trusted_proxy(addr: &str, trusted: &[IpNetwork]) -> bool {
    match addr.parse::<IpAddr>() {
        Ok(ip) => trusted.iter().any(|net| net.contains(ip)),
        Err(_) => false,
    }
}

/// Determine the real client address of a request.
///
/// Walks the forwarding chain backward from the peer address, skipping
/// addresses inside trusted proxy ranges, until it reaches an address it
/// doesn't recognize as a proxy or runs out of chain. The result is always
/// the peer address or a verbatim chain entry, never a synthesized value.
pub fn resolve(peer_addr: &str, forwarded: Option<&str>, trusted: &[IpNetwork]) -> Resolution {
    let header = match forwarded {
        Some(value) if !value.is_empty() => value,
        _ => {
            return Resolution {
                client_addr: peer_addr.to_owned(),
                forwarded: forwarded.map(str::to_owned),
            }
        }
    };

    // Empty tokens from doubled or trailing commas survive the split; they
    // fail the trust check like any other malformed entry.
    let mut chain: Vec<&str> = header.split(',').map(str::trim).collect();

    let mut current = peer_addr;
    while is_trusted_proxy(current, trusted) {
        match chain.pop() {
            Some(hop) => {
                metrics::PROXIES_SKIPPED.inc();
                current = hop;
            }
            None => break,
        }
    }

    Resolution {
        client_addr: current.to_owned(),
        forwarded: if chain.is_empty() {
            None
        } else {
            Some(chain.join(", "))
        },
    }
}
