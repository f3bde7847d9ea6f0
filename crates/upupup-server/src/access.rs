//! IP access control: the global allowlist and client IP resolution behind
//! trusted proxies.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ipnet::IpNet;

use crate::state::AppState;

/// Controls which addresses can reach the server. An empty allowlist admits
/// everyone.
#[derive(Debug, Default)]
pub struct Allowlist {
    networks: Vec<IpNet>,
    addresses: HashSet<IpAddr>,
    allow_all: bool,
}

impl Allowlist {
    /// Builds an allowlist from CIDR or bare IP entries.
    pub fn new(entries: &[String]) -> Result<Self> {
        let mut allowlist = Allowlist::default();
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if entry.contains('/') {
                let network: IpNet =
                    entry.parse().with_context(|| format!("parse cidr {entry:?}"))?;
                allowlist.networks.push(network);
            } else {
                let ip: IpAddr =
                    entry.parse().with_context(|| format!("parse ip {entry:?}"))?;
                allowlist.addresses.insert(ip);
            }
        }
        if allowlist.networks.is_empty() && allowlist.addresses.is_empty() {
            allowlist.allow_all = true;
        }
        Ok(allowlist)
    }

    pub fn allowed(&self, ip: Option<IpAddr>) -> bool {
        if self.allow_all {
            return true;
        }
        let Some(ip) = ip else {
            return false;
        };
        self.addresses.contains(&ip) || self.networks.iter().any(|network| network.contains(&ip))
    }
}

/// Parses a list of CIDRs for the trusted-proxy set.
pub fn parse_cidrs(entries: &[String]) -> Result<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .with_context(|| format!("parse cidr {entry:?}"))
        })
        .collect()
}

/// The resolved client address, stored as a request extension by the access
/// middleware.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub String);

/// Resolves the client IP. `X-Forwarded-For` wins (leftmost valid address)
/// when the immediate peer is a trusted proxy, or when no proxies are
/// configured at all.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpNet],
) -> (Option<IpAddr>, String) {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let proxy_trusted =
            trusted_proxies.is_empty() || peer.is_some_and(|p| last_hop_trusted(p.ip(), trusted_proxies));
        if proxy_trusted {
            for part in xff.split(',') {
                if let Ok(ip) = part.trim().parse::<IpAddr>() {
                    return (Some(ip), ip.to_string());
                }
            }
        }
    }
    match peer {
        Some(addr) => (Some(addr.ip()), addr.ip().to_string()),
        None => (None, String::new()),
    }
}

fn last_hop_trusted(peer: IpAddr, trusted: &[IpNet]) -> bool {
    trusted.iter().any(|network| network.contains(&peer))
}

/// Rejects disallowed addresses with 403 and attaches the resolved client
/// address for downstream handlers.
pub async fn ip_allow_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let (ip, ip_str) = client_ip(request.headers(), peer, &state.trusted_proxies);
    if !state.allowlist.allowed(ip) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    request.extensions_mut().insert(ClientIp(ip_str));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(xff: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = xff {
            headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn empty_allowlist_allows_everyone() {
        let allowlist = Allowlist::new(&[]).unwrap();
        assert!(allowlist.allowed(Some("203.0.113.9".parse().unwrap())));
        assert!(allowlist.allowed(None));
    }

    #[test]
    fn allowlist_matches_addresses_and_cidrs() {
        let allowlist =
            Allowlist::new(&["10.0.0.0/8".to_string(), "192.0.2.7".to_string()]).unwrap();
        assert!(allowlist.allowed(Some("10.1.2.3".parse().unwrap())));
        assert!(allowlist.allowed(Some("192.0.2.7".parse().unwrap())));
        assert!(!allowlist.allowed(Some("203.0.113.9".parse().unwrap())));
        assert!(!allowlist.allowed(None));
    }

    #[test]
    fn allowlist_rejects_garbage_entries() {
        assert!(Allowlist::new(&["not-an-ip".to_string()]).is_err());
        assert!(Allowlist::new(&["10.0.0.0/99".to_string()]).is_err());
    }

    #[test]
    fn xff_is_honoured_without_trusted_proxies() {
        let (ip, ip_str) = client_ip(
            &headers(Some("198.51.100.4, 10.0.0.1")),
            peer("127.0.0.1:9999"),
            &[],
        );
        assert_eq!(ip, Some("198.51.100.4".parse().unwrap()));
        assert_eq!(ip_str, "198.51.100.4");
    }

    #[test]
    fn xff_requires_trusted_peer_when_proxies_configured() {
        let trusted = parse_cidrs(&["10.0.0.0/8".to_string()]).unwrap();

        // peer outside the proxy set: header ignored
        let (ip, _) = client_ip(
            &headers(Some("198.51.100.4")),
            peer("203.0.113.1:1234"),
            &trusted,
        );
        assert_eq!(ip, Some("203.0.113.1".parse().unwrap()));

        // trusted peer: leftmost valid forwarded address wins
        let (ip, _) = client_ip(
            &headers(Some("bogus, 198.51.100.4")),
            peer("10.0.0.5:1234"),
            &trusted,
        );
        assert_eq!(ip, Some("198.51.100.4".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_peer_address() {
        let (ip, ip_str) = client_ip(&headers(None), peer("203.0.113.1:9100"), &[]);
        assert_eq!(ip, Some("203.0.113.1".parse().unwrap()));
        assert_eq!(ip_str, "203.0.113.1");

        let (ip, ip_str) = client_ip(&headers(None), None, &[]);
        assert_eq!(ip, None);
        assert_eq!(ip_str, "");
    }
}
