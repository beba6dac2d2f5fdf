// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Client IP extraction (spec §6): peer IP, or a proxy header when the peer
//! is a configured trusted tunnel server. New logic — the reference codebase
//! has no multi-hop proxy story of its own — written in the same small
//! pure-helper style as `trx-protocol::codec`'s parse functions.

use std::collections::HashSet;
use std::net::IpAddr;

use actix_web::HttpRequest;

/// Determine the originating client IP, honoring the precedence rule in
/// spec §6: trust `X-Real-IP` only from a configured tunnel server, else
/// `X-Forwarded-For`'s first hop, else the raw peer address.
pub fn extract_client_ip(req: &HttpRequest, tunnel_servers: &HashSet<IpAddr>) -> Option<IpAddr> {
    let peer_ip = req.peer_addr().map(|a| a.ip());

    if let Some(peer) = peer_ip {
        if tunnel_servers.contains(&peer) {
            if let Some(real_ip) = header_ip(req, "x-real-ip") {
                return Some(real_ip);
            }
        }
    }

    if let Some(forwarded) = header_value(req, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            if let Some(ip) = parse_stripping_port(first.trim()) {
                return Some(ip);
            }
        }
    }

    peer_ip
}

fn header_value<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name)?.to_str().ok()
}

fn header_ip(req: &HttpRequest, name: &str) -> Option<IpAddr> {
    parse_stripping_port(header_value(req, name)?.trim())
}

/// Headers sometimes carry `ip:port`; IPv6 is bracketed (`[::1]:8080`).
fn parse_stripping_port(value: &str) -> Option<IpAddr> {
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Some(stripped) = value.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            return stripped[..end].parse().ok();
        }
    }
    value.rsplit_once(':').and_then(|(host, _port)| host.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn parses_plain_ipv4() {
        assert_eq!(
            parse_stripping_port("10.0.0.5"),
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn strips_port_from_ipv4() {
        assert_eq!(
            parse_stripping_port("10.0.0.5:4000"),
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn strips_brackets_and_port_from_ipv6() {
        assert_eq!(
            parse_stripping_port("[::1]:4000"),
            Some("::1".parse().unwrap())
        );
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "10.0.0.9, 10.0.0.1"))
            .to_http_request();
        assert_eq!(
            extract_client_ip(&req, &HashSet::new()),
            Some("10.0.0.9".parse().unwrap())
        );
    }
}
