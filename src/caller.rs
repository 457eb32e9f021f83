//! Caller identification for rate limiting.

use axum::http::HeaderMap;
use std::net::IpAddr;

/// Bucket shared by every caller whose address cannot be determined.
pub const UNKNOWN_CALLER: &str = "unknown";

/// Pick the identifier used to key the rate limiter.
///
/// With `trust_proxy_headers` set, `CF-Connecting-IP` and then the first
/// `X-Forwarded-For` hop win over the socket address. Otherwise only the
/// socket address counts, since the headers are caller supplied.
pub fn caller_id(headers: &HeaderMap, direct_ip: Option<IpAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = header_ip(headers, "cf-connecting-ip") {
            return ip.to_string();
        }

        if let Some(first) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|xff| xff.split(',').next())
        {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip.to_string();
            }
        }
    }

    direct_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
