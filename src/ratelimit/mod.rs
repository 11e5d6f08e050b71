//! Sliding-window rate limiting keyed by `(route class, principal)`.
//!
//! The window is the standard two-bucket approximation: the previous
//! window's count is weighted by its remaining overlap and added to the
//! current count. State is explicit values behind one mutex — no ambient
//! globals — and lives in-process (the distributed counter backend is an
//! external collaborator; this is the mandated fallback).
//!
//! Principal selection prefers the authenticated tenant; anonymous routes
//! fall back to the client IP, extracted from trusted proxy headers in
//! fixed precedence with private/loopback/CGNAT ranges excluded.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Upload,
    Search,
    Auth,
    Export,
    Default,
}

#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug)]
struct WindowState {
    start: Instant,
    current: u32,
    previous: u32,
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed,
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

pub struct RateLimiter {
    quotas: HashMap<RouteClass, Quota>,
    state: Mutex<HashMap<(RouteClass, String), WindowState>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let minute = Duration::from_secs(60);
        let hour = Duration::from_secs(3600);
        let quotas = HashMap::from([
            (RouteClass::Upload, Quota { limit: config.upload_per_minute, window: minute }),
            (RouteClass::Search, Quota { limit: config.search_per_minute, window: minute }),
            (RouteClass::Auth, Quota { limit: config.auth_per_minute, window: minute }),
            (RouteClass::Export, Quota { limit: config.export_per_hour, window: hour }),
            (RouteClass::Default, Quota { limit: config.default_per_minute, window: minute }),
        ]);
        Self {
            quotas,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn quota(&self, class: RouteClass) -> Quota {
        self.quotas[&class]
    }

    /// Check and consume one unit for `(class, principal)`
    pub fn check(&self, class: RouteClass, principal: &str) -> Decision {
        self.check_at(class, principal, Instant::now())
    }

    fn check_at(&self, class: RouteClass, principal: &str, now: Instant) -> Decision {
        let quota = self.quotas[&class];
        let window = quota.window;

        let mut state = self.state.lock().expect("rate limit state poisoned");
        let entry = state
            .entry((class, principal.to_string()))
            .or_insert(WindowState {
                start: now,
                current: 0,
                previous: 0,
            });

        let elapsed = now.saturating_duration_since(entry.start);
        if elapsed >= window * 2 {
            entry.start = now;
            entry.current = 0;
            entry.previous = 0;
        } else if elapsed >= window {
            entry.start += window;
            entry.previous = entry.current;
            entry.current = 0;
        }

        let fraction = now.saturating_duration_since(entry.start).as_secs_f64()
            / window.as_secs_f64();
        let weighted = entry.previous as f64 * (1.0 - fraction) + entry.current as f64;

        if weighted + 1.0 > quota.limit as f64 {
            let retry_after = window.saturating_sub(now.saturating_duration_since(entry.start));
            Decision::Limited { retry_after }
        } else {
            entry.current += 1;
            Decision::Allowed
        }
    }
}

/// Pick the client IP: `Forwarded`, then `X-Forwarded-For`, then
/// `X-Real-IP`, then the socket peer, skipping any address in a
/// private/loopback/CGNAT range (a spoofer can inject those freely).
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    if let Some(value) = headers.get("forwarded").and_then(|v| v.to_str().ok()) {
        for part in value.split(';').flat_map(|s| s.split(',')) {
            if let Some(raw) = part.trim().strip_prefix("for=") {
                if let Some(ip) = parse_forwarded_ip(raw) {
                    if is_routable(ip) {
                        return Some(ip);
                    }
                }
            }
        }
    }

    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        for raw in value.split(',') {
            if let Ok(ip) = raw.trim().parse::<IpAddr>() {
                if is_routable(ip) {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        if is_routable(ip) {
            return Some(ip);
        }
    }

    peer
}

fn parse_forwarded_ip(raw: &str) -> Option<IpAddr> {
    let cleaned = raw.trim_matches('"');
    // bracketed IPv6 with optional port, or bare IPv4[:port]
    if let Some(rest) = cleaned.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = cleaned.parse() {
        return Some(ip);
    }
    cleaned.split(':').next()?.parse().ok()
}

fn is_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                // CGNAT 100.64.0.0/10
                || (octets[0] == 100 && (64..128).contains(&octets[1])))
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            !(v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local, fe80::/10 link-local
                || (segments[0] & 0xfe00) == 0xfc00
                || (segments[0] & 0xffc0) == 0xfe80)
        }
    }
}
