// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Rate-Limit / Quota Matrix (spec §4.6): typed token buckets so every call
//! site looks the same, keyed by IP or UUID depending on the bucket.
//! Grounded on the login-throttle counter/window logic in
//! `trx-frontend-http::auth`.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// A single token bucket: refills continuously at `refill_per_sec`, burst
/// capacity equals the refill rate (spec §4.6: "burst = refill").
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(refill_per_sec: f64, now: Instant) -> Self {
        TokenBucket {
            capacity: refill_per_sec,
            refill_per_sec,
            tokens: refill_per_sec,
            last_refill: now,
        }
    }

    fn try_consume(&mut self, now: Instant, cost: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// A keyed family of token buckets, one per distinct key (IP or UUID),
/// created lazily on first use.
pub struct KeyedLimiter<K> {
    refill_per_sec: f64,
    buckets: Mutex<HashMap<K, TokenBucket>>,
}

impl<K: Eq + Hash + Clone> KeyedLimiter<K> {
    pub fn new(refill_per_sec: f64) -> Self {
        KeyedLimiter {
            refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the request is allowed (a token was consumed).
    pub fn check(&self, key: K) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: K, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().expect("limiter mutex poisoned");
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(self.refill_per_sec, now));
        bucket.try_consume(now, 1.0)
    }

    pub fn cleanup_idle(&self, idle_after: Duration) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("limiter mutex poisoned");
        buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < idle_after);
    }
}

/// Per-IP failed-login counter/window (spec §4.6, §8 scenario 3): after
/// `max_attempts` failures inside `window`, the caller should ban the IP.
struct LoginWindow {
    count: u32,
    window_start: Instant,
}

pub struct LoginThrottle {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, LoginWindow>>,
}

impl LoginThrottle {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        LoginThrottle {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failed login attempt. Returns `true` once this call pushes
    /// the IP over `max_attempts` within the window (the caller should then
    /// ban it with source `rate_limiter`).
    pub fn record_failure(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("login throttle mutex poisoned");
        let entry = windows.entry(ip).or_insert_with(|| LoginWindow {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(entry.window_start) > self.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        entry.count > self.max_attempts
    }

    pub fn reset(&self, ip: IpAddr) {
        self.windows
            .lock()
            .expect("login throttle mutex poisoned")
            .remove(&ip);
    }
}

/// A command class consumes one token from a class-scoped bucket —
/// audio and spectrum commands are independent buckets (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Audio,
    Spectrum,
}

/// Every rate-limited call site in the system goes through this matrix.
pub struct RateLimitMatrix {
    pub conn_per_ip: KeyedLimiter<IpAddr>,
    pub preflight_per_ip: KeyedLimiter<IpAddr>,
    pub cmd_per_uuid_audio: KeyedLimiter<Uuid>,
    pub cmd_per_uuid_spectrum: KeyedLimiter<Uuid>,
    pub endpoint_per_ip: KeyedLimiter<(IpAddr, &'static str)>,
    pub login_per_ip: LoginThrottle,
}

impl RateLimitMatrix {
    pub fn new(
        conn_per_sec: f64,
        preflight_per_min: f64,
        cmd_per_sec: f64,
        endpoint_per_sec: f64,
        max_login_attempts: u32,
        login_window: Duration,
    ) -> Self {
        RateLimitMatrix {
            conn_per_ip: KeyedLimiter::new(conn_per_sec),
            preflight_per_ip: KeyedLimiter::new(preflight_per_min / 60.0),
            cmd_per_uuid_audio: KeyedLimiter::new(cmd_per_sec),
            cmd_per_uuid_spectrum: KeyedLimiter::new(cmd_per_sec),
            endpoint_per_ip: KeyedLimiter::new(endpoint_per_sec),
            login_per_ip: LoginThrottle::new(max_login_attempts, login_window),
        }
    }

    pub fn check_command(&self, uuid: Uuid, class: CommandClass) -> bool {
        match class {
            CommandClass::Audio => self.cmd_per_uuid_audio.check(uuid),
            CommandClass::Spectrum => self.cmd_per_uuid_spectrum.check(uuid),
        }
    }

    /// Drop buckets that have been idle for `idle_after` so the per-key maps
    /// don't grow without bound for keys (IPs, UUIDs) that never come back.
    pub fn cleanup_idle(&self, idle_after: Duration) {
        self.conn_per_ip.cleanup_idle(idle_after);
        self.preflight_per_ip.cleanup_idle(idle_after);
        self.cmd_per_uuid_audio.cleanup_idle(idle_after);
        self.cmd_per_uuid_spectrum.cleanup_idle(idle_after);
        self.endpoint_per_ip.cleanup_idle(idle_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_depletes_and_refills() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(2.0, now);
        assert!(bucket.try_consume(now, 1.0));
        assert!(bucket.try_consume(now, 1.0));
        assert!(!bucket.try_consume(now, 1.0));

        let later = now + Duration::from_millis(600);
        assert!(bucket.try_consume(later, 1.0));
    }

    #[test]
    fn keyed_limiter_tracks_independent_keys() {
        let limiter: KeyedLimiter<IpAddr> = KeyedLimiter::new(1.0);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }

    #[test]
    fn login_throttle_trips_after_max_attempts() {
        let throttle = LoginThrottle::new(4, Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        for _ in 0..4 {
            assert!(!throttle.record_failure(ip));
        }
        assert!(throttle.record_failure(ip));
    }

    #[test]
    fn login_throttle_reset_clears_state() {
        let throttle = LoginThrottle::new(1, Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        assert!(throttle.record_failure(ip));
        throttle.reset(ip);
        assert!(!throttle.record_failure(ip));
    }
}
