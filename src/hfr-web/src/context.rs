// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! `AppContext`: the single piece of shared state every handler reads from,
//! passed in explicitly rather than reached for through a process-wide
//! global (spec §9's redesign note). Built once in `hfr-app::main` and
//! cloned (it is all `Arc`/plain data) into each actix worker.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hfr_core::session::SpectrumParams;
use hfr_session::{BanList, RateLimitMatrix, SessionManager, VoiceActivityDetector};

/// Glue-level knobs that don't belong in `hfr-core`/`hfr-session` but that
/// the HTTP surface needs (spec §10.2 `[access]`/`[http]` sections).
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub bypass_ips: HashSet<IpAddr>,
    pub admin_password: Option<String>,
    pub public_iq_modes: Vec<String>,
    pub tunnel_servers: HashSet<IpAddr>,
    pub cors_origins: Vec<String>,
    pub session_timeout_ms: u64,
    pub max_session_time_ms: u64,
    pub login_max_attempts: u32,
    pub login_ban_duration: Duration,
}

/// `[spectrum]` defaults (spec §10.2), applied the moment a spectrum session
/// is created (spec §8 scenario 1: the first frame carries the configured
/// default center frequency) and consulted by the zoom/pan smart logic.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumConfig {
    pub defaults: SpectrumParams,
    pub delta_threshold_db: f32,
    pub full_frame_escalation_ratio: f32,
    pub writer_channel_depth: usize,
}

/// Counters surfaced on `/status` (SPEC_FULL §12).
#[derive(Debug, Default)]
pub struct Metrics {
    pub dropped_audio_frames: AtomicU64,
    pub dropped_spectrum_frames: AtomicU64,
    pub rate_limited_requests: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.dropped_audio_frames.load(Ordering::Relaxed),
            self.dropped_spectrum_frames.load(Ordering::Relaxed),
            self.rate_limited_requests.load(Ordering::Relaxed),
        )
    }
}

pub struct AppContext {
    pub sessions: Arc<SessionManager>,
    pub rate_limits: Arc<RateLimitMatrix>,
    pub bans: Arc<BanList>,
    pub vad: Arc<VoiceActivityDetector>,
    pub access: AccessConfig,
    pub spectrum: SpectrumConfig,
    pub metrics: Arc<Metrics>,
}

impl AppContext {
    /// Resolve whether `ip`/`password` grants bypass status (spec §3, §4.3
    /// item 3: IP on the bypass list, or the correct admin password).
    pub fn resolve_bypass(&self, ip: IpAddr, password: Option<&str>) -> bool {
        if self.access.bypass_ips.contains(&ip) {
            return true;
        }
        match (&self.access.admin_password, password) {
            (Some(expected), Some(supplied)) => constant_time_eq(expected, supplied),
            _ => false,
        }
    }

    pub fn check_admin_password(&self, supplied: &str) -> bool {
        self.access
            .admin_password
            .as_deref()
            .map(|expected| constant_time_eq(expected, supplied))
            .unwrap_or(false)
    }
}

/// Constant-time string comparison (spec §10.4), grounded on the reference
/// codebase's own `constant_time_eq` in its session-auth module.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a_bytes.iter().zip(b_bytes.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_length_mismatch_and_content_mismatch() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secre"));
        assert!(!constant_time_eq("secret", "wrongg"));
    }
}
