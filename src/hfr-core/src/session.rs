// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Data model (spec §3). Pure data — no channels, no locks, no I/O handles.
//! Runtime resources (outbound queues, the WebSocket handle) live alongside
//! a `Session` in `hfr-session`'s registry, the way `trx-core`'s `RigState`
//! holds only plain fields and the rig task owns the channel ends.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bin counts a client may request (spec §3).
pub const BIN_COUNTS: [u32; 3] = [256, 512, 1024];

/// Safe bin-bandwidth set in Hz (spec §3). `300` is included per the
/// resolved open question in spec §9 / DESIGN.md.
pub const SAFE_BIN_BANDWIDTHS: [u32; 8] = [50, 100, 200, 300, 500, 1000, 2000, 5000];

/// The full set of wide-IQ modes a bypassed session may request (spec §4.8);
/// non-bypassed sessions are restricted to the deployment's configured
/// `public_iq_modes` subset.
pub const ALL_IQ_MODES: [&str; 4] = ["iq12", "iq24", "iq48", "iq96"];

/// Snap a requested bin bandwidth to the nearest value in the safe set.
/// Values above 7500 Hz are left unsnapped (full-band view, spec §4.5).
pub fn snap_bin_bandwidth(requested: u32) -> u32 {
    if requested > 7500 {
        return requested;
    }
    *SAFE_BIN_BANDWIDTHS
        .iter()
        .min_by_key(|&&candidate| requested.abs_diff(candidate))
        .expect("SAFE_BIN_BANDWIDTHS is non-empty")
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Nanosecond timestamp for outbound frame headers (spec §6's "monotonic
/// timestamp (ns)"); wall-clock based like `now_unix_ms`, just finer grain.
pub fn now_unix_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// A session is in exactly one of these kinds (spec §3 invariant) — a
/// browser opens two sessions for full operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Audio,
    Spectrum,
}

/// Session lifecycle states (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Created,
    Tuned,
    Streaming,
    Retuning,
    Closing,
    Destroyed,
}

/// Current tuning for an audio session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningState {
    pub center_frequency_hz: u64,
    pub mode: String,
    pub low_edge_hz: i32,
    pub high_edge_hz: i32,
}

impl TuningState {
    pub fn validate(&self) -> Result<(), String> {
        if self.center_frequency_hz < 10_000 {
            return Err("center frequency below 10 kHz".into());
        }
        if self.low_edge_hz >= self.high_edge_hz {
            return Err("low passband edge must be below high edge".into());
        }
        Ok(())
    }
}

/// Current spectrum view for a spectrum session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumParams {
    pub center_frequency_hz: u64,
    pub bin_count: u32,
    pub bin_bandwidth_hz: u32,
}

impl SpectrumParams {
    pub fn total_bandwidth_hz(&self) -> u64 {
        self.bin_count as u64 * self.bin_bandwidth_hz as u64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.center_frequency_hz < 10_000 {
            return Err("center frequency below 10 kHz".into());
        }
        if !BIN_COUNTS.contains(&self.bin_count) {
            return Err(format!("bin_count {} not in safe set", self.bin_count));
        }
        Ok(())
    }
}

/// The central entity (spec §3). Plain data: no locks, no channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_session_id: Uuid,
    pub source_ip: IpAddr,
    pub bound_ip: IpAddr,
    pub user_agent: String,
    pub created_at_ms: u64,
    pub last_active_ms: u64,
    pub kind: SessionKind,
    pub state: SessionState,
    pub tuning: Option<TuningState>,
    pub spectrum: Option<SpectrumParams>,
    pub allocated_ssrc: u32,
    pub bytes_sent: u64,
    pub dropped_frames: u64,
    pub bypassed: bool,
}

impl Session {
    pub fn is_idle(&self, now_ms: u64, session_timeout_ms: u64) -> bool {
        if self.bypassed || session_timeout_ms == 0 {
            return false;
        }
        now_ms.saturating_sub(self.last_active_ms) > session_timeout_ms
    }

    pub fn is_over_max_life(&self, now_ms: u64, max_session_time_ms: u64) -> bool {
        if self.bypassed || max_session_time_ms == 0 {
            return false;
        }
        now_ms.saturating_sub(self.created_at_ms) > max_session_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snaps_to_nearest_safe_value() {
        assert_eq!(snap_bin_bandwidth(25), 50);
        assert_eq!(snap_bin_bandwidth(300), 300);
        assert_eq!(snap_bin_bandwidth(290), 300);
        assert_eq!(snap_bin_bandwidth(260), 200);
    }

    #[test]
    fn large_values_left_unsnapped() {
        assert_eq!(snap_bin_bandwidth(8000), 8000);
    }

    #[test]
    fn tuning_rejects_subsonic_frequency() {
        let t = TuningState {
            center_frequency_hz: 5_000,
            mode: "usb".into(),
            low_edge_hz: 300,
            high_edge_hz: 2700,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn idle_detection_respects_bypass() {
        let mut s = sample_session();
        s.last_active_ms = 0;
        assert!(s.is_idle(10_000, 5_000));
        s.bypassed = true;
        assert!(!s.is_idle(10_000, 5_000));
    }

    fn sample_session() -> Session {
        Session {
            session_id: Uuid::nil(),
            user_session_id: Uuid::nil(),
            source_ip: "127.0.0.1".parse().unwrap(),
            bound_ip: "127.0.0.1".parse().unwrap(),
            user_agent: "test".into(),
            created_at_ms: 0,
            last_active_ms: 0,
            kind: SessionKind::Audio,
            state: SessionState::Created,
            tuning: None,
            spectrum: None,
            allocated_ssrc: 1,
            bytes_sent: 0,
            dropped_frames: 0,
            bypassed: false,
        }
    }
}
