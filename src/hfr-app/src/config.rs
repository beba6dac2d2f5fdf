// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Tiered TOML configuration (spec §10.2), grounded on the reference
//! app crate's `ConfigFile` trait: the same CWD → XDG → `/etc` search
//! order, every field defaulted so a missing file just runs with
//! defaults, and a `thiserror` `ConfigError` instead of a panic.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Search paths for `hfr.toml`, CWD first (spec §10.2).
fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("hfr.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("hfr").join("hfr.toml"));
    }
    paths.push(PathBuf::from("/etc/hfr/hfr.toml"));
    paths
}

fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
}

/// Search the default tiers and load the first file found, or fall back
/// to an all-default config when none exist.
pub fn load() -> Result<(Config, Option<PathBuf>), ConfigError> {
    for path in search_paths() {
        if path.exists() {
            return Ok((load_from_file(&path)?, Some(path)));
        }
    }
    Ok((Config::default(), None))
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    load_from_file(path)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_interface: SocketAddr,
    pub status_group: SocketAddr,
    pub data_group: SocketAddr,
    pub ssrc_range_start: u32,
    pub ssrc_range_end: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            bind_interface: "0.0.0.0:0".parse().unwrap(),
            status_group: "239.10.10.1:17000".parse().unwrap(),
            data_group: "239.10.10.2:17001".parse().unwrap(),
            ssrc_range_start: 1,
            ssrc_range_end: 65_535,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub max_sessions_per_ip: usize,
    pub session_timeout_ms: u64,
    pub max_session_time_ms: u64,
    pub enforce_session_ip_match: bool,
    pub uuid_binding_ttl_ms: u64,
    pub audio_ring_depth: usize,
    pub sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_sessions: 200,
            max_sessions_per_ip: 4,
            session_timeout_ms: 600_000,
            max_session_time_ms: 0,
            enforce_session_ip_match: true,
            uuid_binding_ttl_ms: 86_400_000,
            audio_ring_depth: 32,
            sample_rate: 12_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub default_center_frequency_hz: u64,
    pub default_bin_count: u32,
    pub default_bin_bandwidth_hz: u32,
    pub delta_threshold_db: f32,
    pub full_frame_escalation_ratio: f32,
    pub writer_channel_depth: usize,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        SpectrumConfig {
            default_center_frequency_hz: 14_200_000,
            default_bin_count: 512,
            default_bin_bandwidth_hz: 500,
            delta_threshold_db: 3.0,
            full_frame_escalation_ratio: 0.8,
            writer_channel_depth: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub conn_per_sec: f64,
    pub preflight_per_min: f64,
    pub cmd_per_sec: f64,
    pub endpoint_per_sec: f64,
    pub login_max_attempts: u32,
    pub login_window_secs: u64,
    pub login_ban_duration_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            conn_per_sec: 2.0,
            preflight_per_min: 30.0,
            cmd_per_sec: 5.0,
            endpoint_per_sec: 10.0,
            login_max_attempts: 4,
            login_window_secs: 300,
            login_ban_duration_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub bypass_ips: Vec<String>,
    pub admin_password: Option<String>,
    pub public_iq_modes: Vec<String>,
    pub tunnel_servers: Vec<String>,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub min_confidence: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        VadConfig { min_confidence: 0.7 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_addr: SocketAddr,
    pub gzip: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            gzip: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub ban_list_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "info".to_string(),
            ban_list_path: "hfr-bans.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub spectrum: SpectrumConfig,
    pub rate_limit: RateLimitConfig,
    pub access: AccessConfig,
    pub vad: VadConfig,
    pub http: HttpConfig,
    pub general: GeneralConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.session.max_sessions, 200);
        assert!(cfg.network.ssrc_range_start <= cfg.network.ssrc_range_end);
    }

    #[test]
    fn parses_partial_toml_with_section_defaults() {
        let toml_src = r#"
            [general]
            log_level = "debug"

            [session]
            max_sessions = 50
        "#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.general.log_level, "debug");
        assert_eq!(cfg.session.max_sessions, 50);
        assert_eq!(cfg.session.max_sessions_per_ip, 4);
    }
}
