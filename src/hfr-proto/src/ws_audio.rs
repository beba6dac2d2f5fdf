// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! WebSocket audio protocol (spec §4.4, §6): inbound JSON commands tagged
//! by `type`, and the outbound binary frame header. Grounded directly on
//! `trx-core::client`'s `ClientCommand`/`ClientResponse` tagged-enum
//! pattern — one variant per inbound command, unknown tags rejected by
//! serde itself rather than duck-typed (spec §9 redesign note).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioCommand {
    Tune {
        frequency: u64,
        mode: String,
        low: i32,
        high: i32,
    },
    SetMode {
        mode: String,
    },
    SetPassband {
        low: i32,
        high: i32,
    },
    Ping,
    GetStatus,
}

impl AudioCommand {
    /// `ping` is exempt from the per-UUID audio command bucket (spec §4.4).
    pub fn consumes_rate_limit_token(&self) -> bool {
        !matches!(self, AudioCommand::Ping)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioResponse {
    Pong,
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
    Status {
        #[serde(rename = "sessionId")]
        session_id: String,
        frequency: u64,
        mode: String,
    },
}

/// The magic prefix for outbound audio binary frames (spec §6).
pub const AUDIO_FRAME_MAGIC: [u8; 4] = *b"AUD ";

/// Header preceding every outbound audio binary frame: magic, sequence
/// number, monotonic nanosecond timestamp, sample rate — all little-endian
/// per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFrameHeader {
    pub seq: u32,
    pub ts_ns: u64,
    pub sample_rate: u32,
}

impl AudioFrameHeader {
    pub const ENCODED_LEN: usize = 20;

    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN + payload.len());
        out.extend_from_slice(&AUDIO_FRAME_MAGIC);
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&self.ts_ns.to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < Self::ENCODED_LEN || buf[0..4] != AUDIO_FRAME_MAGIC {
            return None;
        }
        let seq = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let ts_ns = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let sample_rate = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        Some((
            AudioFrameHeader {
                seq,
                ts_ns,
                sample_rate,
            },
            &buf[Self::ENCODED_LEN..],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tune_command() {
        let json = r#"{"type":"tune","frequency":14203500,"mode":"usb","low":300,"high":2700}"#;
        let cmd: AudioCommand = serde_json::from_str(json).unwrap();
        assert_eq!(
            cmd,
            AudioCommand::Tune {
                frequency: 14_203_500,
                mode: "usb".into(),
                low: 300,
                high: 2700,
            }
        );
    }

    #[test]
    fn ping_does_not_consume_token() {
        assert!(!AudioCommand::Ping.consumes_rate_limit_token());
        assert!(AudioCommand::GetStatus.consumes_rate_limit_token());
    }

    #[test]
    fn unknown_command_tag_fails_to_parse() {
        let json = r#"{"type":"nonsense"}"#;
        assert!(serde_json::from_str::<AudioCommand>(json).is_err());
    }

    #[test]
    fn audio_frame_header_round_trips() {
        let header = AudioFrameHeader {
            seq: 7,
            ts_ns: 123_456_789,
            sample_rate: 12_000,
        };
        let encoded = header.encode(&[1, 2, 3]);
        let (decoded, payload) = AudioFrameHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn pong_response_serializes_without_extra_fields() {
        let json = serde_json::to_string(&AudioResponse::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }
}
