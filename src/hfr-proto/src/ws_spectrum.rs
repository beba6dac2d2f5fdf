// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! WebSocket spectrum protocol (spec §4.5, §6): inbound JSON commands, the
//! `config` frame, and the full/delta binary frame codec. The *stateful*
//! side of delta encoding (holding the previous frame, deciding full vs.
//! delta) lives in `hfr-web::ws_spectrum` next to the writer task — this
//! module only knows how to turn frame data into bytes and back, the same
//! separation `trx-protocol::codec` keeps from its stateful callers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Binary32,
    Binary8,
}

impl WireFormat {
    pub fn from_query(mode: Option<&str>) -> Self {
        match mode {
            Some("binary8") => WireFormat::Binary8,
            _ => WireFormat::Binary32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpectrumCommand {
    Zoom {
        frequency: Option<u64>,
        #[serde(rename = "binBandwidth")]
        bin_bandwidth: Option<u32>,
    },
    Pan {
        frequency: Option<u64>,
        #[serde(rename = "binBandwidth")]
        bin_bandwidth: Option<u32>,
    },
    Reset,
    GetStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpectrumResponse {
    Config {
        #[serde(rename = "centerFreq")]
        center_freq: u64,
        #[serde(rename = "binCount")]
        bin_count: u32,
        #[serde(rename = "binBandwidth")]
        bin_bandwidth: u32,
        #[serde(rename = "totalBandwidth")]
        total_bandwidth: u64,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
    /// Voice-activity detections surfaced for the band currently in view
    /// (spec §4.7, co-located with the spectrum handler per spec §4.5).
    Detections {
        detections: Vec<VoiceDetectionWire>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceDetectionWire {
    pub mode: &'static str,
    #[serde(rename = "dialFreq")]
    pub dial_freq: u64,
    #[serde(rename = "altDialFreqs")]
    pub alt_dial_freqs: Vec<u64>,
    pub confidence: f32,
    #[serde(rename = "lowerEdge")]
    pub lower_edge_hz: u64,
    #[serde(rename = "upperEdge")]
    pub upper_edge_hz: u64,
}

pub const SPECTRUM_FRAME_MAGIC: [u8; 4] = *b"SPEC";
pub const SPECTRUM_FRAME_VERSION: u8 = 1;

const FLAG_FULL_F32: u8 = 0x01;
const FLAG_DELTA_F32: u8 = 0x02;
const FLAG_FULL_U8: u8 = 0x03;
const FLAG_DELTA_U8: u8 = 0x04;

/// Header layout: magic(4) + version(1) + flag(1) + ts_ns(8) + frequency(8)
/// = 22 bytes, matching spec §4.5's "22-byte header".
pub const FRAME_HEADER_LEN: usize = 22;

/// Map a dB magnitude to the `binary8` byte range. Linear mapping with a
/// 256 dB offset: `-256 dB -> 0`, `0 dB -> 255` (clamped). Encode and decode
/// share this formula so a round trip through `binary8` is internally
/// exact up to 1 dB of quantization, satisfying the delta round-trip
/// property (spec §8) for the u8 wire format.
pub fn encode_db_u8(db: f32) -> u8 {
    (db + 256.0).round().clamp(0.0, 255.0) as u8
}

pub fn decode_db_u8(byte: u8) -> f32 {
    byte as f32 - 256.0
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpectrumFrameBody {
    Full(Vec<f32>),
    Delta(Vec<(u16, f32)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub ts_ns: u64,
    pub frequency: u64,
    pub wire_format: WireFormat,
    pub body: SpectrumFrameBody,
}

impl SpectrumFrame {
    pub fn encode(&self) -> Vec<u8> {
        let is_full = matches!(self.body, SpectrumFrameBody::Full(_));
        let flag = match (is_full, self.wire_format) {
            (true, WireFormat::Binary32) => FLAG_FULL_F32,
            (true, WireFormat::Binary8) => FLAG_FULL_U8,
            (false, WireFormat::Binary32) => FLAG_DELTA_F32,
            (false, WireFormat::Binary8) => FLAG_DELTA_U8,
        };

        let mut out = Vec::new();
        out.extend_from_slice(&SPECTRUM_FRAME_MAGIC);
        out.push(SPECTRUM_FRAME_VERSION);
        out.push(flag);
        out.extend_from_slice(&self.ts_ns.to_le_bytes());
        out.extend_from_slice(&self.frequency.to_le_bytes());

        match &self.body {
            SpectrumFrameBody::Full(bins) => {
                for &bin in bins {
                    self.push_value(&mut out, bin);
                }
            }
            SpectrumFrameBody::Delta(changes) => {
                out.extend_from_slice(&(changes.len() as u16).to_le_bytes());
                for &(index, value) in changes {
                    out.extend_from_slice(&index.to_le_bytes());
                    self.push_value(&mut out, value);
                }
            }
        }

        out
    }

    fn push_value(&self, out: &mut Vec<u8>, value: f32) {
        match self.wire_format {
            WireFormat::Binary32 => out.extend_from_slice(&value.to_le_bytes()),
            WireFormat::Binary8 => out.push(encode_db_u8(value)),
        }
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_LEN || buf[0..4] != SPECTRUM_FRAME_MAGIC {
            return None;
        }
        let flag = buf[5];
        let ts_ns = u64::from_le_bytes(buf[6..14].try_into().unwrap());
        let frequency = u64::from_le_bytes(buf[14..22].try_into().unwrap());
        let (is_full, wire_format) = match flag {
            FLAG_FULL_F32 => (true, WireFormat::Binary32),
            FLAG_FULL_U8 => (true, WireFormat::Binary8),
            FLAG_DELTA_F32 => (false, WireFormat::Binary32),
            FLAG_DELTA_U8 => (false, WireFormat::Binary8),
            _ => return None,
        };

        let body_buf = &buf[FRAME_HEADER_LEN..];
        let value_len = match wire_format {
            WireFormat::Binary32 => 4,
            WireFormat::Binary8 => 1,
        };

        if is_full {
            let mut bins = Vec::with_capacity(body_buf.len() / value_len);
            for chunk in body_buf.chunks_exact(value_len) {
                bins.push(Self::read_value(chunk, wire_format));
            }
            Some(SpectrumFrame {
                ts_ns,
                frequency,
                wire_format,
                body: SpectrumFrameBody::Full(bins),
            })
        } else {
            if body_buf.len() < 2 {
                return None;
            }
            let count = u16::from_le_bytes([body_buf[0], body_buf[1]]) as usize;
            let mut changes = Vec::with_capacity(count);
            let mut offset = 2;
            let entry_len = 2 + value_len;
            for _ in 0..count {
                let entry = body_buf.get(offset..offset + entry_len)?;
                let index = u16::from_le_bytes([entry[0], entry[1]]);
                let value = Self::read_value(&entry[2..], wire_format);
                changes.push((index, value));
                offset += entry_len;
            }
            Some(SpectrumFrame {
                ts_ns,
                frequency,
                wire_format,
                body: SpectrumFrameBody::Delta(changes),
            })
        }
    }

    fn read_value(chunk: &[u8], wire_format: WireFormat) -> f32 {
        match wire_format {
            WireFormat::Binary32 => f32::from_le_bytes(chunk[0..4].try_into().unwrap()),
            WireFormat::Binary8 => decode_db_u8(chunk[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_binary32_round_trips() {
        let frame = SpectrumFrame {
            ts_ns: 42,
            frequency: 14_000_000,
            wire_format: WireFormat::Binary32,
            body: SpectrumFrameBody::Full(vec![-90.0, -45.5, 0.0]),
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HEADER_LEN + 3 * 4);
        assert_eq!(SpectrumFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn delta_frame_binary32_round_trips() {
        let frame = SpectrumFrame {
            ts_ns: 1,
            frequency: 7_100_000,
            wire_format: WireFormat::Binary32,
            body: SpectrumFrameBody::Delta(vec![(3, -12.5), (900, -80.0)]),
        };
        let encoded = frame.encode();
        assert_eq!(SpectrumFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn binary8_quantizes_but_round_trips_through_byte_mapping() {
        let original = -42.0_f32;
        let byte = encode_db_u8(original);
        let recovered = decode_db_u8(byte);
        assert!((recovered - original).abs() < 1.0);

        let frame = SpectrumFrame {
            ts_ns: 0,
            frequency: 1,
            wire_format: WireFormat::Binary8,
            body: SpectrumFrameBody::Full(vec![-256.0, -128.0, 0.0]),
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HEADER_LEN + 3);
        let decoded = SpectrumFrame::decode(&encoded).unwrap();
        match decoded.body {
            SpectrumFrameBody::Full(bins) => {
                assert!((bins[0] - (-256.0)).abs() < 1.0);
                assert!((bins[2] - 0.0).abs() < 1.0);
            }
            _ => panic!("expected full frame"),
        }
    }

    #[test]
    fn wire_format_query_parsing() {
        assert_eq!(WireFormat::from_query(Some("binary8")), WireFormat::Binary8);
        assert_eq!(WireFormat::from_query(None), WireFormat::Binary32);
        assert_eq!(WireFormat::from_query(Some("bogus")), WireFormat::Binary32);
    }

    #[test]
    fn zoom_command_parses_partial_fields() {
        let json = r#"{"type":"zoom","binBandwidth":25}"#;
        let cmd: SpectrumCommand = serde_json::from_str(json).unwrap();
        assert_eq!(
            cmd,
            SpectrumCommand::Zoom {
                frequency: None,
                bin_bandwidth: Some(25),
            }
        );
    }
}
