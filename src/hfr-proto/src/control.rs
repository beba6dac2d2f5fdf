// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! TLV control-message codec for the radio daemon's status-group protocol
//! (spec §4.1, §6). The controller does not wait for or parse a reply; the
//! data plane (RTP emergence) is the only acknowledgment it relies on.

const TAG_TUNE_CHANNEL: u8 = 1;
const TAG_CONFIGURE_SPECTRUM: u8 = 2;
const TAG_TEARDOWN_CHANNEL: u8 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    TuneChannel {
        ssrc: u32,
        center_hz: u64,
        mode: String,
        low_edge_hz: i32,
        high_edge_hz: i32,
        sample_rate: u32,
    },
    ConfigureSpectrum {
        ssrc: u32,
        center_hz: u64,
        bin_bw_hz: u32,
        bin_count: u32,
    },
    TeardownChannel {
        ssrc: u32,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlCodecError {
    #[error("control message too short")]
    Truncated,
    #[error("unknown control tag {0}")]
    UnknownTag(u8),
    #[error("mode string is not valid utf-8")]
    InvalidMode,
}

impl ControlMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        let tag = match self {
            ControlMessage::TuneChannel {
                ssrc,
                center_hz,
                mode,
                low_edge_hz,
                high_edge_hz,
                sample_rate,
            } => {
                payload.extend_from_slice(&ssrc.to_be_bytes());
                payload.extend_from_slice(&center_hz.to_be_bytes());
                payload.push(mode.len() as u8);
                payload.extend_from_slice(mode.as_bytes());
                payload.extend_from_slice(&low_edge_hz.to_be_bytes());
                payload.extend_from_slice(&high_edge_hz.to_be_bytes());
                payload.extend_from_slice(&sample_rate.to_be_bytes());
                TAG_TUNE_CHANNEL
            }
            ControlMessage::ConfigureSpectrum {
                ssrc,
                center_hz,
                bin_bw_hz,
                bin_count,
            } => {
                payload.extend_from_slice(&ssrc.to_be_bytes());
                payload.extend_from_slice(&center_hz.to_be_bytes());
                payload.extend_from_slice(&bin_bw_hz.to_be_bytes());
                payload.extend_from_slice(&bin_count.to_be_bytes());
                TAG_CONFIGURE_SPECTRUM
            }
            ControlMessage::TeardownChannel { ssrc } => {
                payload.extend_from_slice(&ssrc.to_be_bytes());
                TAG_TEARDOWN_CHANNEL
            }
        };

        let mut out = Vec::with_capacity(3 + payload.len());
        out.push(tag);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ControlCodecError> {
        if buf.len() < 3 {
            return Err(ControlCodecError::Truncated);
        }
        let tag = buf[0];
        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let payload = buf.get(3..3 + len).ok_or(ControlCodecError::Truncated)?;

        match tag {
            TAG_TUNE_CHANNEL => {
                if payload.len() < 13 {
                    return Err(ControlCodecError::Truncated);
                }
                let ssrc = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let center_hz = u64::from_be_bytes(payload[4..12].try_into().unwrap());
                let mode_len = payload[12] as usize;
                let mode_start = 13;
                let mode_end = mode_start + mode_len;
                let mode_bytes = payload
                    .get(mode_start..mode_end)
                    .ok_or(ControlCodecError::Truncated)?;
                let mode = String::from_utf8(mode_bytes.to_vec())
                    .map_err(|_| ControlCodecError::InvalidMode)?;
                let rest = payload
                    .get(mode_end..mode_end + 12)
                    .ok_or(ControlCodecError::Truncated)?;
                let low_edge_hz = i32::from_be_bytes(rest[0..4].try_into().unwrap());
                let high_edge_hz = i32::from_be_bytes(rest[4..8].try_into().unwrap());
                let sample_rate = u32::from_be_bytes(rest[8..12].try_into().unwrap());
                Ok(ControlMessage::TuneChannel {
                    ssrc,
                    center_hz,
                    mode,
                    low_edge_hz,
                    high_edge_hz,
                    sample_rate,
                })
            }
            TAG_CONFIGURE_SPECTRUM => {
                if payload.len() < 20 {
                    return Err(ControlCodecError::Truncated);
                }
                let ssrc = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let center_hz = u64::from_be_bytes(payload[4..12].try_into().unwrap());
                let bin_bw_hz = u32::from_be_bytes(payload[12..16].try_into().unwrap());
                let bin_count = u32::from_be_bytes(payload[16..20].try_into().unwrap());
                Ok(ControlMessage::ConfigureSpectrum {
                    ssrc,
                    center_hz,
                    bin_bw_hz,
                    bin_count,
                })
            }
            TAG_TEARDOWN_CHANNEL => {
                if payload.len() < 4 {
                    return Err(ControlCodecError::Truncated);
                }
                let ssrc = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                Ok(ControlMessage::TeardownChannel { ssrc })
            }
            other => Err(ControlCodecError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tune_channel_round_trips() {
        let msg = ControlMessage::TuneChannel {
            ssrc: 0xdead_beef,
            center_hz: 14_203_500,
            mode: "usb".into(),
            low_edge_hz: 300,
            high_edge_hz: 2700,
            sample_rate: 12_000,
        };
        let encoded = msg.encode();
        assert_eq!(ControlMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn configure_spectrum_round_trips() {
        let msg = ControlMessage::ConfigureSpectrum {
            ssrc: 42,
            center_hz: 7_100_000,
            bin_bw_hz: 500,
            bin_count: 512,
        };
        let encoded = msg.encode();
        assert_eq!(ControlMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn teardown_round_trips() {
        let msg = ControlMessage::TeardownChannel { ssrc: 7 };
        let encoded = msg.encode();
        assert_eq!(ControlMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        assert_eq!(
            ControlMessage::decode(&[1, 0]),
            Err(ControlCodecError::Truncated)
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            ControlMessage::decode(&[99, 0, 0]),
            Err(ControlCodecError::UnknownTag(99))
        );
    }
}
