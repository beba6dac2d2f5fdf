// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Minimal RTP header parser for the Audio Receiver / Demultiplexer
//! (spec §4.2). Grounded on the header handling in the AES67 receiver and
//! songbird's UDP RX task (see DESIGN.md) — only the fields the demux needs
//! (sequence number, timestamp, SSRC) are exposed, payload is returned as a
//! borrowed slice so no frame is copied before the dispatch decision.

const MIN_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RtpParseError {
    #[error("packet shorter than the fixed 12-byte RTP header")]
    Truncated,
    #[error("unsupported RTP version {0}")]
    UnsupportedVersion(u8),
    #[error("header extension/CSRC length exceeds packet size")]
    BadExtensionLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
}

/// Parse an RTP packet, returning the header and a slice over the payload
/// (after CSRC list). Does not validate the payload contents — that is the
/// concern of the session's audio decoder, not the demultiplexer.
pub fn parse(data: &[u8]) -> Result<RtpPacket<'_>, RtpParseError> {
    if data.len() < MIN_HEADER_LEN {
        return Err(RtpParseError::Truncated);
    }

    let b0 = data[0];
    let version = b0 >> 6;
    if version != 2 {
        return Err(RtpParseError::UnsupportedVersion(version));
    }
    let csrc_count = (b0 & 0x0f) as usize;

    let b1 = data[1];
    let payload_type = b1 & 0x7f;

    let sequence_number = u16::from_be_bytes([data[2], data[3]]);
    let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let csrc_bytes = csrc_count * 4;
    let payload_start = MIN_HEADER_LEN + csrc_bytes;
    if payload_start > data.len() {
        return Err(RtpParseError::BadExtensionLength);
    }

    Ok(RtpPacket {
        header: RtpHeader {
            version,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
        },
        payload: &data[payload_start..],
    })
}

/// True if `b` is a later sequence number than `a`, accounting for 16-bit
/// wraparound (half-range comparison, the conventional RTP approach).
pub fn sequence_is_newer(a: u16, b: u16) -> bool {
    let diff = b.wrapping_sub(a);
    diff != 0 && diff < 0x8000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_packet(seq: u16, ts: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0x80, 0x00];
        pkt.extend_from_slice(&seq.to_be_bytes());
        pkt.extend_from_slice(&ts.to_be_bytes());
        pkt.extend_from_slice(&ssrc.to_be_bytes());
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn parses_a_well_formed_packet() {
        let pkt = build_packet(1, 1000, 0xabcd, &[1, 2, 3, 4]);
        let parsed = parse(&pkt).unwrap();
        assert_eq!(parsed.header.ssrc, 0xabcd);
        assert_eq!(parsed.header.sequence_number, 1);
        assert_eq!(parsed.header.timestamp, 1000);
        assert_eq!(parsed.payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn rejects_truncated_packets() {
        assert_eq!(parse(&[0x80, 0x00, 0x01]), Err(RtpParseError::Truncated));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut pkt = build_packet(1, 0, 1, &[]);
        pkt[0] = 0x40; // version 1
        assert_eq!(parse(&pkt), Err(RtpParseError::UnsupportedVersion(1)));
    }

    #[test]
    fn sequence_wraparound_is_handled() {
        assert!(sequence_is_newer(65535, 0));
        assert!(sequence_is_newer(10, 20));
        assert!(!sequence_is_newer(20, 10));
        assert!(!sequence_is_newer(5, 5));
    }
}
