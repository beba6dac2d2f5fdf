// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Audio Receiver / Demultiplexer (spec §4.2). A single task joins the RTP
//! multicast data group, reads packets in a tight loop, and dispatches each
//! to the session whose allocated SSRC matches via a read-mostly
//! `RwLock<HashMap<..>>`. Grounded on the songbird UDP RX task's SSRC-keyed
//! dispatch loop and the AES67 receiver's socket-select/shutdown structure
//! (see DESIGN.md) — the teacher itself has no multicast/RTP code, since
//! its backends talk to hardware or SoapySDR, not a multicast collaborator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot, RwLock};
use tracing::{debug, warn};

use hfr_proto::rtp;

/// One RTP payload, handed to whichever session consumer (audio or
/// spectrum) is subscribed to this SSRC. `broadcast` gives us "newest
/// wins" back-pressure for free: a slow receiver lags and drops old
/// frames rather than blocking the sender (spec §4.2, §5).
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

pub type FrameSource = broadcast::Sender<RawFrame>;

/// `SSRC → session broadcast channel` dispatch table, shared with the
/// Session Manager which inserts an entry on session creation and removes
/// it on destruction.
pub type SsrcIndex = Arc<RwLock<HashMap<u32, FrameSource>>>;

pub fn new_ssrc_index() -> SsrcIndex {
    Arc::new(RwLock::new(HashMap::new()))
}

const READ_TIMEOUT: Duration = Duration::from_millis(250);

pub struct AudioReceiver {
    socket: UdpSocket,
    ssrc_index: SsrcIndex,
}

impl AudioReceiver {
    pub async fn join(bind_addr: SocketAddr, ssrc_index: SsrcIndex) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        if let SocketAddr::V4(addr) = bind_addr {
            if addr.ip().is_multicast() {
                socket.join_multicast_v4(*addr.ip(), std::net::Ipv4Addr::UNSPECIFIED)?;
            }
        }
        Ok(AudioReceiver { socket, ssrc_index })
    }

    /// Runs until `shutdown` fires. One dedicated task for the whole
    /// process (spec §5's "strictly one reader task for multicast").
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut buf = [0u8; 65_535];
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!("audio receiver shutting down");
                    break;
                }
                result = tokio::time::timeout(READ_TIMEOUT, self.socket.recv_from(&mut buf)) => {
                    match result {
                        Ok(Ok((len, _src))) => self.dispatch(&buf[..len]).await,
                        Ok(Err(e)) => warn!("multicast recv error: {e}"),
                        Err(_timeout) => continue,
                    }
                }
            }
        }
    }

    async fn dispatch(&self, datagram: &[u8]) {
        let packet = match rtp::parse(datagram) {
            Ok(p) => p,
            Err(e) => {
                warn!("malformed RTP packet dropped: {e}");
                return;
            }
        };

        let index = self.ssrc_index.read().await;
        let Some(sink) = index.get(&packet.header.ssrc) else {
            // No owning session (normal after teardown) — drop silently.
            return;
        };

        let frame = RawFrame {
            sequence_number: packet.header.sequence_number,
            timestamp: packet.header.timestamp,
            payload: Bytes::copy_from_slice(packet.payload),
        };
        // Err here just means no receiver is currently subscribed; that is
        // not the "ring full" back-pressure case and needs no counter.
        let _ = sink.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_rtp(seq: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0x80, 0x00];
        pkt.extend_from_slice(&seq.to_be_bytes());
        pkt.extend_from_slice(&0u32.to_be_bytes());
        pkt.extend_from_slice(&ssrc.to_be_bytes());
        pkt.extend_from_slice(payload);
        pkt
    }

    #[tokio::test]
    async fn dispatches_to_matching_ssrc_only() {
        let index = new_ssrc_index();
        let (tx, mut rx) = broadcast::channel(8);
        index.write().await.insert(42, tx);

        let receiver = AudioReceiver {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            ssrc_index: index,
        };

        receiver.dispatch(&build_rtp(1, 42, b"hi")).await;
        let frame = rx.try_recv().unwrap();
        assert_eq!(&frame.payload[..], b"hi");

        receiver.dispatch(&build_rtp(2, 999, b"nope")).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lagging_receiver_drops_oldest_not_newest() {
        let index = new_ssrc_index();
        let (tx, mut rx) = broadcast::channel(2);
        index.write().await.insert(1, tx);
        let receiver = AudioReceiver {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            ssrc_index: index,
        };

        for seq in 0..5u16 {
            receiver.dispatch(&build_rtp(seq, 1, b"x")).await;
        }

        // Receiver is behind; it should observe a Lagged error then still
        // be able to read the newest frames.
        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            other => panic!("expected Lagged, got {other:?}"),
        }
        let last = rx.try_recv().unwrap();
        assert_eq!(last.sequence_number, 4);
    }
}
