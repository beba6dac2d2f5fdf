// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Radio Controller (spec §4.1): speaks the radio daemon's control protocol
//! over a multicast status group, and allocates SSRCs for sessions.
//! Grounded on `trx-server::listener`'s UDP control-plane sender — a
//! process-wide socket, fire-and-forget sends, errors logged not
//! propagated as fatal.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Mutex;

use hfr_core::HfrError;
use hfr_proto::control::ControlMessage;
use tokio::net::UdpSocket;
use tracing::{error, warn};

/// Thread-safe allocator over a reserved SSRC integer range (spec §4.1).
pub struct SsrcAllocator {
    range: RangeInclusive<u32>,
    in_use: HashSet<u32>,
    next: u32,
}

impl SsrcAllocator {
    pub fn new(range: RangeInclusive<u32>) -> Self {
        let next = *range.start();
        SsrcAllocator {
            range,
            in_use: HashSet::new(),
            next,
        }
    }

    pub fn allocate(&mut self) -> Result<u32, HfrError> {
        let span = self.range.end() - self.range.start() + 1;
        for _ in 0..span {
            let candidate = self.next;
            self.next = if self.next == *self.range.end() {
                *self.range.start()
            } else {
                self.next + 1
            };
            if !self.in_use.contains(&candidate) {
                self.in_use.insert(candidate);
                return Ok(candidate);
            }
        }
        Err(HfrError::BackendUnavailable("NoSSRCAvailable".into()))
    }

    pub fn release(&mut self, ssrc: u32) {
        self.in_use.remove(&ssrc);
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }
}

pub struct RadioController {
    socket: UdpSocket,
    status_group: SocketAddr,
    ssrc_pool: Mutex<SsrcAllocator>,
}

impl RadioController {
    pub async fn bind(
        bind_interface: SocketAddr,
        status_group: SocketAddr,
        ssrc_range: RangeInclusive<u32>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_interface).await?;
        Ok(RadioController {
            socket,
            status_group,
            ssrc_pool: Mutex::new(SsrcAllocator::new(ssrc_range)),
        })
    }

    pub fn allocate_ssrc(&self) -> Result<u32, HfrError> {
        self.ssrc_pool
            .lock()
            .expect("ssrc pool mutex poisoned")
            .allocate()
    }

    pub fn release_ssrc(&self, ssrc: u32) {
        self.ssrc_pool
            .lock()
            .expect("ssrc pool mutex poisoned")
            .release(ssrc);
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn tune_channel(
        &self,
        ssrc: u32,
        center_hz: u64,
        mode: &str,
        low_edge_hz: i32,
        high_edge_hz: i32,
        sample_rate: u32,
    ) -> Result<(), HfrError> {
        let msg = ControlMessage::TuneChannel {
            ssrc,
            center_hz,
            mode: mode.to_string(),
            low_edge_hz,
            high_edge_hz,
            sample_rate,
        };
        self.send_with_one_retry(&msg).await
    }

    pub async fn configure_spectrum(
        &self,
        ssrc: u32,
        center_hz: u64,
        bin_bw_hz: u32,
        bin_count: u32,
    ) -> Result<(), HfrError> {
        let msg = ControlMessage::ConfigureSpectrum {
            ssrc,
            center_hz,
            bin_bw_hz,
            bin_count,
        };
        self.send_with_one_retry(&msg).await
    }

    pub async fn teardown_channel(&self, ssrc: u32) -> Result<(), HfrError> {
        let msg = ControlMessage::TeardownChannel { ssrc };
        self.send_with_one_retry(&msg).await
    }

    /// Fire-and-forget send; does not wait for acknowledgment (the data
    /// plane is the only confirmation, spec §4.1). A single internal retry
    /// on transient I/O errors per spec §7, then the failure is logged and
    /// swallowed — the client observes it indirectly as absence of audio.
    async fn send_with_one_retry(&self, msg: &ControlMessage) -> Result<(), HfrError> {
        let bytes = msg.encode();
        match self.socket.send_to(&bytes, self.status_group).await {
            Ok(_) => Ok(()),
            Err(first_err) => {
                warn!("control send failed, retrying once: {first_err}");
                match self.socket.send_to(&bytes, self.status_group).await {
                    Ok(_) => Ok(()),
                    Err(second_err) => {
                        error!("control send failed after retry: {second_err}");
                        Ok(())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_cycles_and_avoids_reuse() {
        let mut pool = SsrcAllocator::new(1..=2);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        assert!(pool.allocate().is_err());
        pool.release(a);
        let c = pool.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn exhaustion_is_backend_unavailable() {
        let mut pool = SsrcAllocator::new(5..=5);
        pool.allocate().unwrap();
        let err = pool.allocate().unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn bind_and_allocate_roundtrip() {
        let controller = RadioController::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9999".parse().unwrap(),
            1..=4,
        )
        .await
        .unwrap();
        let ssrc = controller.allocate_ssrc().unwrap();
        assert!((1..=4).contains(&ssrc));
        controller.release_ssrc(ssrc);
    }
}
