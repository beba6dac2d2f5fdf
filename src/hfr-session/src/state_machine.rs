// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Session lifecycle state machine (spec §4.3): `CREATED → TUNED →
//! STREAMING ↔ RETUNING → CLOSING → DESTROYED`. Grounded directly on
//! `trx-core::rig::controller::machine`'s `RigEvent`/`RigMachineState`/
//! `process_event`/`next_state` pattern, adapted from rig-hardware states
//! to session states.

use hfr_core::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A tuning/spectrum-parameter update was requested.
    Tune,
    /// The Audio Receiver observed the first RTP packet for this session's
    /// SSRC after a (re)tune.
    RtpObserved,
    /// 2s elapsed in RETUNING with no RTP observed (spec §4.3).
    RetuneTimeout,
    /// The WebSocket closed, the idle/max-life reaper fired, or a kick/ban
    /// landed.
    Close,
    /// Outbound queues drained and the SSRC has been released.
    Destroy,
}

/// One retune retry is allowed before falling back to STREAMING and giving
/// up on acknowledgment (spec §4.3: "retry tuning once").
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionMachine {
    pub state: SessionState,
    retune_retries: u8,
}

impl SessionMachine {
    pub fn new() -> Self {
        SessionMachine {
            state: SessionState::Created,
            retune_retries: 0,
        }
    }

    /// Apply `event`, returning the new state. Invalid transitions are a
    /// no-op (the state does not change) rather than a panic — a stray
    /// `RtpObserved` while `CREATED`, for instance, simply has no effect.
    pub fn process_event(&mut self, event: SessionEvent) -> SessionState {
        self.state = self.next_state(event);
        if self.state != SessionState::Retuning {
            self.retune_retries = 0;
        }
        self.state
    }

    fn next_state(&mut self, event: SessionEvent) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;

        match (self.state, event) {
            (_, Close) if self.state != Closing && self.state != Destroyed => Closing,
            (Closing, Destroy) => Destroyed,

            (Created, Tune) => Tuned,
            (Tuned, RtpObserved) => Streaming,
            (Tuned, Tune) => Tuned,

            (Streaming, Tune) => Retuning,
            (Retuning, RtpObserved) => Streaming,
            (Retuning, Tune) => Retuning,
            (Retuning, RetuneTimeout) => {
                if self.retune_retries == 0 {
                    self.retune_retries += 1;
                    Retuning
                } else {
                    Streaming
                }
            }

            (current, _) => current,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == SessionState::Destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent::*;
    use SessionState::*;

    #[test]
    fn happy_path_transitions() {
        let mut m = SessionMachine::new();
        assert_eq!(m.state, Created);
        assert_eq!(m.process_event(Tune), Tuned);
        assert_eq!(m.process_event(RtpObserved), Streaming);
        assert_eq!(m.process_event(Tune), Retuning);
        assert_eq!(m.process_event(RtpObserved), Streaming);
        assert_eq!(m.process_event(Close), Closing);
        assert_eq!(m.process_event(Destroy), Destroyed);
    }

    #[test]
    fn retune_timeout_retries_once_then_gives_up() {
        let mut m = SessionMachine::new();
        m.process_event(Tune);
        m.process_event(RtpObserved);
        m.process_event(Tune); // -> Retuning
        assert_eq!(m.state, Retuning);
        assert_eq!(m.process_event(RetuneTimeout), Retuning);
        assert_eq!(m.process_event(RetuneTimeout), Streaming);
    }

    #[test]
    fn close_is_reachable_from_any_live_state() {
        for start in [Created, Tuned, Streaming, Retuning] {
            let mut m = SessionMachine {
                state: start,
                retune_retries: 0,
            };
            assert_eq!(m.process_event(Close), Closing);
        }
    }

    #[test]
    fn destroyed_is_terminal() {
        let mut m = SessionMachine {
            state: Closing,
            retune_retries: 0,
        };
        m.process_event(Destroy);
        assert!(m.is_terminal());
        assert_eq!(m.process_event(Tune), Destroyed);
    }
}
