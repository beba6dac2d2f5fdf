// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Runtime session/radio layer: the stateful pieces that sit above the
//! plain data types in `hfr-core` and the wire codecs in `hfr-proto`.

pub mod audio_receiver;
pub mod ban;
pub mod radio_controller;
pub mod rate_limit;
pub mod session_manager;
pub mod state_machine;
pub mod vad;

pub use audio_receiver::{AudioReceiver, FrameSource, RawFrame, SsrcIndex};
pub use ban::{BanEntry, BanList, BanSource};
pub use radio_controller::{RadioController, SsrcAllocator};
pub use rate_limit::{CommandClass, KeyedLimiter, LoginThrottle, RateLimitMatrix};
pub use session_manager::{SessionCloser, SessionManager, SessionManagerConfig, UuidBinding};
pub use state_machine::{SessionEvent, SessionMachine};
pub use vad::{DialMode, RawDetection, VadConfig, VadFrame, VoiceActivityDetector};
