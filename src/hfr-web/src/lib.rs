// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! HTTP/WebSocket surface (spec §4.4, §4.5, §4.8, SPEC_FULL §12): the
//! `actix-web` handlers, built on `hfr-session`'s registries the way
//! `trx-frontend-http` is built on `trx-core`'s rig state.

pub mod admin;
pub mod context;
pub mod ip;
pub mod middleware;
pub mod preflight;
pub mod status;
pub mod ws_audio;
pub mod ws_spectrum;

pub use context::AppContext;
