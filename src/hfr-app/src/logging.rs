// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Logging init (spec §10.1), grounded on the reference binary's
//! `init_tracing`: a single `tracing_subscriber::fmt` subscriber set up
//! once, level driven by config/CLI rather than hardcoded.

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `level` comes from
/// `[general] log_level`, overridden by `--log-level`; falls back to
/// `info` when absent or unparsable, per spec §10.1.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}
