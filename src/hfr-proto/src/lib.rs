// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod control;
pub mod rtp;
pub mod ws_audio;
pub mod ws_spectrum;
