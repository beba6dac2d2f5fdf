// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod error;
pub mod session;
pub mod stats;

pub use error::HfrError;
pub use session::{Session, SessionKind, SpectrumParams, TuningState};

pub type HfrResult<T> = Result<T, HfrError>;
