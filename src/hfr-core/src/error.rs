// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The tagged error kinds that are allowed to cross component boundaries.
//! See spec §7 / SPEC_FULL §11 for the taxonomy this mirrors.

use thiserror::Error;

/// Error kinds that cross component boundaries. Every WebSocket handler and
/// every REST endpoint converts into this enum before replying; only
/// `Fatal` is allowed to terminate the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HfrError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("banned")]
    Banned,

    #[error("kicked")]
    Kicked,

    #[error("gone")]
    Gone,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl HfrError {
    /// HTTP/WS status code this error maps to at the boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            HfrError::InvalidRequest(_) => 400,
            HfrError::NotAuthorized => 401,
            HfrError::Banned => 403,
            HfrError::Kicked => 410,
            HfrError::Gone => 410,
            HfrError::QuotaExceeded(_) => 503,
            HfrError::BackendUnavailable(_) => 503,
            HfrError::Transient(_) => 503,
            HfrError::Fatal(_) => 500,
        }
    }

    /// Whether the caller is expected to retry internally once before
    /// surfacing a `BackendUnavailable` to the client (spec §7).
    pub fn is_transient(&self) -> bool {
        matches!(self, HfrError::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, HfrError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(HfrError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(HfrError::NotAuthorized.status_code(), 401);
        assert_eq!(HfrError::Banned.status_code(), 403);
        assert_eq!(HfrError::Kicked.status_code(), 410);
        assert_eq!(HfrError::Gone.status_code(), 410);
        assert_eq!(HfrError::QuotaExceeded("x".into()).status_code(), 503);
        assert_eq!(HfrError::BackendUnavailable("x".into()).status_code(), 503);
    }

    #[test]
    fn transient_and_fatal_classification() {
        assert!(HfrError::Transient("timeout".into()).is_transient());
        assert!(!HfrError::Fatal("bad config".into()).is_transient());
        assert!(HfrError::Fatal("bad config".into()).is_fatal());
        assert!(!HfrError::Banned.is_fatal());
    }
}
