// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Health/status endpoint (SPEC_FULL §12), analogous to the reference
//! codebase's frontend `status.rs` but reporting session and back-pressure
//! counters instead of rig state.

use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;

use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sessions: usize,
    pub dropped_audio_frames: u64,
    pub dropped_spectrum_frames: u64,
    pub rate_limited_requests: u64,
}

#[get("/status")]
pub async fn status(ctx: web::Data<AppContext>) -> impl Responder {
    let (dropped_audio, dropped_spectrum, rate_limited) = ctx.metrics.snapshot();
    HttpResponse::Ok().json(StatusResponse {
        sessions: ctx.sessions.session_count().await,
        dropped_audio_frames: dropped_audio,
        dropped_spectrum_frames: dropped_spectrum,
        rate_limited_requests: rate_limited,
    })
}
