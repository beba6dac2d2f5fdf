// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Connection-Preflight Endpoint (spec §4.8): quota decision before the
//! WebSocket upgrade, binding UUID→IP→UA. Grounded on
//! `trx-frontend-http::api`'s REST-endpoint-plus-typed-response pattern.

use actix_web::{post, web, HttpRequest, HttpResponse, Responder};
use hfr_core::session::ALL_IQ_MODES;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::context::AppContext;
use crate::ip::extract_client_ip;

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub user_session_id: String,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub client_ip: String,
    pub allowed: bool,
    pub session_timeout: u64,
    pub max_session_time: u64,
    pub bypassed: bool,
    pub allowed_iq_modes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody {
        error: message.into(),
    })
}

#[post("/connection")]
#[instrument(skip(req, ctx, body), fields(user_session_id = %body.user_session_id))]
pub async fn connection(
    req: HttpRequest,
    ctx: web::Data<AppContext>,
    body: web::Json<ConnectionRequest>,
) -> impl Responder {
    let Some(ip) = extract_client_ip(&req, &ctx.access.tunnel_servers) else {
        return error_response(actix_web::http::StatusCode::BAD_REQUEST, "no client ip");
    };

    if ctx.bans.is_banned(ip) {
        return error_response(actix_web::http::StatusCode::FORBIDDEN, "banned");
    }

    let bypassed = ctx.resolve_bypass(ip, body.password.as_deref());

    if !bypassed && !ctx.rate_limits.preflight_per_ip.check(ip) {
        ctx.metrics
            .rate_limited_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return error_response(actix_web::http::StatusCode::TOO_MANY_REQUESTS, "rate limited");
    }

    let Ok(user_session_id) = Uuid::parse_str(&body.user_session_id) else {
        return error_response(actix_web::http::StatusCode::BAD_REQUEST, "invalid user_session_id");
    };

    if ctx.sessions.is_kicked(user_session_id).await {
        return error_response(actix_web::http::StatusCode::GONE, "gone");
    }

    if let Err(e) = ctx
        .sessions
        .can_accept_new(user_session_id, ip, bypassed)
        .await
    {
        return error_response(
            actix_web::http::StatusCode::from_u16(e.status_code()).unwrap(),
            e.to_string(),
        );
    }

    let user_agent = req
        .headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if let Err(e) = ctx.sessions.bind_uuid(user_session_id, ip, user_agent).await {
        return error_response(
            actix_web::http::StatusCode::from_u16(e.status_code()).unwrap(),
            e.to_string(),
        );
    }

    let allowed_iq_modes = if bypassed {
        ALL_IQ_MODES.iter().map(|m| m.to_string()).collect()
    } else {
        ctx.access.public_iq_modes.clone()
    };

    HttpResponse::Ok().json(ConnectionResponse {
        client_ip: ip.to_string(),
        allowed: true,
        session_timeout: ctx.access.session_timeout_ms,
        max_session_time: ctx.access.max_session_time_ms,
        bypassed,
        allowed_iq_modes,
    })
}
