// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Admin ban-management surface (SPEC_FULL §12, spec §8 scenario 3).
//! Grounded on `trx-frontend-http::auth`'s login/passphrase-check endpoints,
//! adapted from cookie sessions to a single shared admin password gating a
//! handful of maintenance routes.

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use hfr_session::BanSource;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::AppContext;
use crate::ip::extract_client_ip;

const ADMIN_HEADER: &str = "x-admin-password";

fn admin_authorized(req: &HttpRequest, ctx: &AppContext) -> bool {
    req.headers()
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|supplied| ctx.check_admin_password(supplied))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub authenticated: bool,
}

/// `POST /admin/login` (spec §8 scenario 3): five failures from one IP
/// inside the login window bans that IP with source `rate_limiter`.
#[post("/admin/login")]
pub async fn login(
    req: HttpRequest,
    ctx: web::Data<AppContext>,
    body: web::Json<LoginRequest>,
) -> impl Responder {
    let Some(ip) = extract_client_ip(&req, &ctx.access.tunnel_servers) else {
        return HttpResponse::BadRequest().finish();
    };

    if ctx.bans.is_banned(ip) {
        return HttpResponse::Forbidden().finish();
    }

    if ctx.check_admin_password(&body.password) {
        ctx.rate_limits.login_per_ip.reset(ip);
        return HttpResponse::Ok().json(LoginResponse { authenticated: true });
    }

    if ctx.rate_limits.login_per_ip.record_failure(ip) {
        ctx.bans.ban(
            ip,
            "exceeded login attempts".to_string(),
            BanSource::RateLimiter,
            Some(ctx.access.login_ban_duration.as_secs()),
        );
        warn!("ip {ip} banned after exceeding login attempts");
        return HttpResponse::TooManyRequests().json(LoginResponse { authenticated: false });
    }

    HttpResponse::Unauthorized().json(LoginResponse { authenticated: false })
}

#[derive(Debug, Serialize)]
pub struct BannedIpEntry {
    pub ip: String,
    pub reason: String,
    pub source: &'static str,
    pub expires_at: Option<u64>,
}

/// `GET /admin/banned-ips` (SPEC_FULL §12).
#[get("/admin/banned-ips")]
pub async fn banned_ips(req: HttpRequest, ctx: web::Data<AppContext>) -> impl Responder {
    if !admin_authorized(&req, &ctx) {
        return HttpResponse::Unauthorized().finish();
    }

    let entries: Vec<BannedIpEntry> = ctx
        .bans
        .list()
        .into_iter()
        .map(|e| BannedIpEntry {
            ip: e.ip.to_string(),
            reason: e.reason,
            source: match e.source {
                BanSource::Admin => "admin",
                BanSource::RateLimiter => "rate_limiter",
            },
            expires_at: e.expires_at,
        })
        .collect();

    HttpResponse::Ok().json(entries)
}

#[derive(Debug, Deserialize)]
pub struct UnbanRequest {
    pub ip: String,
}

/// `POST /admin/unban` (SPEC_FULL §12).
#[post("/admin/unban")]
pub async fn unban(
    req: HttpRequest,
    ctx: web::Data<AppContext>,
    body: web::Json<UnbanRequest>,
) -> impl Responder {
    if !admin_authorized(&req, &ctx) {
        return HttpResponse::Unauthorized().finish();
    }

    let Ok(ip) = body.ip.parse() else {
        return HttpResponse::BadRequest().finish();
    };

    let removed = ctx.bans.unban(ip);
    info!("admin unbanned {ip}: {removed}");
    HttpResponse::Ok().json(serde_json::json!({ "removed": removed }))
}
