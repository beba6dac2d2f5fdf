// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Ban-enforcement middleware (spec §4.6, §8 scenario 3). Each handler
//! already checks `ctx.bans` itself before doing anything expensive, but a
//! banned client should never reach a handler at all — this is the same
//! "reject before the route runs" shape as the reference codebase's
//! `AuthMiddleware`, just gating on ban status instead of session role.

use std::future::{ready, Ready};

use actix_cors::Cors;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error, HttpResponse};
use futures_util::future::LocalBoxFuture;

use crate::context::AppContext;
use crate::ip::extract_client_ip;

/// Build the CORS layer from `[http] cors_origins` (SPEC_FULL §10.2). An
/// empty list means no origin restriction; a populated list is an
/// allow-list, matched exactly against the `Origin` header.
pub fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::permissive();
    }
    let mut cors = Cors::default();
    for origin in origins {
        cors = cors.allowed_origin(origin);
    }
    cors.allow_any_method().allow_any_header()
}

pub struct BanGuard;

impl<S, B> Transform<S, ServiceRequest> for BanGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = BanGuardService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BanGuardService { service }))
    }
}

pub struct BanGuardService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for BanGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ctx = req.app_data::<web::Data<AppContext>>().cloned();

        let banned = ctx.as_ref().and_then(|ctx| {
            extract_client_ip(req.request(), &ctx.access.tunnel_servers)
                .map(|ip| ctx.bans.is_banned(ip))
        });

        if banned == Some(true) {
            let (http_req, _payload) = req.into_parts();
            let res = ServiceResponse::new(http_req, HttpResponse::Forbidden().finish());
            return Box::pin(async move { Ok(res.map_into_right_body()) });
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_left_body())
        })
    }
}
