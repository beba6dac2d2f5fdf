// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! WebSocket Audio Handler (spec §4.4). Grounded on
//! `trx-frontend-http::audio`'s WS-upgrade + `tokio::select!` read/write
//! loop, adapted from opus-frame relay to the tagged `AudioCommand`
//! protocol and SSRC-routed RTP payload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use hfr_core::session::{now_unix_ns, SessionState, TuningState};
use hfr_proto::ws_audio::{AudioCommand, AudioFrameHeader, AudioResponse};
use hfr_session::{CommandClass, SessionCloser};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::ip::extract_client_ip;

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    pub user_session_id: String,
    pub password: Option<String>,
}

struct WsCloser(Mutex<Option<actix_ws::Session>>);

impl SessionCloser for WsCloser {
    fn close(&self) {
        if let Some(session) = self.0.lock().expect("ws closer mutex poisoned").take() {
            actix_web::rt::spawn(async move {
                let _ = session.close(None).await;
            });
        }
    }
}

#[get("/ws")]
#[instrument(skip(req, body, ctx, query))]
pub async fn audio_ws(
    req: HttpRequest,
    body: web::Payload,
    ctx: web::Data<AppContext>,
    query: web::Query<AudioQuery>,
) -> Result<HttpResponse, Error> {
    let Some(ip) = extract_client_ip(&req, &ctx.access.tunnel_servers) else {
        return Ok(HttpResponse::BadRequest().finish());
    };

    if ctx.bans.is_banned(ip) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    let Ok(user_session_id) = Uuid::parse_str(&query.user_session_id) else {
        return Ok(HttpResponse::BadRequest().finish());
    };

    if ctx.sessions.is_kicked(user_session_id).await {
        return Ok(HttpResponse::Gone().finish());
    }

    if !ctx.sessions.has_binding(user_session_id).await {
        return Ok(HttpResponse::BadRequest().body("no preflight binding"));
    }

    let bypassed = ctx.resolve_bypass(ip, query.password.as_deref());

    if !bypassed && !ctx.rate_limits.conn_per_ip.check(ip) {
        return Ok(HttpResponse::TooManyRequests().finish());
    }

    if ctx
        .sessions
        .bind_uuid(user_session_id, ip, String::new())
        .await
        .is_err()
    {
        return Ok(HttpResponse::Unauthorized().finish());
    }

    let (response, session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let closer = std::sync::Arc::new(WsCloser(Mutex::new(Some(session.clone()))));
    let created = ctx
        .sessions
        .create_audio_session(user_session_id, ip, bypassed, closer)
        .await;

    let (audio_session, frame_source) = match created {
        Ok(pair) => pair,
        Err(e) => {
            let mut session = session;
            let _ = session
                .text(
                    serde_json::to_string(&AudioResponse::Error {
                        error: e.to_string(),
                        status: Some(e.status_code()),
                    })
                    .unwrap_or_default(),
                )
                .await;
            let _ = session.close(None).await;
            return Ok(response);
        }
    };

    let session_id = audio_session.session_id;
    let ctx = ctx.into_inner();
    let sample_rate = ctx.sessions.sample_rate();
    let mut rtp_rx = frame_source.subscribe();

    actix_web::rt::spawn(async move {
        let mut session = session;
        let seen_first_frame = AtomicBool::new(false);

        loop {
            tokio::select! {
                frame = rtp_rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            if !seen_first_frame.swap(true, Ordering::SeqCst) {
                                ctx.sessions.mark_streaming(session_id).await;
                            }
                            let header = AudioFrameHeader {
                                seq: frame.sequence_number as u32,
                                ts_ns: now_unix_ns(),
                                sample_rate,
                            };
                            let encoded = header.encode(&frame.payload);
                            let len = encoded.len() as u64;
                            if session.binary(encoded).await.is_err() {
                                break;
                            }
                            ctx.sessions.record_bytes_sent(session_id, len).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            ctx.sessions.record_dropped_frames(session_id, n).await;
                            ctx.metrics.dropped_audio_frames.fetch_add(n, Ordering::Relaxed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = msg_stream.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_command(&ctx, session_id, &text, &mut session).await;
                        }
                        Some(Ok(Message::Ping(bytes))) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    }
                }
            }
        }

        ctx.sessions.destroy_session(session_id).await;
    });

    Ok(response)
}

async fn handle_command(
    ctx: &AppContext,
    session_id: Uuid,
    text: &str,
    session: &mut actix_ws::Session,
) {
    let Some(current) = ctx.sessions.get_session(session_id).await else {
        return;
    };

    let command: AudioCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(_) => {
            let _ = reply(
                session,
                AudioResponse::Error {
                    error: "invalid request".into(),
                    status: Some(400),
                },
            )
            .await;
            return;
        }
    };

    if command.consumes_rate_limit_token()
        && !ctx
            .rate_limits
            .check_command(current.user_session_id, CommandClass::Audio)
    {
        let _ = reply(
            session,
            AudioResponse::Error {
                error: "rate limited".into(),
                status: Some(429),
            },
        )
        .await;
        return;
    }

    ctx.sessions.touch_session(session_id).await;

    match command {
        AudioCommand::Ping => {
            let _ = reply(session, AudioResponse::Pong).await;
        }
        AudioCommand::GetStatus => {
            let (frequency, mode) = current
                .tuning
                .as_ref()
                .map(|t| (t.center_frequency_hz, t.mode.clone()))
                .unwrap_or((0, String::new()));
            let _ = reply(
                session,
                AudioResponse::Status {
                    session_id: current.session_id.to_string(),
                    frequency,
                    mode,
                },
            )
            .await;
        }
        AudioCommand::Tune {
            frequency,
            mode,
            low,
            high,
        } => {
            let tuning = TuningState {
                center_frequency_hz: frequency,
                mode,
                low_edge_hz: low,
                high_edge_hz: high,
            };
            apply_tuning(ctx, session_id, tuning, session).await;
        }
        AudioCommand::SetMode { mode } => {
            let Some(mut tuning) = current.tuning.clone() else {
                let _ = reply(
                    session,
                    AudioResponse::Error {
                        error: "not tuned".into(),
                        status: Some(400),
                    },
                )
                .await;
                return;
            };
            tuning.mode = mode;
            apply_tuning(ctx, session_id, tuning, session).await;
        }
        AudioCommand::SetPassband { low, high } => {
            let Some(mut tuning) = current.tuning.clone() else {
                let _ = reply(
                    session,
                    AudioResponse::Error {
                        error: "not tuned".into(),
                        status: Some(400),
                    },
                )
                .await;
                return;
            };
            tuning.low_edge_hz = low;
            tuning.high_edge_hz = high;
            apply_tuning(ctx, session_id, tuning, session).await;
        }
    }
}

async fn apply_tuning(
    ctx: &AppContext,
    session_id: Uuid,
    tuning: TuningState,
    session: &mut actix_ws::Session,
) {
    match ctx.sessions.update_audio_tuning(session_id, tuning.clone()).await {
        Ok(SessionState::Retuning) => {
            ctx.sessions.clone().start_retune_timeout(session_id, tuning);
        }
        Ok(_) => {}
        Err(e) => {
            let _ = reply(
                session,
                AudioResponse::Error {
                    error: e.to_string(),
                    status: Some(e.status_code()),
                },
            )
            .await;
        }
    }
}

async fn reply(session: &mut actix_ws::Session, response: AudioResponse) -> Result<(), ()> {
    let text = serde_json::to_string(&response).map_err(|e| warn!("encode error: {e}"))?;
    session.text(text).await.map_err(|_| ())
}
