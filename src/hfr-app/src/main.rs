// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Process entry point: load config, wire up the Radio Controller / Audio
//! Receiver / Session Manager / rate limiters / ban list, and serve the
//! HTTP/WebSocket surface. Grounded on the reference binary crate's
//! `main` — CLI layered over a TOML file, a background collaborator task
//! spawned before the server, ctrl_c-driven graceful shutdown.

mod config;
mod logging;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use hfr_session::{
    audio_receiver::new_ssrc_index, AudioReceiver, BanList, RadioController, RateLimitMatrix,
    SessionManager, SessionManagerConfig, VadConfig, VoiceActivityDetector,
};
use hfr_web::context::{AccessConfig, AppContext, Metrics, SpectrumConfig};
use hfr_web::{
    admin,
    middleware::{build_cors, BanGuard},
    preflight, status, ws_audio, ws_spectrum,
};

const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[derive(Debug, Parser)]
#[command(author, version, about = PKG_DESCRIPTION)]
struct Cli {
    /// Path to hfr.toml; overrides the default search tiers.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `[http] listen_addr`.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override `[general] log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_ips(values: &[String]) -> HashSet<std::net::IpAddr> {
    values.iter().filter_map(|s| s.parse().ok()).collect()
}

/// Session/binding sweep cadence. Spec.md doesn't pin this one down (only
/// the rate-limit and ban tickers below), so this runs often enough that a
/// session idling out at the default 10-minute `session_timeout` is noticed
/// well within the same order of magnitude.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const RATE_LIMIT_IDLE_AFTER: Duration = Duration::from_secs(600);

/// Background tickers driving the idle-session reaper, stale-UUID-binding
/// evictor, rate-limit bucket cleanup, and expired-ban purge (spec §4.3, §5
/// "Rate-limit and ban cleanups run on 5-minute / 1-hour tickers
/// respectively"). Without this the registries spec.md describes as
/// self-cleaning only ever grow.
async fn run_maintenance_sweep(
    sessions: Arc<SessionManager>,
    rate_limits: Arc<RateLimitMatrix>,
    bans: Arc<BanList>,
) {
    let mut session_ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    let mut rate_limit_ticker = tokio::time::interval(Duration::from_secs(5 * 60));
    let mut ban_ticker = tokio::time::interval(Duration::from_secs(60 * 60));
    session_ticker.tick().await;
    rate_limit_ticker.tick().await;
    ban_ticker.tick().await;

    loop {
        tokio::select! {
            _ = session_ticker.tick() => {
                let reaped = sessions.reap_expired().await;
                sessions.evict_stale_bindings().await;
                if reaped > 0 {
                    debug!("session sweep reaped {reaped} expired session(s)");
                }
            }
            _ = rate_limit_ticker.tick() => {
                rate_limits.cleanup_idle(RATE_LIMIT_IDLE_AFTER);
            }
            _ = ban_ticker.tick() => {
                bans.purge_expired();
            }
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let (mut cfg, loaded_from) = match &cli.config {
        Some(path) => match config::load_from(path) {
            Ok(cfg) => (cfg, Some(path.clone())),
            Err(e) => {
                eprintln!("fatal: {e}");
                std::process::exit(1);
            }
        },
        None => match config::load() {
            Ok(found) => found,
            Err(e) => {
                eprintln!("fatal: {e}");
                std::process::exit(1);
            }
        },
    };

    if let Some(level) = &cli.log_level {
        cfg.general.log_level = level.clone();
    }
    if let Some(listen) = cli.listen {
        cfg.http.listen_addr = listen;
    }

    logging::init(&cfg.general.log_level);

    match &loaded_from {
        Some(path) => info!("loaded config from {}", path.display()),
        None => info!("no config file found, using defaults"),
    }

    let radio = match RadioController::bind(
        cfg.network.bind_interface,
        cfg.network.status_group,
        cfg.network.ssrc_range_start..=cfg.network.ssrc_range_end,
    )
    .await
    {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("fatal: failed to bind radio controller: {e}");
            std::process::exit(1);
        }
    };

    let ssrc_index = new_ssrc_index();

    let audio_receiver = match AudioReceiver::join(cfg.network.data_group, ssrc_index.clone()).await
    {
        Ok(r) => r,
        Err(e) => {
            error!("fatal: failed to join multicast data group: {e}");
            std::process::exit(1);
        }
    };

    let (receiver_shutdown_tx, receiver_shutdown_rx) = oneshot::channel();
    let receiver_handle = tokio::spawn(audio_receiver.run(receiver_shutdown_rx));

    let session_manager = Arc::new(SessionManager::new(
        radio.clone(),
        ssrc_index,
        SessionManagerConfig {
            max_sessions: cfg.session.max_sessions,
            max_sessions_per_ip: cfg.session.max_sessions_per_ip,
            session_timeout_ms: cfg.session.session_timeout_ms,
            max_session_time_ms: cfg.session.max_session_time_ms,
            enforce_session_ip_match: cfg.session.enforce_session_ip_match,
            uuid_binding_ttl_ms: cfg.session.uuid_binding_ttl_ms,
            audio_ring_depth: cfg.session.audio_ring_depth,
            sample_rate: cfg.session.sample_rate,
        },
    ));

    let rate_limits = Arc::new(RateLimitMatrix::new(
        cfg.rate_limit.conn_per_sec,
        cfg.rate_limit.preflight_per_min,
        cfg.rate_limit.cmd_per_sec,
        cfg.rate_limit.endpoint_per_sec,
        cfg.rate_limit.login_max_attempts,
        Duration::from_secs(cfg.rate_limit.login_window_secs),
    ));

    let bans = Arc::new(BanList::open(&cfg.general.ban_list_path));
    let vad = Arc::new(VoiceActivityDetector::new(VadConfig {
        min_confidence: cfg.vad.min_confidence,
    }));

    let sweep_handle = tokio::spawn(run_maintenance_sweep(
        session_manager.clone(),
        rate_limits.clone(),
        bans.clone(),
    ));

    let access = AccessConfig {
        bypass_ips: parse_ips(&cfg.access.bypass_ips),
        admin_password: cfg.access.admin_password.clone(),
        public_iq_modes: cfg.access.public_iq_modes.clone(),
        tunnel_servers: parse_ips(&cfg.access.tunnel_servers),
        cors_origins: cfg.access.cors_origins.clone(),
        session_timeout_ms: cfg.session.session_timeout_ms,
        max_session_time_ms: cfg.session.max_session_time_ms,
        login_max_attempts: cfg.rate_limit.login_max_attempts,
        login_ban_duration: Duration::from_secs(cfg.rate_limit.login_ban_duration_secs),
    };

    let spectrum = SpectrumConfig {
        defaults: hfr_core::session::SpectrumParams {
            center_frequency_hz: cfg.spectrum.default_center_frequency_hz,
            bin_count: cfg.spectrum.default_bin_count,
            bin_bandwidth_hz: cfg.spectrum.default_bin_bandwidth_hz,
        },
        delta_threshold_db: cfg.spectrum.delta_threshold_db,
        full_frame_escalation_ratio: cfg.spectrum.full_frame_escalation_ratio,
        writer_channel_depth: cfg.spectrum.writer_channel_depth,
    };

    let app_context = actix_web::web::Data::new(AppContext {
        sessions: session_manager.clone(),
        rate_limits,
        bans,
        vad,
        access,
        spectrum,
        metrics: Arc::new(Metrics::default()),
    });

    let listen_addr = cfg.http.listen_addr;
    let gzip = cfg.http.gzip;
    let cors_origins = cfg.access.cors_origins.clone();

    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .app_data(app_context.clone())
            .wrap(actix_web::middleware::Condition::new(
                gzip,
                actix_web::middleware::Compress::default(),
            ))
            .wrap(build_cors(&cors_origins))
            .wrap(BanGuard)
            .service(preflight::connection)
            .service(ws_audio::audio_ws)
            .service(ws_spectrum::spectrum_ws)
            .service(admin::login)
            .service(admin::banned_ips)
            .service(admin::unban)
            .service(status::status)
    })
    .shutdown_timeout(5)
    .bind(listen_addr)?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl_c received, shutting down");
        handle.stop(false).await;
    });

    info!("hfr-app listening on {listen_addr}");
    server.await?;

    sweep_handle.abort();
    session_manager.shutdown(Duration::from_secs(5)).await;
    let _ = receiver_shutdown_tx.send(());
    let _ = receiver_handle.await;

    Ok(())
}
