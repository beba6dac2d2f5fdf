// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Session Manager (spec §4.3): the central registry. Holds `sessions`,
//! `uuid_binding`, the `ssrc_index` shared with the Audio Receiver, and
//! drives admission control, tuning updates, and kick/shutdown.
//!
//! Grounded on `trx-frontend-http::auth`'s session store
//! (`Arc<RwLock<HashMap<..>>>`, TTL eviction via `retain()`) for the
//! registry shape, and `trx-core::rig::controller::machine` (via
//! `state_machine.rs`) for per-session lifecycle transitions. The cyclic
//! reference spec §9 warns about — WebSocket handlers needing the manager,
//! the manager needing to reach into handlers to close sockets — is broken
//! by `SessionCloser`: handlers register a narrow capability object, the
//! manager never holds a handler pointer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hfr_core::session::{now_unix_ms, Session, SessionKind, SessionState, SpectrumParams, TuningState};
use hfr_core::HfrError;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audio_receiver::{FrameSource, SsrcIndex};
use crate::radio_controller::RadioController;
use crate::state_machine::{SessionEvent, SessionMachine};

/// Narrow capability a WebSocket handler registers so the manager can force
/// a close without knowing anything about actix-ws (spec §9 redesign note).
pub trait SessionCloser: Send + Sync {
    fn close(&self);
}

pub struct UuidBinding {
    pub bound_ip: IpAddr,
    pub user_agent: String,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub is_kicked: bool,
}

struct SessionEntry {
    session: Session,
    machine: SessionMachine,
    closer: Option<Arc<dyn SessionCloser>>,
    audio_ring_depth: usize,
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub max_sessions: usize,
    pub max_sessions_per_ip: usize,
    pub session_timeout_ms: u64,
    pub max_session_time_ms: u64,
    pub enforce_session_ip_match: bool,
    pub uuid_binding_ttl_ms: u64,
    pub audio_ring_depth: usize,
    pub sample_rate: u32,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        SessionManagerConfig {
            max_sessions: 200,
            max_sessions_per_ip: 4,
            session_timeout_ms: 10 * 60_000,
            max_session_time_ms: 0,
            enforce_session_ip_match: true,
            uuid_binding_ttl_ms: 24 * 60 * 60_000,
            audio_ring_depth: 32,
            sample_rate: 12_000,
        }
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    uuid_binding: RwLock<HashMap<Uuid, UuidBinding>>,
    ssrc_index: SsrcIndex,
    radio: Arc<RadioController>,
    config: SessionManagerConfig,
}

impl SessionManager {
    pub fn new(radio: Arc<RadioController>, ssrc_index: SsrcIndex, config: SessionManagerConfig) -> Self {
        SessionManager {
            sessions: RwLock::new(HashMap::new()),
            uuid_binding: RwLock::new(HashMap::new()),
            ssrc_index,
            radio,
            config,
        }
    }

    /// Admission check used by preflight and by the WS upgrade path
    /// (spec §4.3 op 1).
    pub async fn can_accept_new(
        &self,
        user_session_id: Uuid,
        ip: IpAddr,
        bypassed: bool,
    ) -> Result<(), HfrError> {
        let bindings = self.uuid_binding.read().await;

        if let Some(binding) = bindings.get(&user_session_id) {
            if binding.is_kicked {
                return Err(HfrError::Gone);
            }
        }

        if bypassed {
            return Ok(());
        }

        let already_bound = bindings.contains_key(&user_session_id);
        if !already_bound {
            if bindings.len() + 1 > self.config.max_sessions {
                return Err(HfrError::QuotaExceeded(format!(
                    "Maximum unique users reached ({})",
                    self.config.max_sessions
                )));
            }
            let existing_from_ip = bindings.values().filter(|b| b.bound_ip == ip).count();
            if existing_from_ip + 1 > self.config.max_sessions_per_ip {
                return Err(HfrError::QuotaExceeded(format!(
                    "Maximum unique users per IP reached ({})",
                    self.config.max_sessions_per_ip
                )));
            }
        }

        Ok(())
    }

    /// Bind (or validate) `user_session_id` → `ip`, recording the
    /// user-agent (spec §4.8 step 5 — the WS upgrade refuses without this
    /// record).
    pub async fn bind_uuid(
        &self,
        user_session_id: Uuid,
        ip: IpAddr,
        user_agent: String,
    ) -> Result<(), HfrError> {
        let mut bindings = self.uuid_binding.write().await;
        let now = now_unix_ms();
        match bindings.get_mut(&user_session_id) {
            Some(existing) => {
                if self.config.enforce_session_ip_match && existing.bound_ip != ip {
                    return Err(HfrError::NotAuthorized);
                }
                existing.last_seen_ms = now;
                if !user_agent.is_empty() {
                    existing.user_agent = user_agent;
                }
            }
            None => {
                bindings.insert(
                    user_session_id,
                    UuidBinding {
                        bound_ip: ip,
                        user_agent,
                        first_seen_ms: now,
                        last_seen_ms: now,
                        is_kicked: false,
                    },
                );
            }
        }
        Ok(())
    }

    pub async fn has_binding(&self, user_session_id: Uuid) -> bool {
        self.uuid_binding
            .read()
            .await
            .get(&user_session_id)
            .map(|b| !b.user_agent.is_empty())
            .unwrap_or(false)
    }

    pub async fn is_kicked(&self, user_session_id: Uuid) -> bool {
        self.uuid_binding
            .read()
            .await
            .get(&user_session_id)
            .map(|b| b.is_kicked)
            .unwrap_or(false)
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_session(
        &self,
        user_session_id: Uuid,
        source_ip: IpAddr,
        kind: SessionKind,
        bypassed: bool,
        closer: Option<Arc<dyn SessionCloser>>,
    ) -> Result<(Session, FrameSource), HfrError> {
        self.can_accept_new(user_session_id, source_ip, bypassed).await?;

        let bound_ip = {
            let bindings = self.uuid_binding.read().await;
            bindings
                .get(&user_session_id)
                .map(|b| b.bound_ip)
                .unwrap_or(source_ip)
        };

        let ssrc = self.radio.allocate_ssrc()?;
        let (tx, _rx) = broadcast::channel(self.config.audio_ring_depth);
        self.ssrc_index.write().await.insert(ssrc, tx.clone());

        let now = now_unix_ms();
        let session = Session {
            session_id: Uuid::new_v4(),
            user_session_id,
            source_ip,
            bound_ip,
            user_agent: String::new(),
            created_at_ms: now,
            last_active_ms: now,
            kind,
            state: SessionState::Created,
            tuning: None,
            spectrum: None,
            allocated_ssrc: ssrc,
            bytes_sent: 0,
            dropped_frames: 0,
            bypassed,
        };

        self.sessions.write().await.insert(
            session.session_id,
            SessionEntry {
                session: session.clone(),
                machine: SessionMachine::new(),
                closer,
                audio_ring_depth: self.config.audio_ring_depth,
            },
        );

        Ok((session, tx))
    }

    /// Spec §4.3 op 2. Returns the new session plus the broadcast sender
    /// the Audio Receiver will deliver RTP frames onto.
    pub async fn create_audio_session(
        &self,
        user_session_id: Uuid,
        source_ip: IpAddr,
        bypassed: bool,
        closer: Arc<dyn SessionCloser>,
    ) -> Result<(Session, FrameSource), HfrError> {
        self.create_session(user_session_id, source_ip, SessionKind::Audio, bypassed, Some(closer))
            .await
    }

    /// Spec §4.3 op 3. The admin-password bypass is resolved by the caller
    /// (preflight/WS upgrade) and passed in as `bypassed`; this op applies
    /// it to the session's quota/idle-timeout exemption.
    pub async fn create_spectrum_session(
        &self,
        user_session_id: Uuid,
        source_ip: IpAddr,
        bypassed: bool,
        closer: Arc<dyn SessionCloser>,
    ) -> Result<(Session, FrameSource), HfrError> {
        self.create_session(user_session_id, source_ip, SessionKind::Spectrum, bypassed, Some(closer))
            .await
    }

    /// Returns the session's state after the tune lands, so the caller can
    /// tell when a retune (spec §4.3: STREAMING → RETUNING) needs a
    /// `start_retune_timeout` armed.
    pub async fn update_audio_tuning(
        &self,
        session_id: Uuid,
        tuning: TuningState,
    ) -> Result<SessionState, HfrError> {
        tuning
            .validate()
            .map_err(HfrError::InvalidRequest)?;

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(HfrError::Gone)?;

        self.radio
            .tune_channel(
                entry.session.allocated_ssrc,
                tuning.center_frequency_hz,
                &tuning.mode,
                tuning.low_edge_hz,
                tuning.high_edge_hz,
                self.config.sample_rate,
            )
            .await?;

        entry.session.tuning = Some(tuning);
        entry.session.state = entry.machine.process_event(SessionEvent::Tune);
        Ok(entry.session.state)
    }

    /// Arms the 2s retune-acknowledgment timer (spec §4.3: "if no
    /// acknowledgment within 2s, stay STREAMING and retry tuning once").
    /// Call this after `update_audio_tuning` reports `Retuning`. If
    /// `RtpObserved` lands first, `mark_streaming` moves the state machine
    /// out of `Retuning` and this timer's next tick becomes a no-op.
    pub fn start_retune_timeout(self: Arc<Self>, session_id: Uuid, tuning: TuningState) {
        tokio::spawn(async move {
            self.run_retune_timeout(session_id, tuning).await;
        });
    }

    async fn run_retune_timeout(&self, session_id: Uuid, tuning: TuningState) {
        const RETUNE_TIMEOUT: Duration = Duration::from_secs(2);

        loop {
            tokio::time::sleep(RETUNE_TIMEOUT).await;

            let retry_ssrc = {
                let mut sessions = self.sessions.write().await;
                let Some(entry) = sessions.get_mut(&session_id) else {
                    return;
                };
                if entry.session.state != SessionState::Retuning {
                    return;
                }
                entry.session.state = entry.machine.process_event(SessionEvent::RetuneTimeout);
                if entry.session.state == SessionState::Retuning {
                    Some(entry.session.allocated_ssrc)
                } else {
                    None
                }
            };

            let Some(ssrc) = retry_ssrc else {
                return;
            };

            if let Err(e) = self
                .radio
                .tune_channel(
                    ssrc,
                    tuning.center_frequency_hz,
                    &tuning.mode,
                    tuning.low_edge_hz,
                    tuning.high_edge_hz,
                    self.config.sample_rate,
                )
                .await
            {
                warn!("retune retry failed for session {session_id}: {e}");
                return;
            }
        }
    }

    pub async fn update_spectrum_params(
        &self,
        session_id: Uuid,
        params: SpectrumParams,
    ) -> Result<(), HfrError> {
        params.validate().map_err(HfrError::InvalidRequest)?;

        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&session_id).ok_or(HfrError::Gone)?;

        self.radio
            .configure_spectrum(
                entry.session.allocated_ssrc,
                params.center_frequency_hz,
                params.bin_bandwidth_hz,
                params.bin_count,
            )
            .await?;

        entry.session.spectrum = Some(params);
        entry.session.state = entry.machine.process_event(SessionEvent::Tune);
        Ok(())
    }

    /// Called once the Audio Receiver (or the consuming WS handler) has
    /// observed the first RTP packet after a (re)tune (spec §4.3).
    pub async fn mark_streaming(&self, session_id: Uuid) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session_id) {
            entry.session.state = entry.machine.process_event(SessionEvent::RtpObserved);
        }
    }

    pub async fn touch_session(&self, session_id: Uuid) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session_id) {
            entry.session.last_active_ms = now_unix_ms();
        }
    }

    /// Per-session drop counter (spec §4.2's "dropped-frame counter per
    /// session"), incremented by the WS handler when its broadcast
    /// receiver lags or its spectrum channel is full.
    pub async fn record_dropped_frames(&self, session_id: Uuid, n: u64) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session_id) {
            entry.session.dropped_frames = entry.session.dropped_frames.saturating_add(n);
        }
    }

    pub async fn record_bytes_sent(&self, session_id: Uuid, n: u64) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session_id) {
            entry.session.bytes_sent = entry.session.bytes_sent.saturating_add(n);
        }
    }

    pub async fn get_session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|e| e.session.clone())
    }

    async fn destroy_session_locked(
        sessions: &mut HashMap<Uuid, SessionEntry>,
        ssrc_index: &SsrcIndex,
        radio: &RadioController,
        session_id: Uuid,
    ) {
        if let Some(mut entry) = sessions.remove(&session_id) {
            entry.session.state = entry.machine.process_event(SessionEvent::Close);
            entry.session.state = entry.machine.process_event(SessionEvent::Destroy);
            if let Some(closer) = &entry.closer {
                closer.close();
            }
            let ssrc = entry.session.allocated_ssrc;
            ssrc_index.write().await.remove(&ssrc);
            if let Err(e) = radio.teardown_channel(ssrc).await {
                warn!("teardown_channel failed for ssrc {ssrc}: {e}");
            }
            radio.release_ssrc(ssrc);
            info!(
                "session {} destroyed (ssrc {} released)",
                entry.session.session_id, ssrc
            );
        }
    }

    pub async fn destroy_session(&self, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        Self::destroy_session_locked(&mut sessions, &self.ssrc_index, &self.radio, session_id).await;
    }

    /// Spec §4.3 op 6: close every session for `uuid`, mark it kicked so
    /// reconnects fail fast. Idempotent — the second call finds nothing and
    /// returns 0 (spec §8 invariant).
    pub async fn kick_by_uuid(&self, user_session_id: Uuid) -> usize {
        {
            let mut bindings = self.uuid_binding.write().await;
            if let Some(binding) = bindings.get_mut(&user_session_id) {
                binding.is_kicked = true;
            }
        }

        let victims: Vec<Uuid> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|e| e.session.user_session_id == user_session_id)
            .map(|e| e.session.session_id)
            .collect();

        let mut sessions = self.sessions.write().await;
        for sid in &victims {
            Self::destroy_session_locked(&mut sessions, &self.ssrc_index, &self.radio, *sid).await;
        }
        victims.len()
    }

    pub async fn kick_by_ip(&self, ip: IpAddr) -> usize {
        let victims: Vec<Uuid> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|e| e.session.source_ip == ip)
            .map(|e| e.session.session_id)
            .collect();

        let affected_uuids: Vec<Uuid> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|e| victims.contains(&e.session.session_id))
            .map(|e| e.session.user_session_id)
            .collect();

        {
            let mut bindings = self.uuid_binding.write().await;
            for uuid in affected_uuids {
                if let Some(binding) = bindings.get_mut(&uuid) {
                    binding.is_kicked = true;
                }
            }
        }

        let mut sessions = self.sessions.write().await;
        for sid in &victims {
            Self::destroy_session_locked(&mut sessions, &self.ssrc_index, &self.radio, *sid).await;
        }
        victims.len()
    }

    /// Idle/max-life reaper sweep (spec §4.3, §5). Returns the number of
    /// sessions destroyed.
    pub async fn reap_expired(&self) -> usize {
        let now = now_unix_ms();
        let expired: Vec<Uuid> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|e| {
                e.session.is_idle(now, self.config.session_timeout_ms)
                    || e.session
                        .is_over_max_life(now, self.config.max_session_time_ms)
            })
            .map(|e| e.session.session_id)
            .collect();

        let mut sessions = self.sessions.write().await;
        for sid in &expired {
            Self::destroy_session_locked(&mut sessions, &self.ssrc_index, &self.radio, *sid).await;
        }
        expired.len()
    }

    pub async fn evict_stale_bindings(&self) {
        let now = now_unix_ms();
        let ttl = self.config.uuid_binding_ttl_ms;
        self.uuid_binding
            .write()
            .await
            .retain(|_, b| now.saturating_sub(b.last_seen_ms) <= ttl);
    }

    /// Spec §5: close every session in parallel, wait up to `deadline`,
    /// then force-close what's left.
    pub async fn shutdown(&self, deadline: Duration) {
        let all: Vec<Uuid> = self.sessions.read().await.keys().cloned().collect();
        let closers: Vec<Arc<dyn SessionCloser>> = {
            let sessions = self.sessions.read().await;
            all.iter()
                .filter_map(|sid| sessions.get(sid).and_then(|e| e.closer.clone()))
                .collect()
        };
        for closer in &closers {
            closer.close();
        }

        let drain = async {
            for sid in &all {
                self.destroy_session(*sid).await;
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("shutdown deadline exceeded, force-clearing remaining sessions");
            self.sessions.write().await.clear();
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub async fn audio_ring_depth(&self, session_id: Uuid) -> Option<usize> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|e| e.audio_ring_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopCloser(Arc<AtomicUsize>);
    impl SessionCloser for NoopCloser {
        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn manager_with(max_sessions: usize, max_per_ip: usize) -> SessionManager {
        let radio = Arc::new(
            RadioController::bind(
                "127.0.0.1:0".parse().unwrap(),
                "127.0.0.1:19999".parse().unwrap(),
                1..=10_000,
            )
            .await
            .unwrap(),
        );
        let mut config = SessionManagerConfig::default();
        config.max_sessions = max_sessions;
        config.max_sessions_per_ip = max_per_ip;
        SessionManager::new(radio, crate::audio_receiver::new_ssrc_index(), config)
    }

    #[tokio::test]
    async fn quota_exhaustion_matches_spec_scenario_2() {
        let mgr = manager_with(100, 2).await;
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let closed = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let uuid = Uuid::new_v4();
            mgr.bind_uuid(uuid, ip, "ua".into()).await.unwrap();
            mgr.create_audio_session(uuid, ip, false, Arc::new(NoopCloser(closed.clone())))
                .await
                .unwrap();
        }

        let third = Uuid::new_v4();
        mgr.bind_uuid(third, ip, "ua".into()).await.unwrap();
        let err = mgr
            .create_audio_session(third, ip, false, Arc::new(NoopCloser(closed.clone())))
            .await
            .unwrap_err();
        match err {
            HfrError::QuotaExceeded(msg) => {
                assert_eq!(msg, "Maximum unique users per IP reached (2)")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn kick_is_idempotent() {
        let mgr = manager_with(10, 10).await;
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        let uuid = Uuid::new_v4();
        let closed = Arc::new(AtomicUsize::new(0));
        mgr.bind_uuid(uuid, ip, "ua".into()).await.unwrap();
        mgr.create_audio_session(uuid, ip, false, Arc::new(NoopCloser(closed.clone())))
            .await
            .unwrap();

        assert_eq!(mgr.kick_by_uuid(uuid).await, 1);
        assert_eq!(mgr.kick_by_uuid(uuid).await, 0);
        assert!(mgr.is_kicked(uuid).await);
    }

    #[tokio::test]
    async fn ssrc_is_released_on_destroy() {
        let mgr = manager_with(10, 10).await;
        let ip: IpAddr = "10.0.0.10".parse().unwrap();
        let uuid = Uuid::new_v4();
        let closed = Arc::new(AtomicUsize::new(0));
        mgr.bind_uuid(uuid, ip, "ua".into()).await.unwrap();
        let (session, _tx) = mgr
            .create_audio_session(uuid, ip, false, Arc::new(NoopCloser(closed)))
            .await
            .unwrap();

        assert_eq!(mgr.kick_by_uuid(uuid).await, 1);
        // Allocating again should be able to reuse the just-released SSRC
        // range without hitting exhaustion.
        let uuid2 = Uuid::new_v4();
        mgr.bind_uuid(uuid2, ip, "ua".into()).await.unwrap();
        let result = mgr
            .create_audio_session(uuid2, ip, false, Arc::new(NoopCloser(Arc::new(AtomicUsize::new(0)))))
            .await;
        assert!(result.is_ok());
        assert_ne!(result.unwrap().0.allocated_ssrc, 0);
        let _ = session;
    }

    #[tokio::test]
    async fn bound_ip_is_immutable_when_enforced() {
        let mgr = manager_with(10, 10).await;
        let uuid = Uuid::new_v4();
        let ip_a: IpAddr = "10.0.0.1".parse().unwrap();
        let ip_b: IpAddr = "10.0.0.2".parse().unwrap();
        mgr.bind_uuid(uuid, ip_a, "ua".into()).await.unwrap();
        let err = mgr.bind_uuid(uuid, ip_b, "ua".into()).await.unwrap_err();
        assert_eq!(err, HfrError::NotAuthorized);
    }
}
