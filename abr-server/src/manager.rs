//! Session registry and state-machine driver
//!
//! The manager owns the only shared mutable structure in this core: the
//! map of stream id to session slot. All mutation for one stream is
//! serialized behind that stream's slot mutex (single writer per key);
//! different streams proceed fully in parallel. Reads go through a
//! separately published snapshot map, so a reader never waits on a
//! stream mid-bring-up and never observes a half-applied change.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use abr_policy::{
    validate_ladder, BandwidthEstimator, BandwidthSample, LadderError, PolicyConfig,
    QualityVariant, SwitchPolicy, SwitchReason,
};
use dashmap::DashMap;
use encoder_supervisor::{EncoderSupervisor, HealthEvent, SupervisorError};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogStore;
use crate::error::AbrError;
use crate::playlist;
use crate::session::{AbrSession, SessionStatus, SessionSummary};

/// Writer-side state for one stream
struct StreamSlot {
    session: Option<Arc<AbrSession>>,
    policy: SwitchPolicy,
}

/// Rendering knobs for the session server
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    /// Segments advertised per media playlist (default: 6)
    #[serde(default = "default_segment_window")]
    pub segment_window: usize,
}

fn default_segment_window() -> usize {
    playlist::SEGMENT_WINDOW
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            segment_window: default_segment_window(),
        }
    }
}

/// Authoritative ABR session registry.
///
/// Constructed explicitly at process start and torn down with
/// [`SessionManager::shutdown`]; there is no ambient global instance.
pub struct SessionManager {
    catalog: Arc<dyn CatalogStore>,
    supervisor: Arc<dyn EncoderSupervisor>,
    policy_config: PolicyConfig,
    /// Per-stream writer slots; the mutex is the single-writer lock.
    /// Entries are created on first use and never removed, so a start
    /// and a stop racing on the same id always contend on one lock
    slots: DashMap<String, Arc<Mutex<StreamSlot>>>,
    /// Read-side snapshots, swapped atomically on every committed change
    published: DashMap<String, Arc<AbrSession>>,
    /// Cancellation for in-flight bring-up, reachable without the slot lock
    cancels: DashMap<String, CancellationToken>,
    estimator: Mutex<BandwidthEstimator>,
    segment_window: usize,
}

impl SessionManager {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        supervisor: Arc<dyn EncoderSupervisor>,
        policy_config: PolicyConfig,
        server_config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            supervisor,
            estimator: Mutex::new(BandwidthEstimator::new(&policy_config)),
            policy_config,
            slots: DashMap::new(),
            published: DashMap::new(),
            cancels: DashMap::new(),
            segment_window: server_config.segment_window.max(1),
        })
    }

    /// Consume supervisor health events for the life of the process.
    pub fn spawn_health_loop(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<HealthEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.handle_health_event(event).await;
            }
        })
    }

    /// Start a session for a stream, or return the existing one.
    ///
    /// Idempotent for `active`/`initializing` sessions; a session in
    /// `error` is torn down and restarted through `initializing`. With
    /// partial encoder failure the session still comes up on the
    /// surviving variants; only total failure surfaces an error.
    pub async fn start(
        &self,
        stream_id: &str,
        override_ladder: Option<Vec<QualityVariant>>,
    ) -> Result<Arc<AbrSession>, AbrError> {
        let slot = self.slot(stream_id);
        let mut guard = slot.lock().await;

        if let Some(session) = &guard.session {
            match session.status {
                SessionStatus::Active | SessionStatus::Initializing => {
                    return Ok(Arc::clone(session));
                }
                SessionStatus::Error => {
                    tracing::info!(stream = %stream_id, "restarting session after error");
                    let _ = self.supervisor.stop_stream(stream_id).await;
                    guard.policy.reset();
                }
                SessionStatus::Stopped => {}
            }
        }

        let ladder = match override_ladder {
            Some(ladder) => ladder,
            None => self
                .catalog
                .load_ladder(stream_id)
                .await?
                .ok_or_else(|| AbrError::StreamNotFound(stream_id.to_string()))?,
        };
        validate_ladder(&ladder)?;
        let eligible: Vec<QualityVariant> = ladder.into_iter().filter(|v| v.enabled).collect();
        if eligible.is_empty() {
            return Err(AbrError::Validation(LadderError::Empty));
        }

        let cancel = CancellationToken::new();
        self.cancels.insert(stream_id.to_string(), cancel.clone());

        let initializing = AbrSession::new(stream_id, eligible.clone());
        self.publish(&mut guard, Arc::new(initializing.clone()));

        let mut snapshot = eligible;
        let mut any_healthy = false;
        for variant in &mut snapshot {
            match self
                .supervisor
                .start_variant(stream_id, variant, &cancel)
                .await
            {
                Ok(()) => any_healthy = true,
                Err(SupervisorError::Cancelled { .. }) => {
                    // A concurrent stop wins. Variants brought up before
                    // the cancellation are torn down here, while the
                    // slot lock is still held; the stop call observes an
                    // empty slot and does not repeat the teardown.
                    tracing::info!(stream = %stream_id, "session start cancelled");
                    if let Err(e) = self.supervisor.stop_stream(stream_id).await {
                        tracing::warn!(
                            stream = %stream_id,
                            error = %e,
                            "teardown after cancelled start did not fully acknowledge"
                        );
                    }
                    let mut stopped = initializing;
                    stopped.status = SessionStatus::Stopped;
                    guard.session = None;
                    self.published.remove(stream_id);
                    return Ok(Arc::new(stopped));
                }
                Err(e) => {
                    tracing::warn!(
                        stream = %stream_id,
                        variant = %variant.id,
                        error = %e,
                        "variant failed to come up, disabling in session"
                    );
                    variant.enabled = false;
                }
            }
        }

        let mut next = initializing;
        next.variants = snapshot;

        if any_healthy {
            debug_assert!(next.status.can_transition_to(SessionStatus::Active));
            next.status = SessionStatus::Active;
            next.master_playlist = Some(playlist::master_playlist(&next.variants));
            let session = Arc::new(next);
            self.publish(&mut guard, Arc::clone(&session));
            tracing::info!(
                stream = %stream_id,
                variants = session.variants.iter().filter(|v| v.enabled).count(),
                "session active"
            );
            Ok(session)
        } else {
            debug_assert!(next.status.can_transition_to(SessionStatus::Error));
            next.status = SessionStatus::Error;
            next.stale = true;
            self.publish(&mut guard, Arc::new(next));
            tracing::error!(stream = %stream_id, "all variant encoders failed to come up");
            Err(AbrError::EncodersFailed(stream_id.to_string()))
        }
    }

    /// Stop a session and remove it from the registry.
    ///
    /// Idempotent: stopping an absent session is a no-op success. An
    /// in-flight start or switch evaluation for the stream is cancelled
    /// before the slot lock is taken, so stop never waits out a full
    /// bring-up.
    pub async fn stop(&self, stream_id: &str) -> Result<(), AbrError> {
        if let Some(cancel) = self.cancels.get(stream_id) {
            cancel.cancel();
        }

        let Some(slot) = self.slots.get(stream_id).map(|e| Arc::clone(e.value())) else {
            // Nothing was ever started for this id: slot entries are
            // retained for the life of the process, so no slot means no
            // published session and no encoders either
            return Ok(());
        };
        let mut guard = slot.lock().await;

        if guard.session.take().is_some() {
            if let Err(e) = self.supervisor.stop_stream(stream_id).await {
                tracing::warn!(
                    stream = %stream_id,
                    error = %e,
                    "teardown did not fully acknowledge, proceeding with removal"
                );
            }
            self.estimator.lock().await.forget(stream_id);
            tracing::info!(stream = %stream_id, "session stopped");
        }

        guard.policy.reset();
        self.published.remove(stream_id);
        self.cancels.remove(stream_id);
        Ok(())
    }

    /// Current session snapshot for a stream.
    pub fn get_session(&self, stream_id: &str) -> Result<Arc<AbrSession>, AbrError> {
        self.published
            .get(stream_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| AbrError::SessionNotFound(stream_id.to_string()))
    }

    /// Read-only snapshot of the whole registry.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.published.iter().map(|e| e.value().summary()).collect();
        summaries.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        summaries
    }

    /// Stored catalog ladder for a stream (not the session snapshot).
    pub async fn variants(&self, stream_id: &str) -> Result<Vec<QualityVariant>, AbrError> {
        self.catalog
            .load_ladder(stream_id)
            .await?
            .ok_or_else(|| AbrError::StreamNotFound(stream_id.to_string()))
    }

    /// Feed one delivery-timing sample into the session's estimator and
    /// apply any resulting switch decision. Bad samples are dropped and
    /// logged; they never fail the ingestion path or touch other streams.
    pub async fn ingest_sample(&self, stream_id: &str, sample: BandwidthSample) {
        if let Err(e) = self.apply_sample(stream_id, sample).await {
            tracing::warn!(stream = %stream_id, error = %e, "dropping bandwidth sample");
        }
    }

    async fn apply_sample(
        &self,
        stream_id: &str,
        sample: BandwidthSample,
    ) -> Result<(), AbrError> {
        if sample.observed_bytes_per_sec == 0 {
            tracing::debug!(stream = %stream_id, "ignoring zero-throughput sample");
            return Ok(());
        }

        let Some(slot) = self.slots.get(stream_id).map(|e| Arc::clone(e.value())) else {
            return Err(AbrError::SessionNotFound(stream_id.to_string()));
        };
        let mut guard = slot.lock().await;
        let Some(current) = guard.session.clone() else {
            return Err(AbrError::SessionNotFound(stream_id.to_string()));
        };
        if current.status != SessionStatus::Active {
            tracing::debug!(
                stream = %stream_id,
                status = ?current.status,
                "sample for non-active session ignored"
            );
            return Ok(());
        }

        // Samples apply in arrival order; a decision computed from a
        // stale sample must not overwrite newer state
        if let Some(newest) = current.last_sample_at {
            if sample.timestamp < newest {
                tracing::debug!(stream = %stream_id, "out-of-order sample rejected");
                return Ok(());
            }
        }

        let (estimate, recent) = {
            let mut estimator = self.estimator.lock().await;
            let estimate = estimator.push_sample(stream_id, &sample);
            (estimate, estimator.recent_samples(stream_id))
        };
        let enabled = current.enabled_ids();
        let decision =
            guard
                .policy
                .evaluate(&current.variants, &enabled, Some(estimate), Instant::now());

        let mut next = (*current).clone();
        next.last_sample_at = Some(sample.timestamp);
        next.last_estimate = Some(estimate);
        next.recent_samples = recent;

        if decision.reason != SwitchReason::NoChange && decision.recommended != enabled {
            let effective = self
                .apply_switch(stream_id, &next.variants, &enabled, decision.recommended)
                .await;
            for v in &mut next.variants {
                v.enabled = effective.contains(&v.id);
            }
            next.master_playlist = Some(playlist::master_playlist(&next.variants));
            tracing::info!(
                stream = %stream_id,
                reason = ?decision.reason,
                enabled = ?effective,
                estimate,
                "variant set switched"
            );
        }

        self.publish(&mut guard, Arc::new(next));
        Ok(())
    }

    /// Reconcile encoder processes with a recommended set. Variants
    /// entering the set get a lazy encoder start (and stay disabled if
    /// it fails); variants leaving it have their encoder released.
    async fn apply_switch(
        &self,
        stream_id: &str,
        variants: &[QualityVariant],
        enabled: &BTreeSet<String>,
        recommended: BTreeSet<String>,
    ) -> BTreeSet<String> {
        let cancel = self
            .cancels
            .get(stream_id)
            .map(|c| c.value().clone())
            .unwrap_or_default();

        let mut effective = recommended;
        let wanted: Vec<String> = effective.iter().cloned().collect();
        for id in wanted {
            if enabled.contains(&id) || self.supervisor.is_running(stream_id, &id).await {
                continue;
            }
            let Some(variant) = variants.iter().find(|v| v.id == id) else {
                effective.remove(&id);
                continue;
            };
            if let Err(e) = self
                .supervisor
                .start_variant(stream_id, variant, &cancel)
                .await
            {
                tracing::warn!(
                    stream = %stream_id,
                    variant = %id,
                    error = %e,
                    "lazy encoder start failed, variant stays disabled"
                );
                effective.remove(&id);
            }
        }

        for id in enabled {
            if !effective.contains(id) {
                if let Err(e) = self.supervisor.stop_variant(stream_id, id).await {
                    tracing::warn!(
                        stream = %stream_id,
                        variant = %id,
                        error = %e,
                        "failed to release encoder for dropped variant"
                    );
                }
            }
        }

        effective
    }

    /// React to a lost variant encoder: retry within the supervisor's
    /// budget, disable the variant on exhaustion, and fail the session
    /// when no variant survives.
    async fn handle_health_event(&self, event: HealthEvent) {
        if event.healthy {
            return;
        }
        let Some(slot) = self
            .slots
            .get(&event.stream_id)
            .map(|e| Arc::clone(e.value()))
        else {
            return;
        };
        let mut guard = slot.lock().await;
        let Some(current) = guard.session.clone() else {
            return;
        };
        if current.status != SessionStatus::Active {
            return;
        }
        let Some(variant) = current
            .variants
            .iter()
            .find(|v| v.id == event.variant_id && v.enabled)
            .cloned()
        else {
            return;
        };

        tracing::warn!(
            stream = %event.stream_id,
            variant = %event.variant_id,
            "variant encoder lost, attempting restart"
        );
        let cancel = self
            .cancels
            .get(&event.stream_id)
            .map(|c| c.value().clone())
            .unwrap_or_default();

        if self
            .supervisor
            .start_variant(&event.stream_id, &variant, &cancel)
            .await
            .is_ok()
        {
            tracing::info!(
                stream = %event.stream_id,
                variant = %event.variant_id,
                "variant encoder recovered"
            );
            return;
        }

        let mut next = (*current).clone();
        for v in &mut next.variants {
            if v.id == event.variant_id {
                v.enabled = false;
            }
        }

        if next.variants.iter().any(|v| v.enabled) {
            next.master_playlist = Some(playlist::master_playlist(&next.variants));
            tracing::warn!(
                stream = %event.stream_id,
                variant = %event.variant_id,
                "variant did not recover within retry budget, disabled"
            );
        } else {
            debug_assert!(next.status.can_transition_to(SessionStatus::Error));
            next.status = SessionStatus::Error;
            next.stale = true;
            // Last-known master playlist is retained so connected
            // clients degrade instead of hard-failing
            tracing::error!(stream = %event.stream_id, "all variant encoders lost");
        }
        self.publish(&mut guard, Arc::new(next));
    }

    /// Last rendered master playlist and whether it is stale.
    pub fn master_playlist(&self, stream_id: &str) -> Result<(String, bool), AbrError> {
        let session = self.get_session(stream_id)?;
        match &session.master_playlist {
            Some(playlist) => Ok((playlist.clone(), session.stale)),
            None => Err(AbrError::SessionNotFound(stream_id.to_string())),
        }
    }

    /// Media playlist for one enabled variant of an active session.
    pub async fn media_playlist(
        &self,
        stream_id: &str,
        variant_id: &str,
    ) -> Result<String, AbrError> {
        let session = self.get_session(stream_id)?;
        let available = session.status == SessionStatus::Active
            && session
                .variants
                .iter()
                .any(|v| v.id == variant_id && v.enabled);
        if !available {
            return Err(AbrError::VariantNotAvailable {
                stream_id: stream_id.to_string(),
                variant_id: variant_id.to_string(),
            });
        }
        let segments = self.supervisor.segments(stream_id, variant_id).await?;
        Ok(playlist::media_playlist(&segments, self.segment_window))
    }

    /// Stop every session (process shutdown).
    pub async fn shutdown(&self) {
        let streams: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for stream_id in streams {
            let _ = self.stop(&stream_id).await;
        }
    }

    fn slot(&self, stream_id: &str) -> Arc<Mutex<StreamSlot>> {
        Arc::clone(
            self.slots
                .entry(stream_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(StreamSlot {
                        session: None,
                        policy: SwitchPolicy::new(self.policy_config.clone()),
                    }))
                })
                .value(),
        )
    }

    /// Commit point: the snapshot becomes visible to readers here,
    /// always under the stream's slot lock.
    fn publish(&self, guard: &mut StreamSlot, session: Arc<AbrSession>) {
        self.published
            .insert(session.stream_id.clone(), Arc::clone(&session));
        guard.session = Some(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use chrono::{Duration as ChronoDuration, Utc};
    use encoder_supervisor::StubSupervisor;

    fn ladder() -> Vec<QualityVariant> {
        let mk = |id: &str, w: u32, h: u32, bw: u64| QualityVariant {
            id: id.to_string(),
            label: id.to_string(),
            width: w,
            height: h,
            video_bitrate: bw,
            audio_bitrate: 0,
            bandwidth: bw,
            enabled: true,
        };
        vec![
            mk("480p", 854, 480, 800_000),
            mk("720p", 1280, 720, 2_500_000),
            mk("1080p", 1920, 1080, 5_000_000),
        ]
    }

    fn instant_policy() -> PolicyConfig {
        PolicyConfig {
            downgrade_hold_secs: 0,
            upgrade_hold_secs: 0,
            ..PolicyConfig::default()
        }
    }

    async fn setup(
        policy: PolicyConfig,
    ) -> (
        Arc<SessionManager>,
        Arc<StubSupervisor>,
        mpsc::Receiver<HealthEvent>,
    ) {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert("ch1", ladder()).await;
        let (supervisor, events) = StubSupervisor::new();
        let manager =
            SessionManager::new(catalog, supervisor.clone(), policy, ServerConfig::default());
        (manager, supervisor, events)
    }

    fn sample(bytes_per_sec: u64) -> BandwidthSample {
        BandwidthSample {
            observed_bytes_per_sec: bytes_per_sec,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_start_brings_up_all_variants() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;

        let session = manager.start("ch1", None).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.enabled_ids().len(), 3);
        assert!(session.master_playlist.is_some());

        for id in ["480p", "720p", "1080p"] {
            assert_eq!(supervisor.start_count("ch1", id).await, 1);
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;

        let first = manager.start("ch1", None).await.unwrap();
        let second = manager.start("ch1", None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(supervisor.start_count("ch1", "720p").await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_yield_one_session() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;

        let (a, b) = tokio::join!(manager.start("ch1", None), manager.start("ch1", None));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.stream_id, b.stream_id);
        assert_eq!(manager.list_sessions().len(), 1);
        // No duplicate encoder-start calls
        for id in ["480p", "720p", "1080p"] {
            assert_eq!(supervisor.start_count("ch1", id).await, 1);
        }
    }

    #[tokio::test]
    async fn test_empty_ladder_rejected_without_session() {
        let (manager, _supervisor, _events) = setup(PolicyConfig::default()).await;

        let err = manager.start("ch1", Some(vec![])).await.unwrap_err();
        assert!(matches!(err, AbrError::Validation(LadderError::Empty)));
        assert!(matches!(
            manager.get_session("ch1"),
            Err(AbrError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_stream_rejected() {
        let (manager, _supervisor, _events) = setup(PolicyConfig::default()).await;
        let err = manager.start("nope", None).await.unwrap_err();
        assert!(matches!(err, AbrError::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn test_partial_failure_degrades_session() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;
        supervisor.script_failure("1080p").await;

        let session = manager.start("ch1", None).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(!session.enabled_ids().contains("1080p"));
        assert!(session.enabled_ids().contains("720p"));

        let playlist = session.master_playlist.as_ref().unwrap();
        assert!(!playlist.contains("1080p"));
    }

    #[tokio::test]
    async fn test_total_failure_yields_error_session() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;
        for id in ["480p", "720p", "1080p"] {
            supervisor.script_failure(id).await;
        }

        let err = manager.start("ch1", None).await.unwrap_err();
        assert!(matches!(err, AbrError::EncodersFailed(_)));

        // The session still exists and reports its error state
        let session = manager.get_session("ch1").unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert!(session.master_playlist.is_none());
        assert!(manager.master_playlist("ch1").is_err());
    }

    #[tokio::test]
    async fn test_restart_after_error() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;
        for id in ["480p", "720p", "1080p"] {
            supervisor.script_failure(id).await;
        }
        assert!(manager.start("ch1", None).await.is_err());

        for id in ["480p", "720p", "1080p"] {
            supervisor.clear_script(id).await;
        }
        let session = manager.start("ch1", None).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (manager, _supervisor, _events) = setup(PolicyConfig::default()).await;

        // Absent session: no-op success
        assert!(manager.stop("ch1").await.is_ok());

        manager.start("ch1", None).await.unwrap();
        assert!(manager.stop("ch1").await.is_ok());
        assert!(matches!(
            manager.get_session("ch1"),
            Err(AbrError::SessionNotFound(_))
        ));
        // Stopping again is still fine
        assert!(manager.stop("ch1").await.is_ok());
    }

    #[tokio::test]
    async fn test_start_during_slow_teardown_stays_stoppable() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;
        manager.start("ch1", None).await.unwrap();
        supervisor
            .script_stop_delay(std::time::Duration::from_millis(100))
            .await;

        // A restart landing while the stop is mid-teardown must end up
        // in the same registry entry, not an orphaned one
        let stopper = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.stop("ch1").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let restarted = manager.start("ch1", None).await.unwrap();
        stopper.await.unwrap().unwrap();
        assert_eq!(restarted.status, SessionStatus::Active);

        manager.stop("ch1").await.unwrap();
        assert!(matches!(
            manager.get_session("ch1"),
            Err(AbrError::SessionNotFound(_))
        ));
        for id in ["480p", "720p", "1080p"] {
            assert!(!supervisor.is_running("ch1", id).await);
        }
    }

    #[tokio::test]
    async fn test_stop_during_start_tears_down_partial_bring_up() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;
        supervisor
            .script_start_delay(std::time::Duration::from_millis(20))
            .await;

        // Stop lands after the first variant is up but before the rest
        let starter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start("ch1", None).await })
        };
        while !supervisor.is_running("ch1", "480p").await {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        manager.stop("ch1").await.unwrap();
        let session = starter.await.unwrap().unwrap();

        assert_eq!(session.status, SessionStatus::Stopped);
        assert!(matches!(
            manager.get_session("ch1"),
            Err(AbrError::SessionNotFound(_))
        ));
        for id in ["480p", "720p", "1080p"] {
            assert!(
                !supervisor.is_running("ch1", id).await,
                "{id} encoder left running after cancelled start"
            );
        }
    }

    #[tokio::test]
    async fn test_stop_tears_down_encoders() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;
        manager.start("ch1", None).await.unwrap();
        manager.stop("ch1").await.unwrap();

        for id in ["480p", "720p", "1080p"] {
            assert!(!supervisor.is_running("ch1", id).await);
        }
    }

    #[tokio::test]
    async fn test_sample_triggers_downgrade() {
        let (manager, supervisor, _events) = setup(instant_policy()).await;
        manager.start("ch1", None).await.unwrap();

        // 3 MB/s: 1080p no longer fits under the 0.85 margin
        manager.ingest_sample("ch1", sample(3_000_000)).await;

        let session = manager.get_session("ch1").unwrap();
        let expected: BTreeSet<String> = ["480p", "720p"].iter().map(|s| s.to_string()).collect();
        assert_eq!(session.enabled_ids(), expected);
        assert!(!session.master_playlist.as_ref().unwrap().contains("1080p"));
        assert_eq!(session.last_estimate, Some(3_000_000));
        // The dropped variant's encoder is released
        assert!(!supervisor.is_running("ch1", "1080p").await);
        assert_eq!(supervisor.stop_count("ch1", "1080p").await, 1);
    }

    #[tokio::test]
    async fn test_upgrade_lazily_restarts_encoder() {
        let (manager, supervisor, _events) = setup(instant_policy()).await;
        manager.start("ch1", None).await.unwrap();
        manager.ingest_sample("ch1", sample(3_000_000)).await;
        assert!(!supervisor.is_running("ch1", "1080p").await);

        // Sustained recovery (instant holds in this config)
        for _ in 0..20 {
            manager.ingest_sample("ch1", sample(20_000_000)).await;
        }

        let session = manager.get_session("ch1").unwrap();
        assert!(session.enabled_ids().contains("1080p"));
        assert!(supervisor.is_running("ch1", "1080p").await);
    }

    #[tokio::test]
    async fn test_out_of_order_sample_rejected() {
        let (manager, _supervisor, _events) = setup(instant_policy()).await;
        manager.start("ch1", None).await.unwrap();

        let newer = BandwidthSample {
            observed_bytes_per_sec: 8_000_000,
            timestamp: Utc::now(),
        };
        let older = BandwidthSample {
            observed_bytes_per_sec: 100,
            timestamp: newer.timestamp - ChronoDuration::seconds(30),
        };

        manager.ingest_sample("ch1", newer.clone()).await;
        manager.ingest_sample("ch1", older).await;

        let session = manager.get_session("ch1").unwrap();
        assert_eq!(session.last_sample_at, Some(newer.timestamp));
        assert_eq!(session.last_estimate, Some(8_000_000));
        // The rejected sample never reached the estimator window
        assert_eq!(session.recent_samples, vec![8_000_000]);
    }

    #[tokio::test]
    async fn test_media_playlist_window_is_configurable() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert("ch1", ladder()).await;
        let (supervisor, _events) = StubSupervisor::new();
        let manager = SessionManager::new(
            catalog,
            supervisor.clone(),
            PolicyConfig::default(),
            ServerConfig { segment_window: 2 },
        );
        manager.start("ch1", None).await.unwrap();

        let playlist = manager.media_playlist("ch1", "720p").await.unwrap();
        assert_eq!(playlist.matches("#EXTINF").count(), 2);
        // Stub exposes six segments; the window keeps the newest two
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:4"));
    }

    #[tokio::test]
    async fn test_sample_for_absent_session_is_dropped() {
        let (manager, _supervisor, _events) = setup(instant_policy()).await;
        // Must not panic or create state
        manager.ingest_sample("ghost", sample(1_000_000)).await;
        assert!(manager.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_media_playlist_availability() {
        let (manager, supervisor, _events) = setup(PolicyConfig::default()).await;
        supervisor.script_failure("1080p").await;
        manager.start("ch1", None).await.unwrap();

        let playlist = manager.media_playlist("ch1", "720p").await.unwrap();
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE"));

        // Disabled variant answers "not available", not a stale playlist
        let err = manager.media_playlist("ch1", "1080p").await.unwrap_err();
        assert!(matches!(err, AbrError::VariantNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_lost_variant_is_disabled_after_retry() {
        let (manager, supervisor, events) = setup(PolicyConfig::default()).await;
        manager.spawn_health_loop(events);
        manager.start("ch1", None).await.unwrap();

        // Restart will fail too: the variant stays down
        supervisor.script_failure("1080p").await;
        supervisor.inject_failure("ch1", "1080p").await;

        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let session = manager.get_session("ch1").unwrap();
            if !session.enabled_ids().contains("1080p") {
                assert_eq!(session.status, SessionStatus::Active);
                assert!(!session.master_playlist.as_ref().unwrap().contains("1080p"));
                return;
            }
        }
        panic!("variant was never disabled after injected failure");
    }

    #[tokio::test]
    async fn test_all_variants_lost_keeps_stale_playlist() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert("ch1", ladder()[..1].to_vec()).await;
        let (supervisor, events) = StubSupervisor::new();
        let manager = SessionManager::new(
            catalog,
            supervisor.clone(),
            PolicyConfig::default(),
            ServerConfig::default(),
        );
        manager.spawn_health_loop(events);

        let session = manager.start("ch1", None).await.unwrap();
        let playlist_before = session.master_playlist.clone().unwrap();

        supervisor.script_failure("480p").await;
        supervisor.inject_failure("ch1", "480p").await;

        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let session = manager.get_session("ch1").unwrap();
            if session.status == SessionStatus::Error {
                // Already-connected clients keep a stale playlist
                assert!(session.stale);
                let (playlist, stale) = manager.master_playlist("ch1").unwrap();
                assert_eq!(playlist, playlist_before);
                assert!(stale);
                return;
            }
        }
        panic!("session never transitioned to error");
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert("ch1", ladder()).await;
        catalog.insert("ch2", ladder()).await;
        let (supervisor, _events) = StubSupervisor::new();
        let manager = SessionManager::new(
            catalog,
            supervisor.clone(),
            PolicyConfig::default(),
            ServerConfig::default(),
        );

        manager.start("ch1", None).await.unwrap();
        manager.start("ch2", None).await.unwrap();
        assert_eq!(manager.list_sessions().len(), 2);

        manager.shutdown().await;
        assert!(manager.list_sessions().is_empty());
        assert!(!supervisor.is_running("ch1", "720p").await);
        assert!(!supervisor.is_running("ch2", "720p").await);
    }
}
