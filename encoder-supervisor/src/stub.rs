//! Deterministic supervisor double for tests
//!
//! No processes are spawned; bring-up outcomes are scripted per variant
//! id and every call is recorded so tests can assert idempotency.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use abr_policy::QualityVariant;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::supervisor::{EncoderSupervisor, HealthEvent, SegmentMeta};

/// Scripted bring-up behavior for one variant id
#[derive(Debug, Clone)]
pub struct VariantScript {
    /// Whether bring-up succeeds
    pub healthy: bool,
}

/// In-memory supervisor with scripted outcomes and call recording
pub struct StubSupervisor {
    scripts: Mutex<HashMap<String, VariantScript>>,
    start_calls: Mutex<Vec<(String, String)>>,
    stop_calls: Mutex<Vec<(String, String)>>,
    running: Mutex<HashSet<(String, String)>>,
    start_delay: Mutex<Option<std::time::Duration>>,
    stop_delay: Mutex<Option<std::time::Duration>>,
    events_tx: mpsc::Sender<HealthEvent>,
}

impl StubSupervisor {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<HealthEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let sup = Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            start_calls: Mutex::new(Vec::new()),
            stop_calls: Mutex::new(Vec::new()),
            running: Mutex::new(HashSet::new()),
            start_delay: Mutex::new(None),
            stop_delay: Mutex::new(None),
            events_tx,
        });
        (sup, events_rx)
    }

    /// Make bring-up fail for the given variant id.
    pub async fn script_failure(&self, variant_id: &str) {
        self.scripts
            .lock()
            .await
            .insert(variant_id.to_string(), VariantScript { healthy: false });
    }

    /// Make every bring-up attempt take this long before it observes
    /// cancellation or completes; lets tests land a stop mid-start.
    pub async fn script_start_delay(&self, delay: std::time::Duration) {
        *self.start_delay.lock().await = Some(delay);
    }

    /// Make stream teardown take this long, simulating a slow encoder
    /// shutdown while other operations race in.
    pub async fn script_stop_delay(&self, delay: std::time::Duration) {
        *self.stop_delay.lock().await = Some(delay);
    }

    /// Remove any script for the given variant id, restoring the
    /// default always-succeeds bring-up.
    pub async fn clear_script(&self, variant_id: &str) {
        self.scripts.lock().await.remove(variant_id);
    }

    /// Number of start calls recorded for a (stream, variant) pair.
    pub async fn start_count(&self, stream_id: &str, variant_id: &str) -> usize {
        self.start_calls
            .lock()
            .await
            .iter()
            .filter(|(s, v)| s == stream_id && v == variant_id)
            .count()
    }

    /// Number of stop calls recorded for a (stream, variant) pair.
    pub async fn stop_count(&self, stream_id: &str, variant_id: &str) -> usize {
        self.stop_calls
            .lock()
            .await
            .iter()
            .filter(|(s, v)| s == stream_id && v == variant_id)
            .count()
    }

    /// Kill a running variant out from under the manager and report it
    /// on the event channel, as the real monitor sweep would.
    pub async fn inject_failure(&self, stream_id: &str, variant_id: &str) {
        self.running
            .lock()
            .await
            .remove(&(stream_id.to_string(), variant_id.to_string()));
        let _ = self
            .events_tx
            .send(HealthEvent {
                stream_id: stream_id.to_string(),
                variant_id: variant_id.to_string(),
                healthy: false,
            })
            .await;
    }
}

#[async_trait]
impl EncoderSupervisor for StubSupervisor {
    async fn start_variant(
        &self,
        stream_id: &str,
        variant: &QualityVariant,
        cancel: &CancellationToken,
    ) -> Result<(), SupervisorError> {
        self.start_calls
            .lock()
            .await
            .push((stream_id.to_string(), variant.id.clone()));

        let delay = *self.start_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled {
                stream_id: stream_id.to_string(),
                variant_id: variant.id.clone(),
            });
        }

        let healthy = self
            .scripts
            .lock()
            .await
            .get(&variant.id)
            .map(|s| s.healthy)
            .unwrap_or(true);

        if !healthy {
            return Err(SupervisorError::StartTimeout {
                stream_id: stream_id.to_string(),
                variant_id: variant.id.clone(),
                timeout_secs: 0,
            });
        }

        self.running
            .lock()
            .await
            .insert((stream_id.to_string(), variant.id.clone()));
        Ok(())
    }

    async fn stop_variant(&self, stream_id: &str, variant_id: &str) -> Result<(), SupervisorError> {
        self.stop_calls
            .lock()
            .await
            .push((stream_id.to_string(), variant_id.to_string()));
        self.running
            .lock()
            .await
            .remove(&(stream_id.to_string(), variant_id.to_string()));
        Ok(())
    }

    async fn stop_stream(&self, stream_id: &str) -> Result<(), SupervisorError> {
        let delay = *self.stop_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let variants: Vec<String> = {
            let running = self.running.lock().await;
            running
                .iter()
                .filter(|(s, _)| s == stream_id)
                .map(|(_, v)| v.clone())
                .collect()
        };
        for variant in variants {
            self.stop_variant(stream_id, &variant).await?;
        }
        Ok(())
    }

    async fn is_running(&self, stream_id: &str, variant_id: &str) -> bool {
        self.running
            .lock()
            .await
            .contains(&(stream_id.to_string(), variant_id.to_string()))
    }

    async fn segments(
        &self,
        stream_id: &str,
        variant_id: &str,
    ) -> Result<Vec<SegmentMeta>, SupervisorError> {
        if !self.is_running(stream_id, variant_id).await {
            return Err(SupervisorError::NotRunning {
                stream_id: stream_id.to_string(),
                variant_id: variant_id.to_string(),
            });
        }
        Ok((0..6)
            .map(|i| SegmentMeta {
                sequence: i,
                filename: format!("segment_{i:05}.ts"),
                duration: 2.0,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str) -> QualityVariant {
        QualityVariant {
            id: id.to_string(),
            label: id.to_string(),
            width: 1280,
            height: 720,
            video_bitrate: 2_500_000,
            audio_bitrate: 128_000,
            bandwidth: 0,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let (sup, _rx) = StubSupervisor::new();
        sup.script_failure("720p").await;

        let cancel = CancellationToken::new();
        let err = sup.start_variant("ch1", &variant("720p"), &cancel).await;
        assert!(matches!(err, Err(SupervisorError::StartTimeout { .. })));
        assert!(!sup.is_running("ch1", "720p").await);
    }

    #[tokio::test]
    async fn test_records_calls() {
        let (sup, _rx) = StubSupervisor::new();
        let cancel = CancellationToken::new();

        sup.start_variant("ch1", &variant("480p"), &cancel)
            .await
            .unwrap();
        assert_eq!(sup.start_count("ch1", "480p").await, 1);
        assert!(sup.is_running("ch1", "480p").await);

        sup.stop_stream("ch1").await.unwrap();
        assert_eq!(sup.stop_count("ch1", "480p").await, 1);
        assert!(!sup.is_running("ch1", "480p").await);
    }

    #[tokio::test]
    async fn test_cancelled_start() {
        let (sup, _rx) = StubSupervisor::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sup.start_variant("ch1", &variant("480p"), &cancel).await;
        assert!(matches!(err, Err(SupervisorError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_injected_failure_emits_event() {
        let (sup, mut rx) = StubSupervisor::new();
        let cancel = CancellationToken::new();
        sup.start_variant("ch1", &variant("480p"), &cancel)
            .await
            .unwrap();

        sup.inject_failure("ch1", "480p").await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.stream_id, "ch1");
        assert_eq!(event.variant_id, "480p");
        assert!(!event.healthy);
    }
}
