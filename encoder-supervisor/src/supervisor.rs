//! Supervisor trait and the ffmpeg-backed implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use abr_policy::QualityVariant;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::process::VariantProcess;

/// Metadata for one downloadable media segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMeta {
    pub sequence: u64,
    pub filename: String,
    pub duration: f32,
}

/// Health-change notification emitted by a supervisor
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub stream_id: String,
    pub variant_id: String,
    pub healthy: bool,
}

/// Boundary to the external encoding backend.
///
/// The session manager only talks to encoders through this trait. Health
/// changes after bring-up arrive on the event channel handed out by the
/// concrete implementation's constructor.
#[async_trait]
pub trait EncoderSupervisor: Send + Sync {
    /// Bring up the encoder for one variant. Retries internally with
    /// backoff; returns once the variant is producing output, or with an
    /// error after the attempt budget or the startup timeout is spent.
    /// Honors `cancel` at every suspension point.
    async fn start_variant(
        &self,
        stream_id: &str,
        variant: &QualityVariant,
        cancel: &CancellationToken,
    ) -> Result<(), SupervisorError>;

    /// Tear down one variant's encoder. Idempotent; a teardown that does
    /// not acknowledge within the stop timeout is logged and treated as
    /// done so the control path never hangs.
    async fn stop_variant(&self, stream_id: &str, variant_id: &str) -> Result<(), SupervisorError>;

    /// Tear down every encoder belonging to a stream.
    async fn stop_stream(&self, stream_id: &str) -> Result<(), SupervisorError>;

    /// Whether an encoder is currently running for this variant.
    async fn is_running(&self, stream_id: &str, variant_id: &str) -> bool;

    /// Current segment window for a running variant.
    async fn segments(
        &self,
        stream_id: &str,
        variant_id: &str,
    ) -> Result<Vec<SegmentMeta>, SupervisorError>;
}

type ProcessKey = (String, String);

/// Production supervisor: one ffmpeg child per (stream, variant).
pub struct FfmpegSupervisor {
    config: SupervisorConfig,
    processes: Mutex<HashMap<ProcessKey, VariantProcess>>,
    events_tx: mpsc::Sender<HealthEvent>,
}

impl FfmpegSupervisor {
    /// Create a supervisor and the receiving end of its health events.
    pub fn new(config: SupervisorConfig) -> (Arc<Self>, mpsc::Receiver<HealthEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let sup = Arc::new(Self {
            config,
            processes: Mutex::new(HashMap::new()),
            events_tx,
        });
        (sup, events_rx)
    }

    /// Spawn the periodic health sweep. Dead or stale processes are
    /// removed and reported on the event channel; restart policy is the
    /// session manager's call, not ours.
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                sup.sweep().await;
            }
        })
    }

    async fn sweep(&self) {
        let mut dead = Vec::new();
        {
            let mut processes = self.processes.lock().await;
            for (key, proc) in processes.iter_mut() {
                if !proc.check_health().await {
                    dead.push(key.clone());
                }
            }
            for key in &dead {
                if let Some(mut proc) = processes.remove(key) {
                    proc.stop().await;
                }
            }
        }
        for (stream_id, variant_id) in dead {
            let _ = self
                .events_tx
                .send(HealthEvent {
                    stream_id,
                    variant_id,
                    healthy: false,
                })
                .await;
        }
    }

    /// Single bring-up attempt: spawn and poll for output readiness.
    async fn attempt_start(
        &self,
        stream_id: &str,
        variant: &QualityVariant,
        cancel: &CancellationToken,
    ) -> Result<VariantProcess, SupervisorError> {
        let mut proc = VariantProcess::new(&self.config, stream_id, variant);
        proc.spawn(&self.config, variant).await?;

        let deadline = tokio::time::Instant::now() + self.config.start_timeout();
        loop {
            if cancel.is_cancelled() {
                proc.stop().await;
                let _ = proc.cleanup().await;
                return Err(SupervisorError::Cancelled {
                    stream_id: stream_id.to_string(),
                    variant_id: variant.id.clone(),
                });
            }
            if proc.output_ready().await && proc.check_health().await {
                return Ok(proc);
            }
            if !proc.check_health().await || tokio::time::Instant::now() >= deadline {
                proc.stop().await;
                let _ = proc.cleanup().await;
                return Err(SupervisorError::StartTimeout {
                    stream_id: stream_id.to_string(),
                    variant_id: variant.id.clone(),
                    timeout_secs: self.config.start_timeout_secs,
                });
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }
}

#[async_trait]
impl EncoderSupervisor for FfmpegSupervisor {
    async fn start_variant(
        &self,
        stream_id: &str,
        variant: &QualityVariant,
        cancel: &CancellationToken,
    ) -> Result<(), SupervisorError> {
        let key = (stream_id.to_string(), variant.id.clone());
        if self.processes.lock().await.contains_key(&key) {
            return Ok(());
        }

        let mut last_err = None;
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let delay = self.config.backoff_delay(attempt - 1);
                tracing::info!(
                    stream = %stream_id,
                    variant = %variant.id,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    "retrying variant encoder start"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(SupervisorError::Cancelled {
                            stream_id: stream_id.to_string(),
                            variant_id: variant.id.clone(),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.attempt_start(stream_id, variant, cancel).await {
                Ok(proc) => {
                    self.processes.lock().await.insert(key, proc);
                    let _ = self
                        .events_tx
                        .send(HealthEvent {
                            stream_id: stream_id.to_string(),
                            variant_id: variant.id.clone(),
                            healthy: true,
                        })
                        .await;
                    return Ok(());
                }
                Err(e @ SupervisorError::Cancelled { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        stream = %stream_id,
                        variant = %variant.id,
                        error = %e,
                        "variant encoder start attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(SupervisorError::StartTimeout {
            stream_id: stream_id.to_string(),
            variant_id: variant.id.clone(),
            timeout_secs: self.config.start_timeout_secs,
        }))
    }

    async fn stop_variant(&self, stream_id: &str, variant_id: &str) -> Result<(), SupervisorError> {
        let key = (stream_id.to_string(), variant_id.to_string());
        let proc = self.processes.lock().await.remove(&key);
        let Some(mut proc) = proc else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.stop_timeout(), proc.stop()).await {
            Ok(()) => {}
            Err(_) => {
                tracing::warn!(
                    stream = %stream_id,
                    variant = %variant_id,
                    "encoder teardown did not acknowledge in time, resource may be leaked"
                );
            }
        }
        let _ = proc.cleanup().await;
        Ok(())
    }

    async fn stop_stream(&self, stream_id: &str) -> Result<(), SupervisorError> {
        let keys: Vec<ProcessKey> = {
            let processes = self.processes.lock().await;
            processes
                .keys()
                .filter(|(s, _)| s == stream_id)
                .cloned()
                .collect()
        };
        for (stream, variant) in keys {
            self.stop_variant(&stream, &variant).await?;
        }

        let stream_dir = self.config.output_dir.join(stream_id);
        if stream_dir.exists() {
            let _ = tokio::fs::remove_dir_all(&stream_dir).await;
        }
        Ok(())
    }

    async fn is_running(&self, stream_id: &str, variant_id: &str) -> bool {
        let key = (stream_id.to_string(), variant_id.to_string());
        self.processes.lock().await.contains_key(&key)
    }

    async fn segments(
        &self,
        stream_id: &str,
        variant_id: &str,
    ) -> Result<Vec<SegmentMeta>, SupervisorError> {
        let key = (stream_id.to_string(), variant_id.to_string());
        let processes = self.processes.lock().await;
        let proc = processes.get(&key).ok_or_else(|| SupervisorError::NotRunning {
            stream_id: stream_id.to_string(),
            variant_id: variant_id.to_string(),
        })?;
        proc.segments().await
    }
}

/// Check that ffmpeg is on PATH before serving anything.
pub async fn check_ffmpeg() -> Result<(), SupervisorError> {
    let status = tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SupervisorError::FfmpegNotFound
            } else {
                SupervisorError::Io(e)
            }
        })?;
    if !status.success() {
        return Err(SupervisorError::FfmpegNotFound);
    }
    Ok(())
}
