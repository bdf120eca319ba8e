//! Background maintenance task.
//!
//! Owns [`BotMetrics`] and, on a fixed interval, tidies shared state:
//!
//! 1. prune idle rate-limit windows
//! 2. evict expired profiles from the cache and purge expired keys
//! 3. drift trait levels from effectiveness samples, decay the mood
//! 4. persist the session state
//! 5. write the metrics window to `metrics:{timestamp}` and reset it
//!
//! Every step is independent. A failing or hung step is logged and the tick
//! carries on with the next one.

use crate::metrics::{BotMetrics, MaintenanceEvent};
use crate::profile_store::ProfileStore;
use crate::rate_limit::RateLimiter;
use crate::session_store::save_session;
use crate::store::KvStore;
use chrono::Utc;
use quibble_core::config::MaintenanceConfig;
use quibble_core::StorageError;
use quibble_limbic::{apply_drift, SessionState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const AGGREGATIONS_KEY: &str = "metrics:aggregations";

const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// What one maintenance pass did.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// The metrics window that was closed by this pass
    pub metrics: BotMetrics,
    pub pruned_windows: usize,
    pub expired_profiles: usize,
    pub purged_keys: usize,
    pub drifted_traits: usize,
    pub mood: f32,
    pub session_saved: bool,
    /// Set when the window had activity and was written to storage
    pub metrics_key: Option<String>,
}

enum Command {
    Flush(oneshot::Sender<MaintenanceReport>),
}

pub struct Maintenance {
    config: MaintenanceConfig,
    store: Arc<dyn KvStore>,
    profiles: Arc<ProfileStore>,
    limiter: Arc<RateLimiter>,
    session: Arc<RwLock<SessionState>>,
    metrics: BotMetrics,
}

impl Maintenance {
    pub fn new(
        config: MaintenanceConfig,
        store: Arc<dyn KvStore>,
        profiles: Arc<ProfileStore>,
        limiter: Arc<RateLimiter>,
        session: Arc<RwLock<SessionState>>,
    ) -> Self {
        Self {
            config,
            store,
            profiles,
            limiter,
            session,
            metrics: BotMetrics::default(),
        }
    }

    pub fn record(&mut self, event: MaintenanceEvent) {
        self.metrics.record(event);
    }

    pub fn metrics(&self) -> &BotMetrics {
        &self.metrics
    }

    /// Run every maintenance step once and close the metrics window.
    pub async fn run_once(&mut self) -> MaintenanceReport {
        let now = Utc::now();
        let mut report = MaintenanceReport {
            pruned_windows: self.limiter.prune_stale(now).await,
            ..Default::default()
        };

        report.expired_profiles = self.profiles.sweep_expired().await;
        report.purged_keys = guarded("purge expired keys", self.store.purge_expired())
            .await
            .unwrap_or(0);

        let samples = std::mem::take(&mut self.metrics.effectiveness);
        let snapshot = {
            let mut state = self.session.write().await;
            report.drifted_traits = apply_drift(&mut state, &samples, self.config.drift_alpha);
            state.mood.decay(self.config.mood_decay);
            state.touch();
            state.clone()
        };
        report.mood = snapshot.mood.value();

        report.session_saved = guarded("persist session", save_session(self.store.as_ref(), &snapshot))
            .await
            .is_some();

        let closed = std::mem::replace(&mut self.metrics, BotMetrics::starting_at(now));
        if !closed.is_empty() {
            let key = format!("metrics:{}", now.timestamp_millis());
            if guarded("aggregate metrics", self.write_metrics(&key, &closed))
                .await
                .is_some()
            {
                report.metrics_key = Some(key);
            }
        }
        report.metrics = closed;

        tracing::info!(
            "Maintenance: {} windows pruned, {} profiles expired, {} traits drifted, mood {:.2}, {} interactions",
            report.pruned_windows,
            report.expired_profiles,
            report.drifted_traits,
            report.mood,
            report.metrics.total_interactions
        );
        report
    }

    async fn write_metrics(&self, key: &str, metrics: &BotMetrics) -> Result<(), StorageError> {
        let retention = Duration::from_secs(
            self.config.metrics_retention_days.max(0) as u64 * 24 * 60 * 60,
        );
        self.store.hash_set(key, &metrics.to_fields()).await?;
        self.store.expire(key, retention).await?;
        self.store.increment(AGGREGATIONS_KEY).await?;
        Ok(())
    }

    /// Move the task onto the runtime. Events and flushes go through the
    /// returned handle.
    pub fn spawn(self) -> MaintenanceHandle {
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(event_rx, command_rx, shutdown_rx));

        MaintenanceHandle {
            events: event_tx,
            commands: command_tx,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<MaintenanceEvent>,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) -> MaintenanceReport {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Maintenance started (every {:?})", period);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(command) = commands.recv() => match command {
                    Command::Flush(reply) => {
                        self.drain(&mut events);
                        let report = self.run_once().await;
                        let _ = reply.send(report);
                    }
                },
                Some(event) = events.recv() => self.record(event),
                _ = ticker.tick() => {
                    self.drain(&mut events);
                    self.run_once().await;
                }
            }
        }

        self.drain(&mut events);
        let report = self.run_once().await;
        tracing::info!("Maintenance stopped");
        report
    }

    fn drain(&mut self, events: &mut mpsc::Receiver<MaintenanceEvent>) {
        while let Ok(event) = events.try_recv() {
            self.record(event);
        }
    }
}

async fn guarded<T, F>(step: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(STEP_TIMEOUT, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!("Maintenance step '{}' failed: {}", step, e);
            None
        }
        Err(_) => {
            tracing::error!("Maintenance step '{}' timed out ({:?})", step, STEP_TIMEOUT);
            None
        }
    }
}

/// Control surface for a spawned [`Maintenance`] task.
pub struct MaintenanceHandle {
    events: mpsc::Sender<MaintenanceEvent>,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<MaintenanceReport>,
}

impl MaintenanceHandle {
    /// Queue an event without waiting. Dropped with a warning if the
    /// buffer is full.
    pub fn record(&self, event: MaintenanceEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Maintenance event buffer full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Maintenance stopped, event discarded");
            }
        }
    }

    /// Force a maintenance pass now and return its report.
    pub async fn flush(&self) -> Option<MaintenanceReport> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Flush(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Stop the task after one final pass.
    pub async fn shutdown(self) -> Option<MaintenanceReport> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("Maintenance task ended abnormally: {}", e);
                None
            }
        }
    }
}
