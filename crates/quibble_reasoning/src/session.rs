//! Session orchestrator: the per-message pipeline and process lifecycle.
//!
//! ```text
//! validate -> rate limit -> analyze -> select trait -> compose -> record
//! ```
//!
//! Every path through [`SessionOrchestrator::handle`] ends in a textual reply.
//! Only startup can fail, when configuration or storage is unusable.

use crate::backend::GenerativeBackend;
use crate::composer::{ComposeRequest, ReplySource, ResponseComposer};
use crate::providers::build_backend;
use anyhow::{Context, Result};
use quibble_core::config::MaintenanceConfig;
use quibble_core::{Analyzer, InboundMessage, InteractionRecord, KeywordAnalyzer, Message, QuibbleConfig};
use quibble_limbic::{effectiveness, PersonalitySelector, SessionState};
use quibble_memory::{
    load_session, open_store, save_session, KvStore, Maintenance, MaintenanceEvent,
    MaintenanceHandle, MaintenanceReport, ProfileStore, RateLimiter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};

const OFFLINE_REPLY: &str = "I'm going offline for a bit. Catch you later!";
const NOT_READY_REPLY: &str = "I'm still waking up. Try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, `start` not yet called
    Uninitialized,
    /// Accepting messages, none in flight
    Ready,
    /// At least one message in flight
    Processing,
    /// Shutdown requested; new messages get the offline notice
    Disconnecting,
    Closed,
}

impl LifecycleState {
    pub fn accepts_messages(self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Generated,
    /// Backend unavailable; the trait template was used
    Fallback,
    Throttled,
    Invalid,
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub outcome: ReplyOutcome,
    pub trait_name: Option<String>,
}

impl Reply {
    fn notice(text: impl Into<String>, outcome: ReplyOutcome) -> Self {
        Self {
            text: text.into(),
            outcome,
            trait_name: None,
        }
    }
}

pub struct SessionOrchestrator {
    analyzer: Box<dyn Analyzer>,
    selector: PersonalitySelector,
    composer: ResponseComposer,
    limiter: Arc<RateLimiter>,
    profiles: Arc<ProfileStore>,
    store: Arc<dyn KvStore>,
    session: Arc<RwLock<SessionState>>,
    maintenance_config: MaintenanceConfig,
    maintenance: RwLock<Option<MaintenanceHandle>>,
    lifecycle: watch::Sender<LifecycleState>,
    in_flight: AtomicUsize,
    idle: Notify,
    shutdown_timeout: Duration,
}

impl SessionOrchestrator {
    /// Validate configuration, open storage and build the backend.
    pub async fn from_config(config: &QuibbleConfig) -> Result<Self> {
        config.validate().context("Refusing to start")?;
        let store = open_store(&config.storage)
            .await
            .context("Failed to open storage")?;
        let backend = build_backend(&config.llm).context("Failed to build generative backend")?;
        Ok(Self::new(config, store, backend))
    }

    pub fn new(
        config: &QuibbleConfig,
        store: Arc<dyn KvStore>,
        backend: Arc<dyn GenerativeBackend>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(LifecycleState::Uninitialized);
        Self {
            analyzer: Box::new(KeywordAnalyzer::new()),
            selector: PersonalitySelector::new(),
            composer: ResponseComposer::new(backend, &config.llm, &config.profile),
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            profiles: Arc::new(ProfileStore::from_config(store.clone(), &config.profile)),
            store,
            session: Arc::new(RwLock::new(SessionState::default())),
            maintenance_config: config.maintenance.clone(),
            maintenance: RwLock::new(None),
            lifecycle,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            shutdown_timeout: Duration::from_secs(config.session.shutdown_timeout_secs),
        }
    }

    pub fn with_composer(mut self, composer: ResponseComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_selector(mut self, selector: PersonalitySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn state(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Restore persisted state, spawn maintenance and start accepting messages.
    pub async fn start(&self) -> Result<()> {
        let current = self.state();
        if current != LifecycleState::Uninitialized {
            anyhow::bail!("cannot start a session in state {:?}", current);
        }

        match load_session(self.store.as_ref()).await {
            Ok(Some(state)) => {
                tracing::info!(
                    "Restored session state (mood {:.2}, {} traits)",
                    state.mood.value(),
                    state.traits.len()
                );
                *self.session.write().await = state;
            }
            Ok(None) => tracing::info!("No saved session state, starting fresh"),
            Err(e) => tracing::warn!("Ignoring unusable saved session state: {}", e),
        }

        let handle = Maintenance::new(
            self.maintenance_config.clone(),
            self.store.clone(),
            self.profiles.clone(),
            self.limiter.clone(),
            self.session.clone(),
        )
        .spawn();
        *self.maintenance.write().await = Some(handle);

        self.lifecycle.send_replace(LifecycleState::Ready);
        tracing::info!("Session ready");
        Ok(())
    }

    /// Stop taking messages, stop maintenance, wait for in-flight work,
    /// persist state and close storage. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let mut proceed = false;
        self.lifecycle.send_if_modified(|state| match *state {
            LifecycleState::Disconnecting | LifecycleState::Closed => false,
            _ => {
                *state = LifecycleState::Disconnecting;
                proceed = true;
                true
            }
        });
        if !proceed {
            return Ok(());
        }
        tracing::info!("Session disconnecting");

        let handle = self.maintenance.write().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        if tokio::time::timeout(self.shutdown_timeout, self.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                "Shutdown timed out with {} messages still in flight",
                self.in_flight.load(Ordering::SeqCst)
            );
        }

        let snapshot = self.session.read().await.clone();
        if let Err(e) = save_session(self.store.as_ref(), &snapshot).await {
            tracing::error!("Failed to persist session state on shutdown: {}", e);
        }
        if let Err(e) = self.store.close().await {
            tracing::error!("Failed to close storage: {}", e);
        }

        self.lifecycle.send_replace(LifecycleState::Closed);
        tracing::info!("Session closed");
        Ok(())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Register a message as in flight, if the session is accepting them.
    fn enter(&self) -> Option<InFlight<'_>> {
        let mut admitted = false;
        self.lifecycle.send_if_modified(|state| {
            if !state.accepts_messages() {
                return false;
            }
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            admitted = true;
            let changed = *state != LifecycleState::Processing;
            *state = LifecycleState::Processing;
            changed
        });
        if admitted {
            Some(InFlight { owner: self })
        } else {
            None
        }
    }

    fn leave(&self) {
        self.lifecycle.send_if_modified(|state| {
            let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining > 0 {
                return false;
            }
            self.idle.notify_waiters();
            if *state == LifecycleState::Processing {
                *state = LifecycleState::Ready;
                true
            } else {
                false
            }
        });
    }

    // ========================================================================
    // Message pipeline
    // ========================================================================

    pub async fn handle(&self, inbound: InboundMessage) -> Reply {
        let _in_flight = match self.enter() {
            Some(guard) => guard,
            None => {
                let text = if self.state() == LifecycleState::Uninitialized {
                    NOT_READY_REPLY
                } else {
                    OFFLINE_REPLY
                };
                return Reply::notice(text, ReplyOutcome::Offline);
            }
        };

        let user_id = inbound.user_id.clone();
        let message = match Message::try_from(inbound) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Rejected message from '{}': {}", user_id, e);
                self.report(MaintenanceEvent::Rejected { user_id }).await;
                return Reply::notice(e.user_message(), ReplyOutcome::Invalid);
            }
        };

        if !self.limiter.admit(message.user_id()).await {
            let exceeded = self.limiter.exceeded(message.user_id());
            self.report(MaintenanceEvent::Throttled {
                user_id: message.user_id().to_string(),
            })
            .await;
            return Reply::notice(exceeded.user_message(), ReplyOutcome::Throttled);
        }

        self.respond(&message).await
    }

    async fn respond(&self, message: &Message) -> Reply {
        let analysis = self.analyzer.analyze(message.content());
        let profile = self.profiles.get(message.user_id()).await;

        let selection = {
            let mut state = self.session.write().await;
            let mut rng = rand::thread_rng();
            self.selector
                .select(&mut state, &analysis, &profile, &mut rng)
        };

        let composition = self
            .composer
            .compose(ComposeRequest {
                message,
                analysis: &analysis,
                personality: &selection.personality,
                template: &selection.template,
                profile: &profile,
                mood: selection.mood_after,
            })
            .await;

        let record = InteractionRecord::new(
            message.content(),
            &composition.text,
            analysis.sentiment,
            &selection.personality.name,
        );
        if let Err(e) = self
            .profiles
            .record_interaction(message.user_id(), record, &analysis.topics)
            .await
        {
            tracing::warn!("Failed to record interaction for {}: {}", message.user_id(), e);
            self.report(MaintenanceEvent::Error {
                user_id: Some(message.user_id().to_string()),
                kind: "storage".to_string(),
            })
            .await;
        }

        let fallback = composition.source == ReplySource::Fallback;
        self.report(MaintenanceEvent::Interaction {
            user_id: message.user_id().to_string(),
            topics: analysis.topics.clone(),
            trait_name: selection.personality.name.clone(),
            effectiveness: effectiveness(&analysis.topics, &profile.preferred_topics),
            fallback,
        })
        .await;

        tracing::debug!(
            "Replied to {} with '{}' (sentiment {:.2}, mood {:.2})",
            message.user_id(),
            selection.personality.name,
            analysis.sentiment,
            selection.mood_after.value()
        );

        Reply {
            text: composition.text,
            outcome: if fallback {
                ReplyOutcome::Fallback
            } else {
                ReplyOutcome::Generated
            },
            trait_name: Some(selection.personality.name),
        }
    }

    async fn report(&self, event: MaintenanceEvent) {
        if let Some(handle) = self.maintenance.read().await.as_ref() {
            handle.record(event);
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Force a maintenance pass. `None` before `start` or after `shutdown`.
    pub async fn flush_maintenance(&self) -> Option<MaintenanceReport> {
        let guard = self.maintenance.read().await;
        match guard.as_ref() {
            Some(handle) => handle.flush().await,
            None => None,
        }
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.read().await.clone()
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Decrements the in-flight count when a message finishes or is cancelled.
struct InFlight<'a> {
    owner: &'a SessionOrchestrator,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.owner.leave();
    }
}
