use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::domain::notification::{Notification, NotificationKey};
use crate::domain::source::Source;
use crate::repository::DocumentStore;
use crate::services::enrichment::Enricher;
use crate::services::error_handling::{LogHelper, PulseError};
use crate::services::pipeline::{AggregateState, NotificationView};

/// Source of "now" for day bucketing, in the viewer's local offset.
pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

pub fn local_clock() -> Clock {
    Arc::new(|| Local::now().fixed_offset())
}

enum EngineMessage {
    Batch {
        source: Source,
        generation: u64,
        notifications: Vec<Notification>,
    },
    SubscriptionFailed {
        source: Source,
        generation: u64,
        error: anyhow::Error,
    },
    Dismiss(NotificationKey),
    Reset {
        generation: u64,
    },
    Refresh,
}

/// Live notification list for one viewer.
///
/// One forwarding task per source turns store snapshots into enriched
/// batches; a single event loop owns the aggregate and applies batches,
/// dismissals and resets strictly in arrival order. Every subscription is
/// tagged with a generation, and batches from an older generation are
/// dropped, so a torn-down subscription can never write into a newer view.
pub struct NotificationEngine {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
    enricher: Arc<Enricher>,
    viewer_id: RwLock<String>,
    generation: Arc<AtomicU64>,
    commands: mpsc::Sender<EngineMessage>,
    view: watch::Receiver<NotificationView>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    switching: tokio::sync::Mutex<()>,
}

impl NotificationEngine {
    /// Must be called from within a tokio runtime.
    pub fn start(store: Arc<dyn DocumentStore>, viewer_id: impl Into<String>, config: EngineConfig) -> Result<Self> {
        Self::start_with_clock(store, viewer_id, config, local_clock())
    }

    pub fn start_with_clock(
        store: Arc<dyn DocumentStore>,
        viewer_id: impl Into<String>,
        config: EngineConfig,
        clock: Clock,
    ) -> Result<Self> {
        let viewer_id = viewer_id.into();
        validate_viewer(&viewer_id)?;
        config.validate()?;

        let (commands, inbox) = mpsc::channel(config.channel_capacity);
        let (view_tx, view) = watch::channel(NotificationView::Loading);
        let event_loop = tokio::spawn(run_event_loop(inbox, view_tx, clock));

        let engine = Self {
            enricher: Arc::new(Enricher::with_placeholder(
                store.clone(),
                config.placeholder_name.clone(),
            )),
            store,
            config,
            viewer_id: RwLock::new(viewer_id.clone()),
            generation: Arc::new(AtomicU64::new(0)),
            commands,
            view,
            forwarders: Mutex::new(Vec::new()),
            event_loop: Mutex::new(Some(event_loop)),
            switching: tokio::sync::Mutex::new(()),
        };
        engine.spawn_forwarders(&viewer_id, 0);

        info!(viewer = %engine.viewer_id(), "Notification engine started");
        Ok(engine)
    }

    pub fn viewer_id(&self) -> String {
        self.viewer_id.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    pub fn subscribe_view(&self) -> watch::Receiver<NotificationView> {
        self.view.clone()
    }

    pub fn current_view(&self) -> NotificationView {
        self.view.borrow().clone()
    }

    /// Resolves once every source has delivered (or failed) for the current viewer.
    pub async fn wait_until_loaded(&self) -> Result<NotificationView> {
        let mut view = self.subscribe_view();
        let loaded = view
            .wait_for(|view| !view.is_loading())
            .await
            .map_err(|_| PulseError::EngineStopped)?;
        Ok(loaded.clone())
    }

    /// Hides one notification for the rest of this session.
    pub async fn dismiss(&self, key: NotificationKey) -> Result<()> {
        self.send(EngineMessage::Dismiss(key)).await
    }

    /// Re-buckets against the current clock, e.g. after midnight.
    pub async fn refresh(&self) -> Result<()> {
        self.send(EngineMessage::Refresh).await
    }

    /// Tears down every subscription and resubscribes for `viewer_id`.
    /// Dismissals and cached profiles belong to the old viewer and are dropped.
    #[instrument(skip(self))]
    pub async fn switch_viewer(&self, viewer_id: &str) -> Result<()> {
        validate_viewer(viewer_id)?;

        // Concurrent switches must not interleave their resets and resubscriptions
        let _switching = self.switching.lock().await;

        self.abort_forwarders();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.viewer_id.write() = viewer_id.to_string();
        self.enricher.clear_caches();

        // Reset is queued ahead of anything the new forwarders send
        self.send(EngineMessage::Reset { generation }).await?;
        self.spawn_forwarders(viewer_id, generation);

        info!(viewer = %viewer_id, generation, "Switched notification viewer");
        Ok(())
    }

    /// Unsubscribes from every source and stops the event loop.
    pub fn shutdown(&self) {
        self.abort_forwarders();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(event_loop) = self.event_loop.lock().take() {
            event_loop.abort();
            debug!(viewer = %self.viewer_id(), "Notification engine stopped");
        }
    }

    async fn send(&self, message: EngineMessage) -> Result<()> {
        self.commands
            .send(message)
            .await
            .map_err(|_| PulseError::EngineStopped.into())
    }

    fn abort_forwarders(&self) {
        for forwarder in self.forwarders.lock().drain(..) {
            forwarder.abort();
        }
    }

    fn spawn_forwarders(&self, viewer_id: &str, generation: u64) {
        let mut forwarders = self.forwarders.lock();

        for source in Source::ALL {
            let forwarder = SourceForwarder {
                source,
                generation,
                live_generation: self.generation.clone(),
                viewer_id: viewer_id.to_string(),
                batch_limit: self.config.batch_limit,
                store: self.store.clone(),
                enricher: self.enricher.clone(),
                commands: self.commands.clone(),
            };
            forwarders.push(tokio::spawn(forwarder.run()));
        }
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_viewer(viewer_id: &str) -> Result<()> {
    if viewer_id.trim().is_empty() {
        return Err(PulseError::ConfigurationError {
            message: "a viewer id is required".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Bridges one live query into the event loop.
struct SourceForwarder {
    source: Source,
    generation: u64,
    live_generation: Arc<AtomicU64>,
    viewer_id: String,
    batch_limit: usize,
    store: Arc<dyn DocumentStore>,
    enricher: Arc<Enricher>,
    commands: mpsc::Sender<EngineMessage>,
}

impl SourceForwarder {
    fn is_current(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) == self.generation
    }

    async fn run(self) {
        let query = self.source.query_for(&self.viewer_id, self.batch_limit);

        let mut subscription = match self.store.subscribe(query).await {
            Ok(subscription) => subscription,
            Err(error) => {
                let _ = self
                    .commands
                    .send(EngineMessage::SubscriptionFailed {
                        source: self.source,
                        generation: self.generation,
                        error,
                    })
                    .await;
                return;
            }
        };

        while let Some(snapshot) = subscription.next_snapshot().await {
            // The whole batch is enriched before anything reaches the view
            let notifications = self.enricher.enrich_batch(&self.viewer_id, &snapshot).await;

            if !self.is_current() {
                break;
            }

            debug!(
                source = %self.source,
                received = snapshot.len(),
                kept = notifications.len(),
                "Enriched batch"
            );

            let message = EngineMessage::Batch {
                source: self.source,
                generation: self.generation,
                notifications,
            };
            if self.commands.send(message).await.is_err() {
                break;
            }
        }

        subscription.unsubscribe();
        debug!(source = %self.source, generation = self.generation, "Live query closed");
    }
}

async fn run_event_loop(
    mut inbox: mpsc::Receiver<EngineMessage>,
    view: watch::Sender<NotificationView>,
    clock: Clock,
) {
    let mut state = AggregateState::new();
    let mut current_generation = 0;

    while let Some(message) = inbox.recv().await {
        match message {
            EngineMessage::Batch {
                source,
                generation,
                notifications,
            } => {
                if generation != current_generation {
                    LogHelper::log_stale_batch(source, generation, current_generation);
                    continue;
                }
                state.apply_batch(source, notifications);
            }
            EngineMessage::SubscriptionFailed {
                source,
                generation,
                error,
            } => {
                if generation != current_generation {
                    LogHelper::log_stale_batch(source, generation, current_generation);
                    continue;
                }
                LogHelper::log_subscription_failure(source, error);
                state.mark_failed(source);
            }
            EngineMessage::Dismiss(key) => {
                if !state.dismiss(key) {
                    continue;
                }
            }
            EngineMessage::Reset { generation } => {
                if generation < current_generation {
                    debug!(generation, current_generation, "Ignoring reset for an older viewer");
                    continue;
                }
                current_generation = generation;
                state.reset();
            }
            EngineMessage::Refresh => {}
        }

        view.send_replace(state.snapshot(&clock()));
    }
}
