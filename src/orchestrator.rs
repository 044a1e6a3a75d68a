//! Owns the current app model and serializes reconciliation.
//!
//! Raw events are queued on an unbounded channel and drained strictly in
//! arrival order. A reconciliation always runs to completion before the next
//! event is taken, so subscribers never see a half-updated model and results
//! are delivered in the order their events arrived.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use crate::core::{AppModel, RawEvent, ReconciliationResult};
use crate::error::WatchError;
use crate::handlers::{reconcile, HandlerInput};
use crate::loader::SnapshotLoader;

/// Receives every non-empty reconciliation result.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_result(&self, result: &ReconciliationResult) -> anyhow::Result<()>;
}

/// Forwards results into a channel.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<Arc<ReconciliationResult>>,
}

impl ChannelSubscriber {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Arc<ReconciliationResult>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn on_result(&self, result: &ReconciliationResult) -> anyhow::Result<()> {
        self.tx
            .send(Arc::new(result.clone()))
            .map_err(|_| anyhow::anyhow!("result receiver dropped"))
    }
}

/// Handle given to event sources to push raw events into the queue.
#[derive(Clone)]
pub struct RawEventSender {
    tx: mpsc::UnboundedSender<RawEvent>,
}

impl RawEventSender {
    /// Queue an event. Returns false once the orchestrator has stopped.
    pub fn send(&self, event: RawEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Fires the shutdown signal.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Resolves once shutdown has been triggered.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Every trigger was dropped without firing
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

pub struct Orchestrator<L> {
    app: Arc<AppModel>,
    loader: L,
    subscribers: Vec<Arc<dyn Subscriber>>,
    event_tx: mpsc::UnboundedSender<RawEvent>,
    event_rx: mpsc::UnboundedReceiver<RawEvent>,
}

impl<L: SnapshotLoader> Orchestrator<L> {
    pub fn new(app: AppModel, loader: L) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            app: Arc::new(app),
            loader,
            subscribers: Vec::new(),
            event_tx,
            event_rx,
        }
    }

    pub fn app(&self) -> &Arc<AppModel> {
        &self.app
    }

    pub fn sender(&self) -> RawEventSender {
        RawEventSender {
            tx: self.event_tx.clone(),
        }
    }

    pub fn subscribe<S: Subscriber + 'static>(&mut self, subscriber: S) -> &mut Self {
        self.subscribers.push(Arc::new(subscriber));
        self
    }

    /// Reconcile a single event against the current model and deliver the result.
    pub async fn process(&mut self, event: RawEvent) -> Result<Arc<ReconciliationResult>, WatchError> {
        let extensions = event
            .extension_path
            .as_deref()
            .map(|dir| self.app.extensions_in(dir))
            .unwrap_or_default();

        let input = HandlerInput {
            event: &event,
            app: &self.app,
            extensions: &extensions,
        };
        let result = Arc::new(reconcile(input, &self.loader).await?);
        self.app = Arc::clone(&result.app);

        if result.is_empty() {
            tracing::debug!(
                "Change detected in {}, but no extensions were affected",
                event.path.display()
            );
            return Ok(result);
        }

        tracing::debug!(
            "{} extension events for {} [{:.2}ms]",
            result.events.len(),
            event.path.display(),
            result.elapsed().as_secs_f64() * 1000.0
        );
        self.deliver(&result).await;
        Ok(result)
    }

    /// Subscribers run one after another, each in its own task so a panic stays contained.
    async fn deliver(&self, result: &Arc<ReconciliationResult>) {
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            let subscriber = Arc::clone(subscriber);
            let result = Arc::clone(result);
            let outcome = tokio::spawn(async move { subscriber.on_result(&result).await }).await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("Subscriber {} failed: {:#}", index, err),
                Err(err) => tracing::error!("Subscriber {} panicked: {}", index, err),
            }
        }
    }

    /// Drain queued events until shutdown, until every sender is gone, or until
    /// the app manifest is deleted. Returns the final model.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<Arc<AppModel>, WatchError> {
        // Only external senders keep the queue open
        let (closed_tx, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.event_tx, closed_tx));

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    tracing::info!("Stopping app event watcher");
                    break Ok(());
                }
                event = self.event_rx.recv() => match event {
                    Some(event) => event,
                    None => break Ok(()),
                },
            };

            if let Err(err) = self.process(event).await {
                tracing::error!("{}", err);
                break Err(err);
            }
        };

        self.event_rx.close();
        outcome.map(|()| self.app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use serde_json::json;
    use crate::core::{ChangeKind, ExtensionInstance, LoaderInputs, RawEventKind};
    use crate::error::LoadError;

    struct NoReload;

    #[async_trait]
    impl SnapshotLoader for NoReload {
        async fn load(&self, _: &Path, _: &LoaderInputs) -> Result<AppModel, LoadError> {
            Err(LoadError::Task("reload not expected".to_string()))
        }
    }

    struct Failing;

    #[async_trait]
    impl Subscriber for Failing {
        async fn on_result(&self, _: &ReconciliationResult) -> anyhow::Result<()> {
            anyhow::bail!("downstream build failed")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Subscriber for Panicking {
        async fn on_result(&self, _: &ReconciliationResult) -> anyhow::Result<()> {
            panic!("subscriber bug")
        }
    }

    fn model() -> AppModel {
        let ext = ExtensionInstance::new(
            "a",
            "/app/extensions/a",
            "/app/extensions/a/shopify.extension.toml",
            json!({"type": "ui_extension"}),
        );
        AppModel::new("/app", "/app/shopify.app.toml", vec![ext], LoaderInputs::default()).unwrap()
    }

    fn file_updated() -> RawEvent {
        RawEvent::new(RawEventKind::FileUpdated, "/app/extensions/a/README.md")
            .with_extension_path("/app/extensions/a")
    }

    #[tokio::test]
    async fn test_failing_subscribers_do_not_block_others() {
        let mut orchestrator = Orchestrator::new(model(), NoReload);
        let (channel, mut results) = ChannelSubscriber::channel();
        orchestrator.subscribe(Failing).subscribe(Panicking).subscribe(channel);

        orchestrator.process(file_updated()).await.unwrap();
        orchestrator.process(file_updated()).await.unwrap();

        for _ in 0..2 {
            let result = results.recv().await.expect("result delivered");
            assert_eq!(result.events[0].kind, ChangeKind::Updated);
        }
    }

    #[tokio::test]
    async fn test_empty_results_are_not_delivered() {
        let mut orchestrator = Orchestrator::new(model(), NoReload);
        let (channel, mut results) = ChannelSubscriber::channel();
        orchestrator.subscribe(channel);

        let event = RawEvent::new(RawEventKind::FileUpdated, "/app/extensions/z/x.js")
            .with_extension_path("/app/extensions/z");
        let result = orchestrator.process(event).await.unwrap();

        assert!(result.is_empty());
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_folder_deletion_replaces_model() {
        let mut orchestrator = Orchestrator::new(model(), NoReload);

        let event = RawEvent::new(RawEventKind::ExtensionFolderDeleted, "/app/extensions/a")
            .with_extension_path("/app/extensions/a");
        orchestrator.process(event).await.unwrap();

        assert!(orchestrator.app().extensions().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_senders_are_dropped() {
        let orchestrator = Orchestrator::new(model(), NoReload);
        let sender = orchestrator.sender();
        let (_trigger, signal) = shutdown_channel();

        assert!(sender.send(file_updated()));
        drop(sender);

        let app = orchestrator.run(signal).await.unwrap();
        assert_eq!(app.extensions().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_closes_queue() {
        let orchestrator = Orchestrator::new(model(), NoReload);
        let sender = orchestrator.sender();
        let (trigger, signal) = shutdown_channel();

        let handle = tokio::spawn(orchestrator.run(signal));
        trigger.trigger();

        handle.await.unwrap().unwrap();
        assert!(sender.is_closed());
        assert!(!sender.send(file_updated()));
    }

    #[tokio::test]
    async fn test_shutdown_signal_reports_trigger() {
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());

        trigger.trigger();
        signal.wait().await;

        assert!(signal.is_triggered());
    }
}
