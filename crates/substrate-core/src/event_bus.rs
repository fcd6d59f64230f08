use std::sync::Arc;

use substrate_types::SubstrateEvent;
use tokio::sync::RwLock;
use tracing::warn;

/// An explicit subscriber object rather than a bare closure, so the
/// dependency graph the bus wires together stays visible (see DESIGN NOTES
/// on callback-heavy wiring).
#[async_trait::async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Unique name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Called once, in registration order, before the bus accepts events.
    async fn initialize(&self) {}

    /// Handle one event. A subscriber must not block; failures are caught
    /// and logged by the bus, never propagated to the publisher or to other
    /// subscribers.
    async fn handle(&self, event: &SubstrateEvent) -> anyhow::Result<()>;

    /// Called once, in registration order, during process shutdown.
    async fn shutdown(&self) {}
}

/// Single-threaded cooperative dispatch: `publish` invokes every subscriber
/// synchronously, in registration order, on the caller's task. A subscriber
/// that returns `Err` is logged and skipped; it never drops the event for
/// subscribers registered after it.
///
/// This is a purpose-built type rather than a `tokio::sync::broadcast` wrapper:
/// broadcast gives every consumer its own queue with independent lag/backpressure,
/// which does not match the synchronous, registration-ordered, catch-and-continue
/// contract this bus is specified to uphold.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        subscriber.initialize().await;
        self.subscribers.write().await.push(subscriber);
    }

    pub async fn publish(&self, event: SubstrateEvent) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.iter() {
            if let Err(err) = subscriber.handle(&event).await {
                warn!(
                    subscriber = subscriber.name(),
                    event = event.kind(),
                    error = %err,
                    "event subscriber failed; continuing to remaining subscribers"
                );
            }
        }
    }

    pub async fn shutdown(&self) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.iter() {
            subscriber.shutdown().await;
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        name: String,
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl EventSubscriber for CountingSubscriber {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, _event: &SubstrateEvent) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_to_all_subscribers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::<&'static str>::new()));

        struct OrderRecorder {
            label: &'static str,
            order: Arc<RwLock<Vec<&'static str>>>,
        }
        #[async_trait::async_trait]
        impl EventSubscriber for OrderRecorder {
            fn name(&self) -> &str {
                self.label
            }
            async fn handle(&self, _event: &SubstrateEvent) -> anyhow::Result<()> {
                self.order.write().await.push(self.label);
                Ok(())
            }
        }

        bus.subscribe(Arc::new(OrderRecorder {
            label: "first",
            order: order.clone(),
        }))
        .await;
        bus.subscribe(Arc::new(OrderRecorder {
            label: "second",
            order: order.clone(),
        }))
        .await;

        bus.publish(SubstrateEvent::TaskReady {
            run_id: "r".into(),
            task_id: "t".into(),
        })
        .await;

        assert_eq!(*order.read().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn a_failing_subscriber_does_not_block_the_others() {
        let bus = EventBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(CountingSubscriber {
            name: "a".into(),
            count: count_a.clone(),
            fail: true,
        }))
        .await;
        bus.subscribe(Arc::new(CountingSubscriber {
            name: "b".into(),
            count: count_b.clone(),
            fail: false,
        }))
        .await;

        bus.publish(SubstrateEvent::SessionBudgetExceeded {
            session_id: "s".into(),
        })
        .await;

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }
}
