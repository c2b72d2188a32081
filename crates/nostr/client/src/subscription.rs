//! Subscription management for receiving filtered events.

use crate::error::{ClientError, Result};
use nostr::{Event, Filter};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Callback type for handling received events.
pub type EventCallback = Arc<dyn Fn(Event) -> Result<()> + Send + Sync>;
/// Callback fired when the relay signals end of stored events.
pub type EoseCallback = Arc<dyn Fn(&SubscriptionId) + Send + Sync>;
/// Callback fired when the relay closes a subscription, with the relay's reason.
pub type ClosedCallback = Arc<dyn Fn(&SubscriptionId, &str) + Send + Sync>;

/// Opaque subscription identifier, unique within one client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SubscriptionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Hands out `sg-<client prefix>-<counter>` ids.
pub(crate) struct SubscriptionIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SubscriptionIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            prefix: format!("{:08x}", rand::random::<u32>()),
            next: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_id(&self) -> SubscriptionId {
        let counter = self.next.fetch_add(1, Ordering::Relaxed);
        SubscriptionId(format!("sg-{}-{}", self.prefix, counter))
    }
}

/// Optional per-subscription handlers.
#[derive(Clone, Default)]
pub struct SubscriptionHandlers {
    pub(crate) on_event: Option<EventCallback>,
    pub(crate) on_eose: Option<EoseCallback>,
    pub(crate) on_closed: Option<ClosedCallback>,
}

impl SubscriptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(Event) -> Result<()> + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub fn on_eose<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SubscriptionId) + Send + Sync + 'static,
    {
        self.on_eose = Some(Arc::new(callback));
        self
    }

    pub fn on_closed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SubscriptionId, &str) + Send + Sync + 'static,
    {
        self.on_closed = Some(Arc::new(callback));
        self
    }
}

impl From<Option<EventCallback>> for SubscriptionHandlers {
    fn from(on_event: Option<EventCallback>) -> Self {
        Self {
            on_event,
            ..Self::default()
        }
    }
}

/// A subscription to filtered events from a relay.
#[derive(Clone)]
pub struct Subscription {
    /// Subscription ID.
    pub id: SubscriptionId,
    /// Filters for this subscription, OR-ed by the relay.
    pub filters: Vec<Filter>,
    handlers: SubscriptionHandlers,
    event_tx: Option<mpsc::Sender<Event>>,
    eose_received: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Create a new subscription with filters and no handlers.
    pub fn new(id: SubscriptionId, filters: Vec<Filter>) -> Self {
        Self::with_handlers(id, filters, SubscriptionHandlers::default())
    }

    /// Create a subscription with callback-based event handling.
    pub fn with_handlers(
        id: SubscriptionId,
        filters: Vec<Filter>,
        handlers: SubscriptionHandlers,
    ) -> Self {
        Self {
            id,
            filters,
            handlers,
            event_tx: None,
            eose_received: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a subscription that receives events on a bounded channel.
    pub fn with_channel(
        id: SubscriptionId,
        filters: Vec<Filter>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut subscription = Self::new(id, filters);
        subscription.event_tx = Some(tx);
        (subscription, rx)
    }

    /// Handle a received event. Inactive subscriptions swallow events silently.
    ///
    /// Activity is checked before the callback starts; a callback already running when the
    /// subscription is deactivated finishes normally.
    pub fn handle_event(&self, event: Event) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        if let Some(callback) = &self.handlers.on_event {
            callback(event.clone())?;
        }

        if let Some(tx) = &self.event_tx {
            tx.try_send(event).map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => {
                    ClientError::Subscription("event channel full - consumer too slow".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ClientError::Subscription("event channel closed".to_string())
                }
            })?;
        }

        Ok(())
    }

    /// Mark EOSE as received. The EOSE handler fires on the first marker only.
    pub fn mark_eose(&self) {
        let already = self.eose_received.swap(true, Ordering::Relaxed);
        if !already
            && self.is_active()
            && let Some(callback) = &self.handlers.on_eose
        {
            callback(&self.id);
        }
    }

    /// Forget a previous EOSE so the handler fires again for a re-sent `REQ`.
    pub(crate) fn reset_eose(&self) {
        self.eose_received.store(false, Ordering::Relaxed);
    }

    /// Check if EOSE has been received.
    pub fn has_eose(&self) -> bool {
        self.eose_received.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Relay-initiated close.
    pub(crate) fn handle_closed(&self, message: &str) {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        if was_active && let Some(callback) = &self.handlers.on_closed {
            callback(&self.id, message);
        }
    }

    /// `["REQ", <id>, <filter>...]`
    pub(crate) fn request_frame(&self) -> Result<Value> {
        let mut frame = Vec::with_capacity(self.filters.len() + 2);
        frame.push(Value::from("REQ"));
        frame.push(Value::from(self.id.as_str()));
        for filter in &self.filters {
            frame.push(serde_json::to_value(filter)?);
        }
        Ok(Value::Array(frame))
    }
}

/// Local map of open subscriptions keyed by id.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

impl SubscriptionRegistry {
    pub(crate) fn insert(&mut self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub(crate) fn get(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.get(id).cloned()
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Subscription> {
        self.subscriptions.remove(id)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.subscriptions.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.values().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Subscription> {
        self.subscriptions.drain().map(|(_, subscription)| subscription).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sample_event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let generator = SubscriptionIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();

        assert_ne!(first, second);
        assert!(first.as_str().starts_with("sg-"));
        assert!(second.as_str().ends_with("-1"));
    }

    #[test]
    fn request_frame_flattens_filters() -> Result<()> {
        let subscription = Subscription::new(
            SubscriptionId::new("sub-1"),
            vec![Filter::new().kinds([1]), Filter::new().kinds([7])],
        );
        let frame = subscription.request_frame()?;
        assert_eq!(
            frame,
            serde_json::json!(["REQ", "sub-1", {"kinds": [1]}, {"kinds": [7]}])
        );
        Ok(())
    }

    #[test]
    fn callback_receives_events_until_deactivated() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handlers = SubscriptionHandlers::new().on_event(move |event| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(event.id);
            }
            Ok(())
        });
        let subscription =
            Subscription::with_handlers(SubscriptionId::new("sub"), vec![], handlers);

        subscription.handle_event(sample_event("first"))?;
        subscription.deactivate();
        subscription.handle_event(sample_event("second"))?;

        let seen = seen
            .lock()
            .map_err(|_| ClientError::Internal("poisoned".to_string()))?;
        assert_eq!(*seen, vec!["first".to_string()]);
        Ok(())
    }

    #[test]
    fn full_channel_reports_error() -> Result<()> {
        let (subscription, mut rx) =
            Subscription::with_channel(SubscriptionId::new("sub"), vec![], 1);

        subscription.handle_event(sample_event("first"))?;
        let overflow = subscription.handle_event(sample_event("second"));
        assert!(matches!(overflow, Err(ClientError::Subscription(_))));

        let received = rx.try_recv().map_err(|error| ClientError::Internal(error.to_string()))?;
        assert_eq!(received.id, "first");
        Ok(())
    }

    #[test]
    fn eose_handler_fires_once() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let handlers = SubscriptionHandlers::new().on_eose(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let subscription =
            Subscription::with_handlers(SubscriptionId::new("sub"), vec![], handlers);

        assert!(!subscription.has_eose());
        subscription.mark_eose();
        subscription.mark_eose();

        assert!(subscription.has_eose());
        assert!(subscription.is_active());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn eose_handler_fires_again_after_reset() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let handlers = SubscriptionHandlers::new().on_eose(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let subscription =
            Subscription::with_handlers(SubscriptionId::new("sub"), vec![], handlers);

        subscription.mark_eose();
        subscription.reset_eose();
        assert!(!subscription.has_eose());
        subscription.mark_eose();

        assert!(subscription.has_eose());
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn callback_in_flight_finishes_but_no_new_one_starts() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let active = Arc::new(Mutex::new(None::<Subscription>));
        let handle = Arc::clone(&active);
        let handlers = SubscriptionHandlers::new().on_event(move |event| {
            if let Ok(handle) = handle.lock()
                && let Some(subscription) = handle.as_ref()
            {
                subscription.deactivate();
            }
            if let Ok(mut seen) = sink.lock() {
                seen.push(event.id);
            }
            Ok(())
        });
        let subscription =
            Subscription::with_handlers(SubscriptionId::new("sub"), vec![], handlers);
        if let Ok(mut handle) = active.lock() {
            *handle = Some(subscription.clone());
        }

        subscription.handle_event(sample_event("first"))?;
        subscription.handle_event(sample_event("second"))?;

        if let Ok(mut handle) = active.lock() {
            handle.take();
        }
        let seen = seen
            .lock()
            .map_err(|_| ClientError::Internal("poisoned".to_string()))?;
        assert_eq!(*seen, vec!["first".to_string()]);
        Ok(())
    }

    #[test]
    fn relay_close_deactivates_and_reports_reason() {
        let reason = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&reason);
        let handlers = SubscriptionHandlers::new().on_closed(move |_, message| {
            if let Ok(mut reason) = sink.lock() {
                *reason = message.to_string();
            }
        });
        let subscription =
            Subscription::with_handlers(SubscriptionId::new("sub"), vec![], handlers);

        subscription.handle_closed("error: too many subscriptions");
        subscription.handle_closed("again");

        assert!(!subscription.is_active());
        let reason = reason.lock().map(|reason| reason.clone()).unwrap_or_default();
        assert_eq!(reason, "error: too many subscriptions");
    }

    #[test]
    fn registry_lookup_and_removal() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(Subscription::new(SubscriptionId::new("a"), vec![]));
        registry.insert(Subscription::new(SubscriptionId::new("b"), vec![]));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(registry.get("b").is_some());
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.drain().len(), 1);
        assert_eq!(registry.len(), 0);
    }
}
