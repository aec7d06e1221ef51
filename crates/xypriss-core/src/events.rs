//! Event system for server components.
//!
//! Provides a unified event system that all XyPriss components use for
//! observability. Listeners register with a priority and receive a
//! [`SubscriptionToken`] for later removal, replacing ad-hoc observer
//! callbacks with a bounded, typed surface.

#[cfg(feature = "tracing")]
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait for events emitted by server components.
pub trait ServerEvent: Send + Sync + fmt::Debug {
    /// Returns the type of event (e.g., "cache_hit", "worker_restarted").
    fn event_type(&self) -> &'static str;

    /// Returns when this event occurred.
    fn timestamp(&self) -> Instant;

    /// Returns the name of the component instance that emitted this event.
    fn component(&self) -> &str;
}

/// Trait for listening to server events.
pub trait EventListener<E: ServerEvent>: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &E);
}

/// Type alias for boxed event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// Delivery priority of a listener. Higher priorities are notified first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerPriority {
    Low,
    Normal,
    High,
}

/// Opaque handle identifying a registered listener.
///
/// Returned by [`EventListeners::subscribe`] and consumed by
/// [`EventListeners::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Registration<E: ServerEvent> {
    token: SubscriptionToken,
    priority: ListenerPriority,
    listener: BoxedEventListener<E>,
}

/// A collection of event listeners.
pub struct EventListeners<E: ServerEvent> {
    registrations: Vec<Registration<E>>,
    next_token: u64,
}

impl<E: ServerEvent> Clone for EventListeners<E> {
    fn clone(&self) -> Self {
        Self {
            registrations: self
                .registrations
                .iter()
                .map(|r| Registration {
                    token: r.token,
                    priority: r.priority,
                    listener: Arc::clone(&r.listener),
                })
                .collect(),
            next_token: self.next_token,
        }
    }
}

impl<E: ServerEvent> EventListeners<E> {
    /// Creates a new empty event listener collection.
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            next_token: 0,
        }
    }

    /// Adds a listener at [`ListenerPriority::Normal`].
    pub fn add<L>(&mut self, listener: L) -> SubscriptionToken
    where
        L: EventListener<E> + 'static,
    {
        self.subscribe(listener, ListenerPriority::Normal)
    }

    /// Adds a listener with an explicit priority and returns its token.
    ///
    /// Listeners are notified in priority order (high first); within a
    /// priority, subscription order is preserved.
    pub fn subscribe<L>(&mut self, listener: L, priority: ListenerPriority) -> SubscriptionToken
    where
        L: EventListener<E> + 'static,
    {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        let registration = Registration {
            token,
            priority,
            listener: Arc::new(listener),
        };
        // Insert after the last registration of >= priority to keep
        // subscription order stable within a priority.
        let at = self
            .registrations
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(self.registrations.len());
        self.registrations.insert(at, registration);
        token
    }

    /// Removes the listener identified by `token`.
    ///
    /// Returns true if a listener was removed.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.token != token);
        self.registrations.len() != before
    }

    /// Emits an event to all registered listeners.
    ///
    /// If a listener panics, the panic is caught and the remaining listeners
    /// will still be called. With the `tracing` feature enabled, panicking
    /// listeners are logged as warnings; with the `metrics` feature a counter
    /// is incremented.
    pub fn emit(&self, event: &E) {
        for (index, registration) in self.registrations.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                registration.listener.on_event(event);
            }));

            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                log_listener_panic(index, event, _panic_payload.as_ref());

                #[cfg(feature = "metrics")]
                record_listener_panic_metric(event);

                #[cfg(not(feature = "tracing"))]
                let _ = index;

                #[cfg(not(any(feature = "tracing", feature = "metrics")))]
                let _ = _panic_payload;
            }
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }
}

impl<E: ServerEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple function-based event listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: ServerEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(feature = "tracing")]
fn log_listener_panic<E: ServerEvent>(
    index: usize,
    event: &E,
    panic_payload: &(dyn Any + Send),
) {
    let panic_message = panic_payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::warn!(
        listener_index = index,
        component = event.component(),
        event_type = event.event_type(),
        panic_message = %panic_message,
        "server event listener panicked"
    );
}

#[cfg(feature = "metrics")]
fn record_listener_panic_metric<E: ServerEvent>(event: &E) {
    let component_label = event.component().to_string();
    let event_type_label = event.event_type().to_string();

    metrics::counter!(
        "xypriss_event_listener_panics_total",
        "component" => component_label,
        "event_type" => event_type_label
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        name: String,
        timestamp: Instant,
    }

    impl TestEvent {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                timestamp: Instant::now(),
            }
        }
    }

    impl ServerEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }

        fn timestamp(&self) -> Instant {
            self.timestamp
        }

        fn component(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn test_event_listeners() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(move |_event: &TestEvent| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let event = TestEvent::new("test");
        listeners.emit(&event);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        listeners.emit(&event);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_priority_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut listeners = EventListeners::new();

        let log = Arc::clone(&order);
        listeners.subscribe(
            FnListener::new(move |_event: &TestEvent| log.lock().unwrap().push("normal")),
            ListenerPriority::Normal,
        );
        let log = Arc::clone(&order);
        listeners.subscribe(
            FnListener::new(move |_event: &TestEvent| log.lock().unwrap().push("high")),
            ListenerPriority::High,
        );
        let log = Arc::clone(&order);
        listeners.subscribe(
            FnListener::new(move |_event: &TestEvent| log.lock().unwrap().push("low")),
            ListenerPriority::Low,
        );

        listeners.emit(&TestEvent::new("test"));
        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn test_unsubscribe_by_token() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        let token = listeners.add(FnListener::new(move |_event: &TestEvent| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&TestEvent::new("test"));
        assert!(listeners.unsubscribe(token));
        assert!(!listeners.unsubscribe(token));
        listeners.emit(&TestEvent::new("test"));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_event: &TestEvent| {
            panic!("bad listener");
        }));
        listeners.add(FnListener::new(move |_event: &TestEvent| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&TestEvent::new("test"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
