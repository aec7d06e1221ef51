//! Per-request context.
//!
//! A [`RequestContext`] is created by the server core once per request and
//! travels down the middleware chain into the handler. It has a single
//! writer at any time (the stage currently holding it); the chain passes it
//! by value, so mutation after the response has started is impossible by
//! construction.

use crate::HttpRequest;
use hashbrown::HashMap;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use uuid::Uuid;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(0);

/// An opaque, typed token into a context's [`Extensions`] map.
///
/// Each key is distinct, even for the same value type; middleware declares
/// its keys as statics and shares them with the stages that read the value.
///
/// # Example
///
/// ```rust
/// use xypriss_http::ExtensionKey;
/// use std::sync::LazyLock;
///
/// static AUTH_USER: LazyLock<ExtensionKey<String>> = LazyLock::new(ExtensionKey::new);
/// ```
pub struct ExtensionKey<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ExtensionKey<T> {
    /// Allocates a fresh key, distinct from every other key in the process.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ExtensionKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ExtensionKey<T> {}

/// Values attached to a request by middleware for later stages.
#[derive(Default)]
pub struct Extensions {
    values: HashMap<u64, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Stores a value under `key`, returning the previous value if any.
    pub fn insert<T: Send + Sync + 'static>(
        &mut self,
        key: ExtensionKey<T>,
        value: T,
    ) -> Option<T> {
        self.values
            .insert(key.id, Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Reads the value stored under `key`.
    pub fn get<T: Send + Sync + 'static>(&self, key: ExtensionKey<T>) -> Option<&T> {
        self.values.get(&key.id).and_then(|v| v.downcast_ref())
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove<T: Send + Sync + 'static>(&mut self, key: ExtensionKey<T>) -> Option<T> {
        self.values
            .remove(&key.id)
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The per-request state handed to middleware and handlers.
///
/// Pre-declared slots cover what every stage needs (request, route params,
/// correlation id, deadline); anything else goes through [`Extensions`].
pub struct RequestContext {
    request: HttpRequest,
    params: HashMap<String, String>,
    correlation_id: String,
    started_at: Instant,
    deadline: Option<Instant>,
    extensions: Extensions,
}

impl RequestContext {
    /// Creates a context for a freshly parsed request.
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            params: HashMap::new(),
            correlation_id: Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            deadline: None,
            extensions: Extensions::default(),
        }
    }

    /// Sets the absolute deadline derived from the request timeout.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn method(&self) -> &http::Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// Path parameters captured by the matched route.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// A single captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Installs the parameters captured by the router. Called once, by the
    /// dispatcher, after route resolution.
    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// The correlation id echoed in error bodies and logs.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The absolute deadline for this request, if one was configured.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining until the deadline. `None` when no deadline is set;
    /// zero when already past it.
    pub fn time_remaining(&self) -> Option<std::time::Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
