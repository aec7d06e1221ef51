//! Pre-compiler configuration.

use crate::events::PreCompilerEvent;
use std::time::Duration;
use xypriss_core::events::{EventListeners, FnListener};

/// Configuration for a [`crate::PreCompiler`].
pub struct PreCompilerConfig {
    pub(crate) name: String,
    /// No optimization happens for this long after start.
    pub(crate) learning_period: Duration,
    /// How often compiled state is re-evaluated afterwards.
    pub(crate) evaluation_interval: Duration,
    /// Requests per minute a route must sustain to be promoted.
    pub(crate) optimization_threshold: f64,
    pub(crate) max_compiled_routes: usize,
    /// Enables promotion to `Ultra`.
    pub(crate) aggressive_optimization: bool,
    /// Warm compiled state for declared routes at start.
    pub(crate) predictive_preloading: bool,
    /// A compiled route below the low-water mark for this long is released.
    pub(crate) cooldown: Duration,
    pub(crate) event_listeners: EventListeners<PreCompilerEvent>,
}

impl Default for PreCompilerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PreCompilerConfig {
    pub fn builder() -> PreCompilerConfigBuilder {
        PreCompilerConfigBuilder::new()
    }

    /// Hysteresis low-water mark: half the promotion threshold.
    pub(crate) fn low_water(&self) -> f64 {
        self.optimization_threshold / 2.0
    }
}

/// Builder for [`PreCompilerConfig`].
pub struct PreCompilerConfigBuilder {
    name: String,
    learning_period: Duration,
    evaluation_interval: Duration,
    optimization_threshold: f64,
    max_compiled_routes: usize,
    aggressive_optimization: bool,
    predictive_preloading: bool,
    cooldown: Duration,
    event_listeners: EventListeners<PreCompilerEvent>,
}

impl PreCompilerConfigBuilder {
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            learning_period: Duration::from_secs(60),
            evaluation_interval: Duration::from_secs(10),
            optimization_threshold: 100.0,
            max_compiled_routes: 50,
            aggressive_optimization: false,
            predictive_preloading: false,
            cooldown: Duration::from_secs(30),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the instance name for observability.
    ///
    /// Default: `"<unnamed>"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Observation-only period after start.
    ///
    /// Default: 60 s
    pub fn learning_period(mut self, period: Duration) -> Self {
        self.learning_period = period;
        self
    }

    /// Interval between promotion/demotion sweeps.
    ///
    /// Default: 10 s
    pub fn evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }

    /// Requests per minute required for promotion.
    ///
    /// Default: 100
    pub fn optimization_threshold(mut self, requests_per_minute: f64) -> Self {
        self.optimization_threshold = requests_per_minute.max(1.0);
        self
    }

    /// Upper bound on simultaneously compiled routes.
    ///
    /// Default: 50
    pub fn max_compiled_routes(mut self, max: usize) -> Self {
        self.max_compiled_routes = max;
        self
    }

    /// Allows promotion to `Ultra` (template serving).
    ///
    /// Default: false
    pub fn aggressive_optimization(mut self, enabled: bool) -> Self {
        self.aggressive_optimization = enabled;
        self
    }

    /// Warms compiled state for registered routes at start instead of
    /// waiting for traffic.
    ///
    /// Default: false
    pub fn predictive_preloading(mut self, enabled: bool) -> Self {
        self.predictive_preloading = enabled;
        self
    }

    /// How long a route must sit below the low-water mark before its
    /// compiled state is released.
    ///
    /// Default: 30 s
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Registers a callback for promotions.
    pub fn on_promoted<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::RouteKey, crate::OptimizationLevel) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let PreCompilerEvent::Promoted { route, level, .. } = event {
                f(*route, *level);
            }
        }));
        self
    }

    /// Registers a raw event listener.
    pub fn event_listener<L>(mut self, listener: L) -> Self
    where
        L: xypriss_core::events::EventListener<PreCompilerEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(self) -> PreCompilerConfig {
        PreCompilerConfig {
            name: self.name,
            learning_period: self.learning_period,
            evaluation_interval: self.evaluation_interval,
            optimization_threshold: self.optimization_threshold,
            max_compiled_routes: self.max_compiled_routes,
            aggressive_optimization: self.aggressive_optimization,
            predictive_preloading: self.predictive_preloading,
            cooldown: self.cooldown,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for PreCompilerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PreCompilerConfig::default();
        assert_eq!(config.learning_period, Duration::from_secs(60));
        assert_eq!(config.optimization_threshold, 100.0);
        assert_eq!(config.max_compiled_routes, 50);
        assert!(!config.aggressive_optimization);
        assert_eq!(config.low_water(), 50.0);
    }

    #[test]
    fn test_threshold_floor() {
        let config = PreCompilerConfig::builder().optimization_threshold(0.0).build();
        assert_eq!(config.optimization_threshold, 1.0);
    }
}
