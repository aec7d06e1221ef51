//! Compilation state machine.

use crate::config::PreCompilerConfig;
use crate::events::PreCompilerEvent;
use crate::generator::ResponseGenerator;
use crate::stats::{RouteStatsSnapshot, RouteWindow};
use crate::RouteKey;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How many identical response shapes in a row make a shape "repeatable".
const STABLE_SHAPE_RUN: u32 = 16;

/// Compilation level of a hot route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptimizationLevel {
    /// Dispatch is pinned; route resolution may be skipped.
    Basic,
    /// Non-essential middleware may be skipped as well.
    Advanced,
    /// Responses are served from a precomputed template.
    Ultra,
}

impl OptimizationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationLevel::Basic => "basic",
            OptimizationLevel::Advanced => "advanced",
            OptimizationLevel::Ultra => "ultra",
        }
    }
}

/// A precomputed response template and its freshness-derived TTL.
#[derive(Debug, Clone)]
pub struct Template<T> {
    pub payload: T,
    pub ttl: Duration,
}

/// The fast-path decision for one request.
#[derive(Debug, Clone)]
pub struct FastPath<T> {
    pub level: OptimizationLevel,
    /// Present at `Ultra` when a template (stored or generated) exists.
    pub template: Option<Template<T>>,
}

enum RouteState {
    Observing,
    Compiled {
        level: OptimizationLevel,
        /// Consecutive evaluations at sustained high traffic.
        high_streak: u32,
        below_low_since: Option<Instant>,
    },
    Disabled,
}

struct RouteEntry<T> {
    method: String,
    pattern: String,
    window: RouteWindow,
    state: RouteState,
    template: Option<T>,
}

impl<T> RouteEntry<T> {
    fn new(method: &str, pattern: &str, now: Instant) -> Self {
        Self {
            method: method.to_string(),
            pattern: pattern.to_string(),
            window: RouteWindow::new(now),
            state: RouteState::Observing,
            template: None,
        }
    }
}

struct Inner<T> {
    routes: HashMap<RouteKey, RouteEntry<T>>,
    generators: Vec<Arc<dyn ResponseGenerator<T>>>,
    last_eval: Instant,
    compiled_count: usize,
}

/// Observes traffic and promotes hot routes to compiled dispatch.
///
/// Generic over the template payload stored for ultra routes. All methods
/// take `&self`; the pre-compiler is shared across request tasks.
pub struct PreCompiler<T: Clone + Send + Sync + 'static> {
    config: PreCompilerConfig,
    started_at: Instant,
    inner: Mutex<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> PreCompiler<T> {
    pub fn new(config: PreCompilerConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            started_at: now,
            inner: Mutex::new(Inner {
                routes: HashMap::new(),
                generators: Vec::new(),
                last_eval: now,
                compiled_count: 0,
            }),
        }
    }

    /// Declares a route so generators can match it and preloading can warm
    /// it. With predictive preloading enabled the route starts at `Basic`
    /// (subject to the compiled-routes cap).
    pub fn register_route(&self, key: RouteKey, method: &str, pattern: &str) {
        let preloaded = {
            let mut inner = self.inner.lock();
            let preload = self.config.predictive_preloading
                && inner.compiled_count < self.config.max_compiled_routes;
            let entry = inner
                .routes
                .entry(key)
                .or_insert_with(|| RouteEntry::new(method, pattern, Instant::now()));
            let warm = preload && matches!(entry.state, RouteState::Observing);
            if warm {
                entry.state = RouteState::Compiled {
                    level: OptimizationLevel::Basic,
                    high_streak: 0,
                    below_low_since: None,
                };
            }
            if warm {
                inner.compiled_count += 1;
            }
            warm
        };
        if preloaded {
            self.emit_promoted(key, OptimizationLevel::Basic);
        }
    }

    /// Registers a host response generator.
    pub fn register_generator<G>(&self, generator: G)
    where
        G: ResponseGenerator<T> + 'static,
    {
        let mut inner = self.inner.lock();
        inner.generators.push(Arc::new(generator));
        inner
            .generators
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Records one handled request. Runs an evaluation sweep when the
    /// evaluation interval has elapsed.
    pub fn observe(&self, key: RouteKey, latency: Duration, is_error: bool) {
        let now = Instant::now();
        let due = {
            let mut inner = self.inner.lock();
            let entry = inner
                .routes
                .entry(key)
                .or_insert_with(|| RouteEntry::new("", "", now));
            entry.window.record(now, latency, is_error);
            now.duration_since(inner.last_eval) >= self.config.evaluation_interval
        };
        if due {
            self.evaluate();
        }
    }

    /// Records the response shape of a successful request; once the shape
    /// has repeated long enough, `payload` (when given) is kept as the
    /// ultra template. Hosts that do not want to retain bodies pass `None`
    /// and rely on a registered generator instead.
    pub fn observe_shape(&self, key: RouteKey, fingerprint: u64, payload: Option<&T>) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.routes.get_mut(&key) {
            entry.window.record_shape(Instant::now(), fingerprint);
            if entry.window.shape_run() >= STABLE_SHAPE_RUN {
                if entry.template.is_none() {
                    if let Some(payload) = payload {
                        entry.template = Some(payload.clone());
                    }
                }
            } else {
                entry.template = None;
            }
        }
    }

    /// The fast-path decision for `key`, if its route is compiled.
    pub fn fast_path(&self, key: RouteKey) -> Option<FastPath<T>> {
        let inner = self.inner.lock();
        let entry = inner.routes.get(&key)?;
        let RouteState::Compiled { level, .. } = &entry.state else {
            return None;
        };
        let level = *level;
        let template = if level == OptimizationLevel::Ultra {
            let ttl = entry.window.freshness_ttl();
            entry
                .template
                .clone()
                .or_else(|| {
                    inner
                        .generators
                        .iter()
                        .find(|g| g.matches(&entry.method, &entry.pattern))
                        .and_then(|g| g.generate(&entry.method, &entry.pattern))
                })
                .map(|payload| Template { payload, ttl })
        } else {
            None
        };
        Some(FastPath { level, template })
    }

    /// Runs a promotion/demotion sweep. Does nothing during the learning
    /// period.
    pub fn evaluate(&self) {
        let now = Instant::now();
        if now.duration_since(self.started_at) < self.config.learning_period {
            return;
        }

        let mut promoted = Vec::new();
        let mut demoted = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.last_eval = now;

            let mut candidates: Vec<(RouteKey, f64)> = Vec::new();
            for (key, entry) in inner.routes.iter_mut() {
                let freq = entry.window.requests_per_minute(now);
                let mut demote = false;

                match &mut entry.state {
                    RouteState::Observing => {
                        if freq >= self.config.optimization_threshold {
                            let score =
                                freq * entry.window.avg_latency().as_secs_f64().max(1e-6);
                            candidates.push((*key, score));
                        }
                    }
                    RouteState::Disabled => {}
                    RouteState::Compiled {
                        level,
                        high_streak,
                        below_low_since,
                    } => {
                        if freq < self.config.low_water() {
                            let since = *below_low_since.get_or_insert(now);
                            demote = now.duration_since(since) >= self.config.cooldown;
                        } else {
                            *below_low_since = None;
                        }

                        if !demote {
                            if *level == OptimizationLevel::Basic {
                                if freq >= self.config.optimization_threshold * 2.0 {
                                    *high_streak += 1;
                                    if *high_streak >= 2 {
                                        *level = OptimizationLevel::Advanced;
                                        promoted.push((*key, OptimizationLevel::Advanced));
                                    }
                                } else {
                                    *high_streak = 0;
                                }
                            } else if *level == OptimizationLevel::Advanced
                                && self.config.aggressive_optimization
                            {
                                let shape_run = entry.window.shape_run();
                                let snapshot = entry.window.snapshot(now);
                                if snapshot.error_rate < 0.01 && shape_run >= STABLE_SHAPE_RUN {
                                    *level = OptimizationLevel::Ultra;
                                    promoted.push((*key, OptimizationLevel::Ultra));
                                }
                            }
                        }
                    }
                }

                if demote {
                    entry.state = RouteState::Observing;
                    entry.template = None;
                    demoted.push(*key);
                }
            }

            inner.compiled_count -= demoted.len();

            // Rank fresh candidates by frequency × latency and fill the
            // remaining compiled slots.
            candidates
                .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let free_slots = self
                .config
                .max_compiled_routes
                .saturating_sub(inner.compiled_count);
            let mut filled = 0usize;
            for (key, _score) in candidates.into_iter().take(free_slots) {
                if let Some(entry) = inner.routes.get_mut(&key) {
                    entry.state = RouteState::Compiled {
                        level: OptimizationLevel::Basic,
                        high_streak: 0,
                        below_low_since: None,
                    };
                    filled += 1;
                    promoted.push((key, OptimizationLevel::Basic));
                }
            }
            inner.compiled_count += filled;
        }

        for key in demoted {
            #[cfg(feature = "tracing")]
            tracing::debug!(route = key.0, "compiled route released");
            self.config.event_listeners.emit(&PreCompilerEvent::Demoted {
                compiler_name: self.config.name.clone(),
                timestamp: std::time::Instant::now(),
                route: key,
            });
        }
        for (key, level) in promoted {
            self.emit_promoted(key, level);
        }
    }

    /// Disables optimization for a route after a compilation failure. The
    /// route keeps serving through the regular path.
    pub fn disable(&self, key: RouteKey) {
        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.routes.get_mut(&key) else {
                return;
            };
            let was_compiled = matches!(entry.state, RouteState::Compiled { .. });
            entry.state = RouteState::Disabled;
            entry.template = None;
            if was_compiled {
                inner.compiled_count -= 1;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(route = key.0, "route optimization disabled");
        self.config.event_listeners.emit(&PreCompilerEvent::Disabled {
            compiler_name: self.config.name.clone(),
            timestamp: std::time::Instant::now(),
            route: key,
        });
    }

    /// Releases all compiled state, e.g. after a route-table reload.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.routes.values_mut() {
            if !matches!(entry.state, RouteState::Disabled) {
                entry.state = RouteState::Observing;
            }
            entry.template = None;
        }
        inner.compiled_count = 0;
    }

    /// Statistics snapshot for one route.
    pub fn stats(&self, key: RouteKey) -> Option<RouteStatsSnapshot> {
        let inner = self.inner.lock();
        inner
            .routes
            .get(&key)
            .map(|e| e.window.snapshot(Instant::now()))
    }

    /// Number of routes currently compiled.
    pub fn compiled_routes(&self) -> usize {
        self.inner.lock().compiled_count
    }

    fn emit_promoted(&self, key: RouteKey, level: OptimizationLevel) {
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "xypriss_precompiler_promotions_total",
            "compiler" => self.config.name.clone(),
            "level" => level.as_str()
        )
        .increment(1);
        self.config
            .event_listeners
            .emit(&PreCompilerEvent::Promoted {
                compiler_name: self.config.name.clone(),
                timestamp: std::time::Instant::now(),
                route: key,
                level,
            });
    }
}
