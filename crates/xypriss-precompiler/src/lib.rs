//! The request pre-compiler.
//!
//! Observes per-route traffic (frequency, latency, error rate) and promotes
//! hot routes through compilation levels:
//!
//! - **Basic** - the route's dispatch is pinned; the server may skip route
//!   resolution for it.
//! - **Advanced** - sustained heavy traffic; the server additionally skips
//!   non-essential middleware.
//! - **Ultra** - low error rate and a repeatable response shape; responses
//!   are served from a precomputed template with a cache TTL derived from
//!   the observed freshness of the shape.
//!
//! During the learning period only observation runs. Promotion is ranked by
//! `frequency × average latency` and capped at `max_compiled_routes`;
//! demotion uses a hysteresis low-water mark and a cooldown so borderline
//! routes do not flap. Compilation failures disable optimization for the
//! affected route and never block dispatch.
//!
//! The pre-compiler is generic over the template payload the host stores
//! for ultra routes; the server instantiates it with its response type.

mod compiler;
mod config;
mod events;
mod generator;
mod stats;

pub use compiler::{FastPath, OptimizationLevel, PreCompiler, Template};
pub use config::{PreCompilerConfig, PreCompilerConfigBuilder};
pub use events::PreCompilerEvent;
pub use generator::ResponseGenerator;
pub use stats::RouteStatsSnapshot;

/// Opaque identifier the host assigns to each route it observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(pub u64);
