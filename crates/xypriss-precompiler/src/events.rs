//! Pre-compiler events.

use crate::compiler::OptimizationLevel;
use crate::RouteKey;
use std::time::Instant;
use xypriss_core::events::ServerEvent;

/// Events emitted by the pre-compiler.
#[derive(Debug, Clone)]
pub enum PreCompilerEvent {
    /// A route reached a (higher) compilation level.
    Promoted {
        compiler_name: String,
        timestamp: Instant,
        route: RouteKey,
        level: OptimizationLevel,
    },
    /// A route's compiled state was released.
    Demoted {
        compiler_name: String,
        timestamp: Instant,
        route: RouteKey,
    },
    /// Optimization was disabled for a route after a compilation failure.
    Disabled {
        compiler_name: String,
        timestamp: Instant,
        route: RouteKey,
    },
}

impl ServerEvent for PreCompilerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PreCompilerEvent::Promoted { .. } => "promoted",
            PreCompilerEvent::Demoted { .. } => "demoted",
            PreCompilerEvent::Disabled { .. } => "disabled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            PreCompilerEvent::Promoted { timestamp, .. }
            | PreCompilerEvent::Demoted { timestamp, .. }
            | PreCompilerEvent::Disabled { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            PreCompilerEvent::Promoted { compiler_name, .. }
            | PreCompilerEvent::Demoted { compiler_name, .. }
            | PreCompilerEvent::Disabled { compiler_name, .. } => compiler_name,
        }
    }
}
