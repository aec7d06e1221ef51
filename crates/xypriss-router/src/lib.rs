//! Trie-based request routing for XyPriss.
//!
//! A [`Router`] maps `(method, path)` pairs to registered values (handler
//! references, in the server) while extracting path parameters.
//!
//! # Pattern language
//!
//! - Literal segments match byte-exactly; paths are case-sensitive, methods
//!   are not.
//! - `:name` captures exactly one segment into `params["name"]`.
//! - `*` matches exactly one segment, captured as `params["*"]`.
//! - `**` matches one or more segments, captured as `params["**"]` joined
//!   with `/`. It must be the final segment of a pattern.
//!
//! On conflict, precedence is literal > `:param` > `*` > `**`; remaining
//! ties fall back to registration order.
//!
//! # Example
//!
//! ```rust
//! use xypriss_router::Router;
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.route(Method::GET, "/users/:id", "user").unwrap();
//! router.route(Method::GET, "/users/me", "me").unwrap();
//! router.route(Method::GET, "/api/**", "catch-all").unwrap();
//!
//! // Literal wins over :param.
//! let m = router.lookup(&Method::GET, "/users/me").unwrap();
//! assert_eq!(*m.value, "me");
//!
//! let m = router.lookup(&Method::GET, "/users/42").unwrap();
//! assert_eq!(m.params["id"], "42");
//!
//! let m = router.lookup(&Method::GET, "/api/v1/users/42").unwrap();
//! assert_eq!(m.params["**"], "v1/users/42");
//! ```
//!
//! Routers are immutable once the server starts; hot reload swaps the whole
//! router atomically.

mod error;
mod pattern;
mod router;

pub use error::{MatchError, PatternError};
pub use pattern::{Pattern, Segment};
pub use router::{RouteId, RouteMatch, Router};
