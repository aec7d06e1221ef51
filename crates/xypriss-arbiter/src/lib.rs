//! Port arbitration for XyPriss.
//!
//! The [`PortArbiter`] obtains a bound listening socket for a requested
//! `(host, port)`. When the port is occupied it can either walk a candidate
//! range per a configured strategy ([`AutoSwitch`]) or, on explicit request,
//! evict the current owner ([`PortArbiter::force_close`]): discover the
//! processes bound to that exact port, signal them gracefully, escalate
//! after a grace interval, and re-verify that the port is free.
//!
//! Process discovery and signalling go through platform shims
//! ([`PortInspector`], [`ProcessSignaller`]); the Unix implementations
//! shell out to `lsof` and use process-group signals, the Windows ones use
//! `netstat` and `taskkill`.
//!
//! # Example
//!
//! ```rust,no_run
//! use xypriss_arbiter::{AcquireOptions, AutoSwitch, PortArbiter, SwitchStrategy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let arbiter = PortArbiter::new();
//! let opts = AcquireOptions::new().auto_switch(AutoSwitch {
//!     range: (8080, 8090),
//!     strategy: SwitchStrategy::Increment,
//!     max_attempts: 10,
//! });
//! let socket = arbiter.acquire("127.0.0.1".parse()?, 8080, &opts).await?;
//! println!("listening on {}", socket.addr());
//! # Ok(())
//! # }
//! ```

mod arbiter;
mod config;
mod error;
mod force_close;
mod platform;

pub use arbiter::{ListenSocket, PortArbiter};
pub use config::{AcquireOptions, AutoSwitch, SwitchStrategy};
pub use error::ArbiterError;
pub use force_close::ForceCloseOutcome;
pub use platform::{PortInspector, ProcessSignaller, SignalOutcome};
