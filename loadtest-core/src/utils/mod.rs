//! # Utilities Module
//!
//! Internal utility modules for the loadtest-core crate.
//! These modules are marked as `pub(crate)` to enforce API boundaries.

// Internal modules - not part of public API
pub(crate) mod adaptive;
pub(crate) mod logger;
pub(crate) mod rate_limiter;
pub(crate) mod retry;
pub(crate) mod runner;

// Selective exports - only public utilities
pub use adaptive::AdaptiveRateController;
pub use logger::{setup_logger, RESULT_TARGET};
pub use rate_limiter::RateLimiter;
pub use runner::{spawn_shutdown_triggers, spawn_time_limit, RequestCounter, WorkerRunner};
