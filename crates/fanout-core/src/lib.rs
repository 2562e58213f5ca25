//! Fanout Core Library
//!
//! Bounded-concurrency task running with aggregated errors:
//! - [`Runner`] admits tasks under an optional concurrency limit and collects
//!   every error they return
//! - [`CancelSignal`] carries cancellation, deadlines and the cause of
//!   cancellation down a tree of derived signals
//! - [`TaskError`] keeps a task's own failure apart from "never ran" markers

pub mod collector;
pub mod config;
pub mod error;
pub mod runner;
pub mod signal;

// Re-export commonly used types
pub use collector::ErrorCollector;
pub use config::RunnerConfig;
pub use error::{FanoutError, FanoutResult, TaskError, TaskResult};
pub use runner::Runner;
pub use signal::CancelSignal;
