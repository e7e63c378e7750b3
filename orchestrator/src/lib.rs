//! Budget-capped autonomous mission orchestrator.
//!
//! This crate drives natural-language missions through a plan, execute,
//! validate, retry loop against pluggable execution runtimes (browser and
//! desktop automation backends). The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, retry policy,
//!   memory ranking, policy gate). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (SQLite run store, model
//!   router, runtime executors, prompt rendering). Isolated behind traits to
//!   enable scripting in tests.
//!
//! [`run`] composes core logic with I/O into the mission run loop.

pub mod core;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
