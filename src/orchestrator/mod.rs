//! Script execution and cancellation engine.
//!
//! Covers process supervision, single-script execution with hang
//! escalation, scheduling, the cancel controller, session epochs, and the
//! per-attempt orchestrator with its outer restart loop.

pub mod cancel;
pub mod epoch;
pub mod hang_monitor;
pub mod path_env;
pub mod run_loop;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod signals;
pub mod supervisor;
