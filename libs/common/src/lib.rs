//! Basic library shared by the inspection services
//!
//! Provides:
//! - logging bootstrap (console + daily rolling file, runtime level changes)
//! - graceful shutdown signal handling
//! - hex formatting used by protocol frame traces

pub mod hex;
pub mod logging;
pub mod shutdown;

// Re-export common dependencies
pub use tokio;
