//! Admission control (rate limiting) module.
//!
//! Fixed-window counters shared across replicas through Redis, with a
//! process-local fallback when no store is configured. The [`AdmissionGate`]
//! is the entry point; [`admission_control`] plugs it into an axum router.

pub mod config;
pub mod constants;
pub mod counter;
pub mod error;
pub mod key;
pub mod limiter;
pub mod local;
pub mod middleware;
pub mod remote;
pub mod types;

pub use config::*;
pub use constants::*;
pub use counter::*;
pub use error::*;
pub use key::*;
pub use limiter::*;
pub use local::*;
pub use middleware::admission_control;
pub use remote::*;
pub use types::*;
