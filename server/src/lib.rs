//! Gatekeeper Server
//!
//! Distributed admission control for HTTP services. Request counts live in a
//! shared Redis deployment (standalone, sentinel or cluster) so every replica
//! enforces the same fixed-window limit, with a process-local fallback.

pub mod api;
pub mod config;
pub mod ratelimit;
pub mod store;
