//! Account Dispatcher Library
//!
//! A multi-account call scheduler for platform automation workloads.
//!
//! This crate provides the core functionality for:
//! - Enforcing per-identity rate limits over minute and hour windows
//! - Isolating failing identities behind per-identity circuit breakers
//! - Coalescing compatible requests into batched calls
//! - Rotating work across a pool of credentialed identities
//! - Scheduling, retrying, and canceling units of work

pub mod batcher;
pub mod breaker;
pub mod config;
pub mod error;
pub mod limiter;
pub mod rotator;
pub mod scheduler;
