//! Remote generation service client and bounded retry.
//!
//! This crate provides:
//! - [`retry`]: exponential backoff with jitter and per-attempt timeouts
//! - [`service`]: the [`GenerationService`] seam and its HTTP binding

pub mod retry;
pub mod service;

pub use retry::{RetryPolicy, with_retry};
pub use service::{GenerationService, HttpGenerationService, RemoteOptions, ServiceResponse};
