//! Credential pool management.
//!
//! Everything needed to keep a set of rate-limited API credentials rotating
//! safely:
//! - Round-robin credential pool with status lifecycle and usage counters
//! - Sliding-window per-minute quota tracking per credential
//! - Configurable backoff curves for parked credentials

pub mod backoff;
pub mod credentials;
pub mod quota;

pub use backoff::{delay_for_attempt, BackoffConfig, BackoffKind};
pub use credentials::{
    CredentialPool, CredentialSnapshot, CredentialStatus, LeasedCredential, PoolConfig, PoolStats,
    SharedCredentialPool,
};
pub use quota::SlidingWindow;
