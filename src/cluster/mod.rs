//! Coordination between processes sharing one store

pub mod lease;
pub mod lock;

pub use lease::ServiceLease;
pub use lock::{CheckLockGuard, CheckLocks, CHECK_LOCK_TTL};
