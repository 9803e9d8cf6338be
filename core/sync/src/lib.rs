//! CloudFS background services.
//!
//! This module provides the notification side of CloudFS, including:
//! - A publish/subscribe hub with isolated per-subscriber delivery
//! - Duplicate-name detection over backend change notifications
//! - Periodic reconciliation scans for backends without push notifications
//! - The derived cloud availability signal

pub mod availability;
pub mod duplicates;
pub mod scanner;
pub mod subscribers;

// Re-export main types
pub use availability::AvailabilitySignal;
pub use duplicates::{Change, DuplicateEvent, DuplicateMonitor};
pub use scanner::{reconcile_backend, ScanReport, ScanScheduler};
pub use subscribers::{HandlerResult, Subscribers, Subscription};
