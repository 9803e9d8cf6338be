//! Reconciliation scans, on demand and periodic.
//!
//! Backends without push notifications are kept in step with the duplicate
//! monitor by listing each scope in full and reconciling the result.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use cloudfs_common::{Error, Result, Scope};
use cloudfs_storage::StorageBackend;

use crate::duplicates::{DuplicateEvent, DuplicateMonitor};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub scopes_scanned: usize,
    pub failures: usize,
    /// Duplicate groups that appeared during this pass.
    pub events: Vec<DuplicateEvent>,
    pub duration: Duration,
}

/// Scan every scope of a backend into the monitor.
///
/// A failing scope is logged and counted; the remaining scopes still run.
pub async fn reconcile_backend(
    monitor: &DuplicateMonitor,
    backend: &dyn StorageBackend,
) -> ScanReport {
    let started = Instant::now();
    let mut report = ScanReport::default();

    for scope in Scope::ALL {
        match monitor.scan_backend(backend, scope).await {
            Ok(events) => {
                report.scopes_scanned += 1;
                report.events.extend(events);
            }
            Err(e) => {
                warn!("Duplicate scan of {} on {} failed: {}", scope, backend.kind(), e);
                report.failures += 1;
            }
        }
    }

    report.duration = started.elapsed();
    report
}

enum ScanRequest {
    Scan(oneshot::Sender<ScanReport>),
    Shutdown,
}

/// Background task running reconciliation scans.
///
/// Dropping the scheduler aborts the task.
pub struct ScanScheduler {
    request_tx: mpsc::Sender<ScanRequest>,
    task: Option<JoinHandle<()>>,
}

impl ScanScheduler {
    /// Start the task. With a `period`, a scan also runs on every tick
    /// (the first immediately); without one, scans run only on request.
    pub fn spawn<F, Fut>(period: Option<Duration>, scan_fn: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScanReport> + Send + 'static,
    {
        let (request_tx, mut request_rx) = mpsc::channel::<ScanRequest>(16);

        let task = tokio::spawn(async move {
            let mut ticker = period.map(|period| {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });

            info!("Duplicate scanner started (period: {:?})", period);

            loop {
                tokio::select! {
                    request = request_rx.recv() => match request {
                        Some(ScanRequest::Scan(reply)) => {
                            debug!("Processing scan request");
                            let _ = reply.send(scan_fn().await);
                        }
                        Some(ScanRequest::Shutdown) | None => {
                            info!("Duplicate scanner shutting down");
                            break;
                        }
                    },

                    _ = Self::wait_for_tick(&mut ticker) => {
                        let report = scan_fn().await;
                        if report.failures > 0 {
                            error!(
                                "Periodic scan: {} scopes failed, {} scanned",
                                report.failures, report.scopes_scanned
                            );
                        } else {
                            debug!(
                                "Periodic scan completed in {:?}: {} new duplicate groups",
                                report.duration,
                                report.events.len()
                            );
                        }
                    }
                }
            }
        });

        Self {
            request_tx,
            task: Some(task),
        }
    }

    async fn wait_for_tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Run a scan now and wait for its report.
    pub async fn scan_now(&self) -> Result<ScanReport> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.request_tx
            .send(ScanRequest::Scan(reply_tx))
            .await
            .map_err(|_| Error::Unavailable("Duplicate scanner is not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::Unavailable("Duplicate scanner stopped mid-scan".to_string()))
    }

    /// Stop the task after any scan in progress.
    pub async fn shutdown(mut self) {
        let _ = self.request_tx.send(ScanRequest::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudfs_storage::{Credential, CredentialStore, DriveApi, MemoryDriveApi, TokenDriveBackend};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scan_request() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();

        let scheduler = ScanScheduler::spawn(None, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ScanReport {
                    scopes_scanned: 2,
                    ..Default::default()
                }
            }
        });

        let report = scheduler.scan_now().await.unwrap();
        assert_eq!(report.scopes_scanned, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_scans() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();

        let scheduler = ScanScheduler::spawn(Some(Duration::from_secs(60)), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ScanReport::default()
            }
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        // Ticks at 0s, 60s and 120s.
        assert_eq!(count.load(Ordering::SeqCst), 3);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_backend_counts_failures() {
        let credentials = Arc::new(CredentialStore::new());
        let api = Arc::new(MemoryDriveApi::new());
        let backend = TokenDriveBackend::new(api.clone(), credentials.clone());
        let monitor = DuplicateMonitor::new(false);

        let report = reconcile_backend(&monitor, &backend).await;
        assert_eq!(report.failures, 2);
        assert_eq!(report.scopes_scanned, 0);

        credentials.set("token");
        let cred = Credential::new("token").unwrap();
        api.create_file(&cred, "a", "appDataFolder", vec![]).await.unwrap();
        api.create_file(&cred, "a", "appDataFolder", vec![]).await.unwrap();

        let report = reconcile_backend(&monitor, &backend).await;
        assert_eq!(report.failures, 0);
        assert_eq!(report.scopes_scanned, 2);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].scope, Scope::AppData);
    }
}
