//! Health/recency sentinel (spec.md §4.6): a background task that pings the
//! database every 5 seconds and records the latest outcome, the same
//! periodic-background-task shape as the teacher's `RootManager` commit
//! loop but driven by a plain interval instead of a commit threshold.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval, Duration};

const POLL_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Fail,
}

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub at: DateTime<Utc>,
}

pub struct Sentinel {
    pool: PgPool,
    version: &'static str,
    latest: Arc<Mutex<Option<HealthRecord>>>,
    shutdown: Arc<Notify>,
}

impl Sentinel {
    pub fn new(pool: PgPool, version: &'static str) -> Self {
        Self { pool, version, latest: Arc::new(Mutex::new(None)), shutdown: Arc::new(Notify::new()) }
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub async fn latest(&self) -> Option<HealthRecord> {
        self.latest.lock().await.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Spawns the polling loop. The returned handle is detached; the
    /// process is expected to call [`Self::shutdown`] on graceful exit.
    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(POLL_PERIOD);
            // Populate a first reading immediately instead of waiting a full period.
            self.poll_once().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                    _ = self.shutdown.notified() => {
                        tracing::info!("sentinel: shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn poll_once(&self) {
        let status = match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => HealthStatus::Ok,
            Err(err) => {
                tracing::warn!(error = %err, "sentinel: database ping failed");
                HealthStatus::Fail
            }
        };
        let mut guard = self.latest.lock().await;
        *guard = Some(HealthRecord { status, at: Utc::now() });
    }
}
