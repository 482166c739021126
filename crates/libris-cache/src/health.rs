//! Remote tier health monitor.
//!
//! A background task probes the remote tier on a fixed interval and publishes
//! a [`HealthStatus`] snapshot. Request paths read the snapshot through a
//! [`HealthReporter`]; they never wait on a probe.
//!
//! ```text
//! Initializing ──> Healthy <──> Degraded ──> Stopped
//! ```
//!
//! A cycle is degraded when the ping fails `retry_ceiling` times in a row,
//! or when a successful cycle breaks any threshold: response time, rolling
//! error rate, idle connection floor, memory ceiling.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{HealthCheckConfig, PoolConfig};
use crate::error::{CacheError, CacheResult};
use crate::metrics;
use crate::remote::RemoteCacheClient;
use crate::remote::client::PoolMetrics;
use crate::window::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Initializing,
    Healthy,
    Degraded,
    Stopped,
}

/// Measurements from the latest probe cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthMetrics {
    #[serde(rename = "response_time_ms", serialize_with = "duration_millis")]
    pub response_time: Duration,
    pub connection_pool: PoolMetrics,
    pub memory_usage_bytes: u64,
    /// Failed probes over all probes in the error window, in `[0, 1]`.
    pub error_rate: f64,
}

/// Published health snapshot. Only the probe loop writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub degraded: bool,
    pub state: MonitorState,
    #[serde(with = "time::serde::rfc3339")]
    pub last_check: OffsetDateTime,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub metrics: HealthMetrics,
    pub message: String,
}

impl HealthStatus {
    /// Optimistic status used until the first probe completes.
    pub fn initializing() -> Self {
        Self {
            is_healthy: true,
            degraded: false,
            state: MonitorState::Initializing,
            last_check: OffsetDateTime::now_utc(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            metrics: HealthMetrics::default(),
            message: "monitor starting".to_string(),
        }
    }
}

fn duration_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Read-only view of the published status. Cheap to clone.
#[derive(Clone)]
pub struct HealthReporter {
    status: Arc<ArcSwap<HealthStatus>>,
}

impl HealthReporter {
    pub fn status(&self) -> Arc<HealthStatus> {
        self.status.load_full()
    }

    pub fn is_degraded(&self) -> bool {
        self.status.load().degraded
    }
}

/// Handle to a running probe loop.
pub struct MonitorHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signals the loop to stop and waits for it to exit. A probe in flight
    /// completes and publishes before the loop observes the signal.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Health monitor task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct MonitorInner {
    client: Arc<RemoteCacheClient>,
    config: HealthCheckConfig,
    min_idle: usize,
    // Locked separately from `status` so publishing never waits on the window.
    window: Mutex<TimeWindow>,
    status: Arc<ArcSwap<HealthStatus>>,
}

/// Periodic remote-tier supervisor.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    /// `pool.min_idle` is the idle connection floor; 0 disables that check.
    pub fn new(
        client: Arc<RemoteCacheClient>,
        config: &HealthCheckConfig,
        pool: &PoolConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                client,
                config: config.clone(),
                min_idle: pool.min_idle,
                window: Mutex::new(TimeWindow::new(config.error_window())),
                status: Arc::new(ArcSwap::from_pointee(HealthStatus::initializing())),
            }),
        }
    }

    pub fn reporter(&self) -> HealthReporter {
        HealthReporter {
            status: self.inner.status.clone(),
        }
    }

    pub fn get_health_status(&self) -> Arc<HealthStatus> {
        self.inner.status.load_full()
    }

    /// Spawns the probe loop. The first probe runs immediately.
    ///
    /// Only one loop may run per client. Fails with a validation error while
    /// another loop, from this or any other monitor over the same client, is
    /// running.
    pub fn start(&self) -> CacheResult<MonitorHandle> {
        if !self.inner.client.claim_monitor() {
            return Err(CacheError::validation(
                "a health monitor is already running for this client",
            ));
        }
        let (shutdown, mut stop_rx) = oneshot::channel();
        let monitor = self.clone();
        let interval = self.inner.config.interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                tier = monitor.inner.client.tier_name(),
                "Health monitor started"
            );

            loop {
                tokio::select! {
                    biased;
                    // Also fires if the handle is dropped.
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        monitor.inner.client.maintain().await;
                        monitor.probe_once().await;
                    }
                }
            }

            monitor.publish_stopped();
            monitor.inner.client.release_monitor();
            tracing::info!("Health monitor stopped");
        });

        Ok(MonitorHandle { shutdown, task })
    }

    /// Runs one probe cycle and publishes the result.
    pub async fn probe_once(&self) -> Arc<HealthStatus> {
        let inner = &self.inner;
        let previous = inner.status.load_full();

        let next = match inner.client.ping(inner.config.timeout()).await {
            Ok(response_time) => {
                let error_rate = {
                    let mut window = inner.window.lock();
                    window.record(false);
                    window.rate()
                };
                self.healthy_cycle(&previous, response_time, error_rate)
                    .await
            }
            Err(e) => {
                let error_rate = {
                    let mut window = inner.window.lock();
                    window.record(true);
                    window.rate()
                };
                self.failed_cycle(&previous, &e.to_string(), error_rate)
            }
        };

        if next.degraded != previous.degraded {
            if next.degraded {
                tracing::warn!(message = %next.message, "Remote cache tier degraded");
            } else {
                tracing::info!("Remote cache tier recovered");
            }
        }

        let pool = next.metrics.connection_pool;
        metrics::record_health(
            next.degraded,
            next.metrics.error_rate,
            next.metrics.memory_usage_bytes,
            pool.idle,
            pool.active,
        );

        let next = Arc::new(next);
        inner.status.store(next.clone());
        next
    }

    async fn healthy_cycle(
        &self,
        previous: &HealthStatus,
        response_time: Duration,
        error_rate: f64,
    ) -> HealthStatus {
        let inner = &self.inner;
        let config = &inner.config;
        let pool = inner.client.pool_metrics();
        let memory_usage_bytes = match inner.client.memory_usage().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read remote memory usage");
                previous.metrics.memory_usage_bytes
            }
        };

        let mut violations = Vec::new();
        if response_time > config.max_response_time() {
            violations.push(format!(
                "response time {}ms exceeds {}ms",
                response_time.as_millis(),
                config.max_response_time_ms
            ));
        }
        if error_rate > config.max_error_rate {
            violations.push(format!(
                "error rate {error_rate:.2} exceeds {:.2}",
                config.max_error_rate
            ));
        }
        if inner.min_idle > 0 && pool.idle < inner.min_idle {
            violations.push(format!(
                "{} idle connections below floor of {}",
                pool.idle, inner.min_idle
            ));
        }
        if config.max_memory_bytes > 0 && memory_usage_bytes > config.max_memory_bytes {
            violations.push(format!(
                "memory {memory_usage_bytes} bytes exceeds {}",
                config.max_memory_bytes
            ));
        }

        let degraded = !violations.is_empty();
        HealthStatus {
            is_healthy: !degraded,
            degraded,
            state: if degraded {
                MonitorState::Degraded
            } else {
                MonitorState::Healthy
            },
            last_check: OffsetDateTime::now_utc(),
            consecutive_failures: 0,
            consecutive_successes: previous.consecutive_successes.saturating_add(1),
            metrics: HealthMetrics {
                response_time,
                connection_pool: pool,
                memory_usage_bytes,
                error_rate,
            },
            message: if degraded {
                violations.join("; ")
            } else {
                "ok".to_string()
            },
        }
    }

    fn failed_cycle(&self, previous: &HealthStatus, reason: &str, error_rate: f64) -> HealthStatus {
        let ceiling = self.inner.config.retry_ceiling;
        let failures = previous.consecutive_failures.saturating_add(1);
        let exhausted = failures >= ceiling;

        if exhausted {
            tracing::error!(
                consecutive_failures = failures,
                retry_ceiling = ceiling,
                error = reason,
                "Remote cache unreachable; retry ceiling reached"
            );
        } else {
            tracing::warn!(
                consecutive_failures = failures,
                error = reason,
                "Remote cache ping failed"
            );
        }

        let degraded = previous.degraded || exhausted;
        HealthStatus {
            is_healthy: false,
            degraded,
            state: if degraded {
                MonitorState::Degraded
            } else {
                previous.state
            },
            last_check: OffsetDateTime::now_utc(),
            consecutive_failures: failures,
            consecutive_successes: 0,
            metrics: HealthMetrics {
                response_time: Duration::ZERO,
                connection_pool: self.inner.client.pool_metrics(),
                memory_usage_bytes: previous.metrics.memory_usage_bytes,
                error_rate,
            },
            message: format!("ping failed ({failures} consecutive): {reason}"),
        }
    }

    fn publish_stopped(&self) {
        let mut status = HealthStatus::clone(&self.inner.status.load());
        status.state = MonitorState::Stopped;
        status.message = "monitor stopped".to_string();
        self.inner.status.store(Arc::new(status));
    }
}
