//! Liveness watchdog for encoder sessions.
//!
//! A session is finalized when no frame has been written for longer than a
//! timeout derived from the camera's current exposure time. The timeout lives
//! in an atomic shared between the ingest path (writer) and the watchdog
//! thread (reader); last activity is likewise an atomic timestamp.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Sender};

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const RECOMPUTE_INTERVAL: Duration = Duration::from_secs(1);

pub const TIMEOUT_FLOOR_MS: f64 = 1500.0;
pub const EXPOSURE_MULTIPLIER: f64 = 2.0;
pub const TIMEOUT_MARGIN_MS: f64 = 1000.0;

/// Last successful write, as nanoseconds since the clock was created.
#[derive(Debug)]
pub struct ActivityClock {
    epoch: Instant,
    last_nanos: AtomicU64,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_nanos: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        self.last_nanos.store(nanos, Ordering::Release);
    }

    pub fn idle(&self) -> Duration {
        let now = self.epoch.elapsed().as_nanos() as u64;
        let last = self.last_nanos.load(Ordering::Acquire);
        Duration::from_nanos(now.saturating_sub(last))
    }
}

/// `timeout = max(floor, multiplier * exposure + margin)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeoutPolicy {
    pub floor_ms: f64,
    pub multiplier: f64,
    pub margin_ms: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            floor_ms: TIMEOUT_FLOOR_MS,
            multiplier: EXPOSURE_MULTIPLIER,
            margin_ms: TIMEOUT_MARGIN_MS,
        }
    }
}

impl TimeoutPolicy {
    pub fn floor(&self) -> Duration {
        Duration::from_millis(self.floor_ms.ceil() as u64)
    }

    pub fn compute(&self, exposure_ms: f64) -> Duration {
        let ms = (self.multiplier * exposure_ms.max(0.0) + self.margin_ms).max(self.floor_ms);
        Duration::from_millis(ms.ceil() as u64)
    }
}

/// Shared, rate-limited adaptive timeout.
#[derive(Debug)]
pub struct AdaptiveTimeout {
    policy: TimeoutPolicy,
    current_ms: AtomicU64,
    last_refresh: Mutex<Option<Instant>>,
}

impl Default for AdaptiveTimeout {
    fn default() -> Self {
        Self::new(TimeoutPolicy::default())
    }
}

impl AdaptiveTimeout {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            current_ms: AtomicU64::new(policy.floor().as_millis() as u64),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms.load(Ordering::Acquire))
    }

    /// Recomputes from the live exposure at most once per [`RECOMPUTE_INTERVAL`].
    /// Returns `true` when a recomputation was attempted.
    pub fn refresh(&self, exposure_ms: Option<f64>) -> bool {
        self.refresh_at(Instant::now(), exposure_ms)
    }

    pub fn refresh_at(&self, now: Instant, exposure_ms: Option<f64>) -> bool {
        {
            let mut last = self
                .last_refresh
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(prev) = *last {
                if now.saturating_duration_since(prev) < RECOMPUTE_INTERVAL {
                    return false;
                }
            }
            *last = Some(now);
        }
        self.apply(exposure_ms);
        true
    }

    /// Applies an exposure reading immediately. Returns the new timeout if it changed.
    pub fn apply(&self, exposure_ms: Option<f64>) -> Option<Duration> {
        let Some(exposure_ms) = exposure_ms.filter(|e| e.is_finite() && *e >= 0.0) else {
            tracing::debug!(
                target: "mp4stream",
                "[WATCHDOG] Exposure unavailable, keeping timeout at {}ms",
                self.current().as_millis()
            );
            return None;
        };

        let next = self.policy.compute(exposure_ms);
        let next_ms = next.as_millis() as u64;
        let prev_ms = self.current_ms.swap(next_ms, Ordering::AcqRel);
        if prev_ms == next_ms {
            return None;
        }

        tracing::debug!(
            target: "mp4stream",
            "[WATCHDOG] Timeout {}ms -> {}ms (exposure {:.1}ms)",
            prev_ms,
            next_ms,
            exposure_ms
        );
        Some(next)
    }
}

/// Background thread that fires once when the session has been idle too long.
pub struct SessionWatchdog {
    cancel_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl SessionWatchdog {
    /// Starts polling. `on_expire` runs on the watchdog thread at most once,
    /// after which the watchdog disarms itself.
    pub fn arm<F>(
        activity: Arc<ActivityClock>,
        timeout: Arc<AdaptiveTimeout>,
        poll: Duration,
        on_expire: F,
    ) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = fired.clone();

        let handle = std::thread::Builder::new()
            .name("mp4stream-watchdog".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(poll);
                let mut on_expire = Some(on_expire);
                loop {
                    select! {
                        recv(cancel_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let idle = activity.idle();
                            let limit = timeout.current();
                            if idle > limit {
                                tracing::warn!(
                                    target: "mp4stream",
                                    "[WATCHDOG] No frame written for {}ms (limit {}ms), finalizing session",
                                    idle.as_millis(),
                                    limit.as_millis()
                                );
                                fired_flag.store(true, Ordering::Release);
                                if let Some(expire) = on_expire.take() {
                                    expire();
                                }
                                break;
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
            fired,
        })
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Stops the thread and waits for it. Safe to call more than once.
    pub fn disarm(&mut self) {
        drop(self.cancel_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!(target: "mp4stream", "[WATCHDOG] Watchdog thread panicked");
            }
        }
    }
}

impl Drop for SessionWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
