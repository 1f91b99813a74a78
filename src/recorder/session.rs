//! One active encode: encoder pipe, pacing counters, time baseline and watchdog.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::errors::{EncodingError, RecorderError};
use super::pacer::{FramePacer, PacingOutcome};
use super::types::{FrameTimestamp, PacingMode};
use super::watchdog::{ActivityClock, AdaptiveTimeout, SessionWatchdog, POLL_INTERVAL};
use super::writer::EncoderSession;
use crate::shared::paths::ensure_dir;

const PROGRESS_LOG_EVERY: u64 = 60;

/// State that both the ingest path and the watchdog touch.
///
/// Every write, gap fill and close goes through the one mutex around this.
pub struct SessionCore {
    pub encoder: EncoderSession,
    pub pacer: FramePacer,
}

impl SessionCore {
    pub fn finalize(&mut self) -> Result<(), EncodingError> {
        self.encoder.close()
    }

    pub fn is_finalized(&self) -> bool {
        self.encoder.is_closed()
    }
}

pub type SharedCore = Arc<Mutex<SessionCore>>;

/// Frame flow must not stop because another thread panicked under the lock.
pub(crate) fn lock_core(core: &SharedCore) -> MutexGuard<'_, SessionCore> {
    core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Time zero for a session. The kind is chosen from the first frame and
/// never changes afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeBaseline {
    Elapsed { t0_ms: f64 },
    Received { t0: DateTime<Utc> },
    WallClock { t0: Instant },
}

impl TimeBaseline {
    pub fn from_first_frame(timestamp: FrameTimestamp, now: Instant) -> Self {
        match timestamp {
            FrameTimestamp::ElapsedMs(ms) if ms.is_finite() => TimeBaseline::Elapsed { t0_ms: ms },
            FrameTimestamp::ReceivedAt(at) => TimeBaseline::Received { t0: at },
            _ => TimeBaseline::WallClock { t0: now },
        }
    }

    /// Seconds since time zero, or `None` if the frame lacks this baseline's kind
    /// of metadata.
    pub fn elapsed_secs(&self, timestamp: FrameTimestamp, now: Instant) -> Option<f64> {
        let secs = match (self, timestamp) {
            (TimeBaseline::Elapsed { t0_ms }, FrameTimestamp::ElapsedMs(ms)) if ms.is_finite() => {
                (ms - t0_ms) / 1000.0
            }
            (TimeBaseline::Received { t0 }, FrameTimestamp::ReceivedAt(at)) => {
                let delta = at.signed_duration_since(*t0);
                match delta.num_microseconds() {
                    Some(us) => us as f64 / 1_000_000.0,
                    None => delta.num_milliseconds() as f64 / 1000.0,
                }
            }
            (TimeBaseline::WallClock { t0 }, _) => now.saturating_duration_since(*t0).as_secs_f64(),
            _ => return None,
        };
        Some(secs.max(0.0))
    }
}

/// Everything needed to start one segment.
#[derive(Clone, Debug)]
pub struct SegmentPlan {
    pub path: PathBuf,
    pub segment_index: u32,
    pub width: u32,
    pub height: u32,
    pub mode: PacingMode,
    pub argv: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub segment_index: u32,
    pub frames_written: u64,
    pub new_frames: u64,
    pub duplicated: u64,
    pub dropped: u64,
}

pub struct Session {
    path: PathBuf,
    segment_index: u32,
    width: u32,
    height: u32,
    baseline: TimeBaseline,
    last_elapsed: f64,
    core: SharedCore,
    activity: Arc<ActivityClock>,
    watchdog: SessionWatchdog,
}

impl Session {
    /// Spawns the encoder for `plan` and arms the watchdog.
    pub fn open(
        plan: SegmentPlan,
        first_timestamp: FrameTimestamp,
        timeout: Arc<AdaptiveTimeout>,
    ) -> Result<Self, RecorderError> {
        if let Some(parent) = plan.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).map_err(|e| {
                RecorderError::Storage(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        tracing::debug!(target: "mp4stream", "[SEGMENT] Encoder argv: {:?}", plan.argv);
        let encoder = EncoderSession::spawn(&plan.argv)?;

        let core: SharedCore = Arc::new(Mutex::new(SessionCore {
            encoder,
            pacer: FramePacer::new(plan.mode),
        }));

        let activity = Arc::new(ActivityClock::new());
        activity.touch();

        let expiring = core.clone();
        let watchdog = match SessionWatchdog::arm(activity.clone(), timeout, POLL_INTERVAL, move || {
            if let Err(e) = lock_core(&expiring).finalize() {
                tracing::warn!(target: "mp4stream", "[WATCHDOG] Finalize failed: {}", e);
            }
        }) {
            Ok(watchdog) => watchdog,
            Err(e) => {
                if let Err(close_err) = lock_core(&core).finalize() {
                    tracing::warn!(target: "mp4stream", "[SEGMENT] Close after failed arm: {}", close_err);
                }
                return Err(EncodingError::SpawnFailed(format!("Failed to start watchdog: {}", e)).into());
            }
        };

        tracing::info!(
            target: "mp4stream",
            "[SEGMENT] Recording {}x{} to {:?} ({:?})",
            plan.width,
            plan.height,
            plan.path,
            plan.mode
        );

        Ok(Self {
            path: plan.path,
            segment_index: plan.segment_index,
            width: plan.width,
            height: plan.height,
            baseline: TimeBaseline::from_first_frame(first_timestamp, Instant::now()),
            last_elapsed: 0.0,
            core,
            activity,
            watchdog,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shared_core(&self) -> SharedCore {
        self.core.clone()
    }

    pub fn is_finalized(&self) -> bool {
        lock_core(&self.core).is_finalized()
    }

    /// Real seconds since time zero for a frame carrying `timestamp`.
    pub fn elapsed_for(&mut self, timestamp: FrameTimestamp) -> f64 {
        if let Some(secs) = self.baseline.elapsed_secs(timestamp, Instant::now()) {
            self.last_elapsed = secs;
        }
        self.last_elapsed
    }

    /// Paces one overlaid plane into the encoder.
    pub fn write(&mut self, plane: &[u8], real_elapsed_secs: f64) -> Result<PacingOutcome, EncodingError> {
        let mut core = lock_core(&self.core);
        let SessionCore { encoder, pacer } = &mut *core;
        let before = encoder.frames_written();
        let outcome = pacer.submit(plane, real_elapsed_secs, encoder)?;
        self.activity.touch();

        let after = encoder.frames_written();
        if after / PROGRESS_LOG_EVERY != before / PROGRESS_LOG_EVERY {
            let stats = pacer.stats();
            tracing::debug!(
                target: "mp4stream",
                "[PACER] {} frames written ({} new, {} duplicated, {} dropped)",
                after,
                stats.emitted + stats.passthrough,
                stats.duplicated,
                stats.dropped
            );
        }
        Ok(outcome)
    }

    /// Stops the watchdog, then closes the encoder and waits for it to exit.
    pub fn finalize(mut self) -> (SessionSummary, Result<(), EncodingError>) {
        self.watchdog.disarm();

        let mut core = lock_core(&self.core);
        let result = core.finalize();
        let stats = core.pacer.stats();
        let summary = SessionSummary {
            path: self.path.clone(),
            width: self.width,
            height: self.height,
            segment_index: self.segment_index,
            frames_written: core.encoder.frames_written(),
            new_frames: stats.emitted + stats.passthrough,
            duplicated: stats.duplicated,
            dropped: stats.dropped,
        };
        drop(core);

        tracing::info!(
            target: "mp4stream",
            "[SEGMENT] Finalized {:?}: {} frames ({} new, {} duplicated, {} dropped)",
            summary.path,
            summary.frames_written,
            summary.new_frames,
            summary.duplicated,
            summary.dropped
        );

        (summary, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    #[test]
    fn test_baseline_prefers_elapsed_metadata() {
        let now = Instant::now();
        let baseline = TimeBaseline::from_first_frame(FrameTimestamp::ElapsedMs(1500.0), now);
        assert_eq!(baseline, TimeBaseline::Elapsed { t0_ms: 1500.0 });
        assert_eq!(baseline.elapsed_secs(FrameTimestamp::ElapsedMs(4000.0), now), Some(2.5));
    }

    #[test]
    fn test_baseline_kind_is_fixed() {
        let now = Instant::now();
        let baseline = TimeBaseline::from_first_frame(FrameTimestamp::ElapsedMs(0.0), now);
        assert_eq!(baseline.elapsed_secs(FrameTimestamp::None, now), None);
        assert_eq!(
            baseline.elapsed_secs(FrameTimestamp::ReceivedAt(Utc::now()), now),
            None
        );
    }

    #[test]
    fn test_received_baseline() {
        let t0 = Utc::now();
        let baseline = TimeBaseline::from_first_frame(FrameTimestamp::ReceivedAt(t0), Instant::now());
        let later = t0 + ChronoDuration::milliseconds(250);
        assert_eq!(
            baseline.elapsed_secs(FrameTimestamp::ReceivedAt(later), Instant::now()),
            Some(0.25)
        );
    }

    #[test]
    fn test_wall_clock_fallback() {
        let t0 = Instant::now();
        let baseline = TimeBaseline::from_first_frame(FrameTimestamp::None, t0);
        let secs = baseline
            .elapsed_secs(FrameTimestamp::ElapsedMs(99.0), t0 + Duration::from_millis(500))
            .unwrap();
        assert!((secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_negative_elapsed_clamps_to_zero() {
        let now = Instant::now();
        let baseline = TimeBaseline::from_first_frame(FrameTimestamp::ElapsedMs(1000.0), now);
        assert_eq!(baseline.elapsed_secs(FrameTimestamp::ElapsedMs(200.0), now), Some(0.0));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_write_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let plan = SegmentPlan {
            path: dir.path().join("nested").join("out_4x2_seg000.mp4"),
            segment_index: 0,
            width: 4,
            height: 2,
            mode: PacingMode::ConstantRate { target_fps: 10.0 },
            argv: vec!["sh".into(), "-c".into(), "cat > /dev/null".into()],
        };
        let mut session = Session::open(
            plan,
            FrameTimestamp::ElapsedMs(0.0),
            Arc::new(AdaptiveTimeout::default()),
        )
        .unwrap();
        assert!(dir.path().join("nested").is_dir());

        for k in 0..3 {
            let t = session.elapsed_for(FrameTimestamp::ElapsedMs(k as f64 * 200.0));
            session.write(&[k as u8; 8], t).unwrap();
        }
        // Missing metadata reuses the last elapsed value.
        assert_eq!(session.elapsed_for(FrameTimestamp::None), 0.4);

        let (summary, result) = session.finalize();
        assert!(result.is_ok());
        assert_eq!(summary.new_frames, 3);
        assert_eq!(summary.duplicated, 2);
        assert_eq!(summary.frames_written, 5);
    }
}
