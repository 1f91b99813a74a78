//! RecordingCoordinator - single owner of the recording lifecycle.
//!
//! The host pushes every frame through [`RecordingCoordinator::process_frame`].
//! The coordinator gathers the facts for that frame (settings, host oracle,
//! session liveness), runs the pure state machine and executes the returned
//! side effects:
//!
//! - `FinalizeSession`: disarm the watchdog, close the encoder, wait for exit
//! - `OpenSession`: pick a free segment name, spawn the encoder, arm the watchdog
//! - `WriteFrame`: convert -> overlay -> pace -> write
//!
//! Stop events can arrive from any thread through a [`StopHandle`]. The handle
//! queues the event and closes the live encoder right away, so the coordinator
//! returns to `Idle` on its next call.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use super::convert::convert_into;
use super::errors::{EncodingError, RecorderError};
use super::ffmpeg::{build_encoder_argv, next_free_segment, resolve_encoder_program};
use super::host::{sanitized_exposure, HostContext};
use super::overlay::OverlayCompositor;
use super::session::{lock_core, SegmentPlan, Session, SessionSummary, SharedCore};
use super::state::{transition, RecorderEvent, RecorderPhase, SideEffect};
use super::types::{Frame, StopEvent};
use super::watchdog::{AdaptiveTimeout, TimeoutPolicy};
use crate::settings::{RecorderSettings, SettingsProvider};

type LiveSlot = Arc<Mutex<Option<SharedCore>>>;

fn lock_slot(slot: &LiveSlot) -> MutexGuard<'_, Option<SharedCore>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delivers host stop events from any thread.
#[derive(Clone)]
pub struct StopHandle {
    tx: Sender<StopEvent>,
    live: LiveSlot,
}

impl StopHandle {
    /// Queues `event` for the coordinator and finalizes the live encoder immediately.
    ///
    /// The event is queued before the encoder closes, so a frame that finds the
    /// encoder closed also finds the event.
    pub fn signal(&self, event: StopEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(target: "mp4stream", "[COORDINATOR] Coordinator gone, ignoring {:?}", event);
            return;
        }
        let core = lock_slot(&self.live).clone();
        if let Some(core) = core {
            tracing::info!(target: "mp4stream", "[COORDINATOR] {:?}, finalizing encoder", event);
            if let Err(e) = lock_core(&core).finalize() {
                tracing::warn!(target: "mp4stream", "[COORDINATOR] Finalize on stop failed: {}", e);
            }
        }
    }
}

/// Per-frame inputs that open/write effects need.
struct FrameContext<'a> {
    frame: &'a Frame,
    settings: RecorderSettings,
}

pub struct RecordingCoordinator {
    host: Arc<dyn HostContext>,
    settings: Arc<dyn SettingsProvider>,
    phase: RecorderPhase,
    session: Option<Session>,
    segment_counter: u32,
    timeout: Arc<AdaptiveTimeout>,
    overlay: OverlayCompositor,
    plane: Vec<u8>,
    stop_tx: Sender<StopEvent>,
    stop_rx: Receiver<StopEvent>,
    live: LiveSlot,
    last_error: Option<RecorderError>,
    error_count: u64,
    last_summary: Option<SessionSummary>,
}

impl RecordingCoordinator {
    pub fn new(host: Arc<dyn HostContext>, settings: Arc<dyn SettingsProvider>) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
        Self {
            host,
            settings,
            phase: RecorderPhase::Idle,
            session: None,
            segment_counter: 0,
            timeout: Arc::new(AdaptiveTimeout::default()),
            overlay: OverlayCompositor::default(),
            plane: Vec::new(),
            stop_tx,
            stop_rx,
            live: Arc::new(Mutex::new(None)),
            last_error: None,
            error_count: 0,
            last_summary: None,
        }
    }

    /// Replaces the watchdog timeout constants. Affects sessions opened afterwards.
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Arc::new(AdaptiveTimeout::new(policy));
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
            live: self.live.clone(),
        }
    }

    pub fn phase(&self) -> RecorderPhase {
        self.phase
    }

    pub fn current_segment(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path())
    }

    /// Index the next segment search starts from.
    pub fn segment_counter(&self) -> u32 {
        self.segment_counter
    }

    pub fn last_error(&self) -> Option<&RecorderError> {
        self.last_error.as_ref()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    pub fn watchdog_timeout(&self) -> Duration {
        self.timeout.current()
    }

    /// Records `frame` if recording is active and hands it back unchanged.
    ///
    /// Never fails: errors are logged and kept in [`last_error`](Self::last_error).
    /// A frame that picks up a queued stop for an active session is not recorded;
    /// recording resumes on the following frame if the host still allows it.
    pub fn process_frame(&mut self, frame: Frame) -> Frame {
        if self.apply_pending_stops() {
            return frame;
        }

        if let Err(e) = self.handle_frame(&frame) {
            self.record_error(e);
        }
        frame
    }

    /// Finalizes the active session for an explicit host stop.
    pub fn on_stop_event(&mut self, event: StopEvent) {
        if self.phase.is_active() {
            tracing::info!(target: "mp4stream", "[COORDINATOR] Stop event: {:?}", event);
        }
        if let Err(e) = self.dispatch(RecorderEvent::Stop(event), None) {
            self.record_error(e);
        }
    }

    /// Drains queued stop events. Returns `true` if one ended an active session.
    fn apply_pending_stops(&mut self) -> bool {
        let mut stopped = false;
        while let Ok(event) = self.stop_rx.try_recv() {
            stopped |= self.phase.is_active();
            self.on_stop_event(event);
        }
        stopped
    }

    /// Finalizes any session and returns to `Idle`.
    pub fn shutdown(&mut self) {
        if self.session.is_some() {
            tracing::info!(target: "mp4stream", "[COORDINATOR] Shutting down");
        }
        self.finalize_session();
        self.phase = RecorderPhase::Idle;
    }

    fn handle_frame(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        self.timeout.refresh(sanitized_exposure(self.host.as_ref()));

        let settings = RecorderSettings::resolve(self.settings.as_ref());
        self.overlay.set_style(settings.overlay);

        let session_finalized = self.session.as_ref().is_some_and(|s| s.is_finalized());
        // A stop handle may have closed the encoder after the queue was last drained.
        if session_finalized && self.apply_pending_stops() {
            return Ok(());
        }

        let event = RecorderEvent::Frame {
            width: frame.width,
            height: frame.height,
            output_configured: settings.output_path.is_some(),
            recording_allowed: self.host.is_recording_allowed(),
            session_finalized,
        };

        self.dispatch(event, Some(FrameContext { frame, settings }))
    }

    fn dispatch(
        &mut self,
        event: RecorderEvent,
        ctx: Option<FrameContext<'_>>,
    ) -> Result<(), RecorderError> {
        let (phase, effects) = transition(self.phase, event);
        self.phase = phase;

        for effect in effects {
            match (effect, ctx.as_ref()) {
                (SideEffect::FinalizeSession, _) => self.finalize_session(),
                (SideEffect::OpenSession { width, height }, Some(ctx)) => {
                    if let Err(e) = self.open_session(ctx, width, height) {
                        tracing::error!(target: "mp4stream", "[COORDINATOR] Failed to open session: {}", e);
                        let (phase, _) = transition(self.phase, RecorderEvent::SessionOpenFailed);
                        self.phase = phase;
                        return Err(e);
                    }
                }
                (SideEffect::WriteFrame, Some(ctx)) => self.write_frame(ctx.frame)?,
                (effect, None) => {
                    tracing::debug!(target: "mp4stream", "[COORDINATOR] Skipping {:?} without a frame", effect);
                }
            }
        }
        Ok(())
    }

    fn open_session(
        &mut self,
        ctx: &FrameContext<'_>,
        width: u32,
        height: u32,
    ) -> Result<(), RecorderError> {
        let Some(base) = ctx.settings.output_path.as_deref() else {
            return Ok(());
        };

        let (segment_index, path) = next_free_segment(base, width, height, self.segment_counter);
        let program = resolve_encoder_program(Some(&ctx.settings.ffmpeg_path));
        let argv = build_encoder_argv(&program, width, height, ctx.settings.declared_fps(), &path);

        let plan = SegmentPlan {
            path,
            segment_index,
            width,
            height,
            mode: ctx.settings.pacing_mode(),
            argv,
        };
        let session = Session::open(plan, ctx.frame.timestamp, self.timeout.clone())?;

        self.segment_counter = segment_index.saturating_add(1);
        *lock_slot(&self.live) = Some(session.shared_core());
        self.session = Some(session);
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let scaling = self.host.display_scaling(frame);
        convert_into(frame, scaling, &mut self.plane);

        let elapsed = session.elapsed_for(frame.timestamp);
        self.overlay.stamp(&mut self.plane, frame.width, frame.height, elapsed);

        match session.write(&self.plane, elapsed) {
            Ok(_) => Ok(()),
            // Closed by the watchdog or a stop handle between the liveness check and the write.
            Err(EncodingError::Closed) => {
                tracing::debug!(target: "mp4stream", "[COORDINATOR] Encoder closed mid-frame, frame not recorded");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finalize_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        lock_slot(&self.live).take();

        let (summary, result) = session.finalize();
        if let Err(e) = result {
            self.record_error(e.into());
        }
        self.last_summary = Some(summary);
    }

    fn record_error(&mut self, error: RecorderError) {
        tracing::warn!(target: "mp4stream", "[COORDINATOR] {}", error);
        self.error_count += 1;
        self.last_error = Some(error);
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
