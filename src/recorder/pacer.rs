//! Frame pacing: maps irregular input frames onto output ticks.
//!
//! In constant-rate and time-lapse modes each output tick receives at most one
//! decision. Ticks that no input frame landed on are back-filled with the most
//! recent frame seen, and input arriving faster than the target rate is dropped
//! from output while still refreshing that back-fill candidate. Pass-through
//! mode writes every input frame exactly once.

use super::errors::EncodingError;
use super::types::PacingMode;
use super::writer::FrameSink;

/// Guards `floor` against `k / fps * fps` landing just below an integer.
const TICK_EPSILON: f64 = 1e-9;

/// What happened to one submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PacingOutcome {
    /// Copies of the previous frame written to fill a gap.
    pub duplicated: u64,
    /// Whether the submitted frame itself was written.
    pub emitted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PacingStats {
    pub emitted: u64,
    pub duplicated: u64,
    pub dropped: u64,
    pub passthrough: u64,
}

impl PacingStats {
    pub fn total_written(&self) -> u64 {
        self.emitted + self.duplicated + self.passthrough
    }
}

pub struct FramePacer {
    mode: PacingMode,
    next_output_index: u64,
    last_emitted: Vec<u8>,
    have_last_emitted: bool,
    vfr_frame_count: u64,
    stats: PacingStats,
}

impl FramePacer {
    pub fn new(mode: PacingMode) -> Self {
        Self {
            mode,
            next_output_index: 0,
            last_emitted: Vec::new(),
            have_last_emitted: false,
            vfr_frame_count: 0,
            stats: PacingStats::default(),
        }
    }

    pub fn next_output_index(&self) -> u64 {
        self.next_output_index
    }

    pub fn vfr_frame_count(&self) -> u64 {
        self.vfr_frame_count
    }

    pub fn stats(&self) -> PacingStats {
        self.stats
    }

    /// Output tick for a frame observed `real_elapsed_secs` after session start.
    /// `None` in pass-through mode.
    pub fn target_index(&self, real_elapsed_secs: f64) -> Option<u64> {
        let fps = self.mode.target_fps()?;
        let framing = self.mode.framing_seconds(real_elapsed_secs.max(0.0));
        Some((framing * fps + TICK_EPSILON).floor().max(0.0) as u64)
    }

    /// Paces one already-overlaid plane into `sink`.
    ///
    /// Counters only advance for frames the sink accepted, so a failed write
    /// leaves the pacer consistent with what actually reached the encoder.
    pub fn submit<S: FrameSink>(
        &mut self,
        plane: &[u8],
        real_elapsed_secs: f64,
        sink: &mut S,
    ) -> Result<PacingOutcome, EncodingError> {
        if self.last_emitted.len() != plane.len() {
            self.last_emitted = vec![0; plane.len()];
            self.have_last_emitted = false;
        }

        let Some(target) = self.target_index(real_elapsed_secs) else {
            sink.write_frame(plane)?;
            self.vfr_frame_count += 1;
            self.stats.passthrough += 1;
            self.remember(plane);
            return Ok(PacingOutcome {
                duplicated: 0,
                emitted: true,
            });
        };

        let mut outcome = PacingOutcome::default();

        if self.have_last_emitted {
            while self.next_output_index < target {
                sink.write_frame(&self.last_emitted)?;
                self.next_output_index += 1;
                self.stats.duplicated += 1;
                outcome.duplicated += 1;
            }
        } else {
            self.next_output_index = target;
        }

        if self.next_output_index == target {
            sink.write_frame(plane)?;
            self.next_output_index += 1;
            self.stats.emitted += 1;
            outcome.emitted = true;
        } else {
            self.stats.dropped += 1;
        }

        self.remember(plane);
        Ok(outcome)
    }

    fn remember(&mut self, plane: &[u8]) {
        self.last_emitted.copy_from_slice(plane);
        self.have_last_emitted = true;
    }
}
