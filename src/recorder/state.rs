//! Pure state machine for the per-frame recording decision.
//!
//! `(RecorderPhase, RecorderEvent) -> (RecorderPhase, Vec<SideEffect>)`
//!
//! The coordinator gathers the facts for a frame, asks this module what to do,
//! and executes the returned side effects in order. No I/O happens here.

use super::types::StopEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderPhase {
    /// No output configured, host not recording, or the last open failed.
    #[default]
    Idle,
    /// A session exists at these dimensions.
    Active { width: u32, height: u32 },
}

impl RecorderPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, RecorderPhase::Active { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// A frame arrived. Carries everything the decision depends on.
    Frame {
        width: u32,
        height: u32,
        output_configured: bool,
        recording_allowed: bool,
        /// The current session's encoder was already closed (watchdog or stop handle).
        session_finalized: bool,
    },
    Stop(StopEvent),
    SessionOpenFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    FinalizeSession,
    OpenSession { width: u32, height: u32 },
    WriteFrame,
}

pub fn transition(phase: RecorderPhase, event: RecorderEvent) -> (RecorderPhase, Vec<SideEffect>) {
    match (phase, event) {
        // Nothing can be encoded from an empty frame
        (_, RecorderEvent::Frame { width: 0, .. }) | (_, RecorderEvent::Frame { height: 0, .. }) => {
            (phase, vec![])
        }

        // Recording not wanted: drop back to Idle
        (
            RecorderPhase::Active { .. },
            RecorderEvent::Frame {
                output_configured: false,
                ..
            }
            | RecorderEvent::Frame {
                recording_allowed: false,
                ..
            },
        ) => (RecorderPhase::Idle, vec![SideEffect::FinalizeSession]),
        (
            RecorderPhase::Idle,
            RecorderEvent::Frame {
                output_configured: false,
                ..
            }
            | RecorderEvent::Frame {
                recording_allowed: false,
                ..
            },
        ) => (RecorderPhase::Idle, vec![]),

        // Idle + allowed frame -> Active
        (RecorderPhase::Idle, RecorderEvent::Frame { width, height, .. }) => (
            RecorderPhase::Active { width, height },
            vec![
                SideEffect::OpenSession { width, height },
                SideEffect::WriteFrame,
            ],
        ),

        // Session closed underneath us, or resolution changed: new segment
        (
            RecorderPhase::Active {
                width: cur_w,
                height: cur_h,
            },
            RecorderEvent::Frame {
                width,
                height,
                session_finalized,
                ..
            },
        ) if session_finalized || (width, height) != (cur_w, cur_h) => (
            RecorderPhase::Active { width, height },
            vec![
                SideEffect::FinalizeSession,
                SideEffect::OpenSession { width, height },
                SideEffect::WriteFrame,
            ],
        ),

        (RecorderPhase::Active { .. }, RecorderEvent::Frame { .. }) => {
            (phase, vec![SideEffect::WriteFrame])
        }

        (RecorderPhase::Active { .. }, RecorderEvent::Stop(_)) => {
            (RecorderPhase::Idle, vec![SideEffect::FinalizeSession])
        }

        (_, RecorderEvent::SessionOpenFailed) => (RecorderPhase::Idle, vec![]),

        // Invalid transition: keep the phase, do nothing
        _ => (phase, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> RecorderEvent {
        RecorderEvent::Frame {
            width,
            height,
            output_configured: true,
            recording_allowed: true,
            session_finalized: false,
        }
    }

    fn active(width: u32, height: u32) -> RecorderPhase {
        RecorderPhase::Active { width, height }
    }

    #[test]
    fn test_idle_to_active_on_first_frame() {
        let (phase, effects) = transition(RecorderPhase::Idle, frame(640, 480));

        assert_eq!(phase, active(640, 480));
        assert_eq!(
            effects,
            vec![
                SideEffect::OpenSession {
                    width: 640,
                    height: 480
                },
                SideEffect::WriteFrame
            ]
        );
    }

    #[test]
    fn test_same_dimensions_just_write() {
        let (phase, effects) = transition(active(640, 480), frame(640, 480));

        assert_eq!(phase, active(640, 480));
        assert_eq!(effects, vec![SideEffect::WriteFrame]);
    }

    #[test]
    fn test_dimension_change_rotates_segment() {
        let (phase, effects) = transition(active(640, 480), frame(1280, 720));

        assert_eq!(phase, active(1280, 720));
        assert_eq!(effects.len(), 3);
        assert!(matches!(effects[0], SideEffect::FinalizeSession));
        assert!(matches!(
            effects[1],
            SideEffect::OpenSession {
                width: 1280,
                height: 720
            }
        ));
        assert!(matches!(effects[2], SideEffect::WriteFrame));
    }

    #[test]
    fn test_finalized_session_is_reopened() {
        let event = RecorderEvent::Frame {
            width: 640,
            height: 480,
            output_configured: true,
            recording_allowed: true,
            session_finalized: true,
        };
        let (phase, effects) = transition(active(640, 480), event);

        assert_eq!(phase, active(640, 480));
        assert_eq!(effects[0], SideEffect::FinalizeSession);
        assert!(effects
            .iter()
            .any(|e| matches!(e, SideEffect::OpenSession { .. })));
    }

    #[test]
    fn test_oracle_false_finalizes() {
        let event = RecorderEvent::Frame {
            width: 640,
            height: 480,
            output_configured: true,
            recording_allowed: false,
            session_finalized: false,
        };
        let (phase, effects) = transition(active(640, 480), event);

        assert_eq!(phase, RecorderPhase::Idle);
        assert_eq!(effects, vec![SideEffect::FinalizeSession]);
    }

    #[test]
    fn test_missing_output_keeps_idle() {
        let event = RecorderEvent::Frame {
            width: 640,
            height: 480,
            output_configured: false,
            recording_allowed: true,
            session_finalized: false,
        };
        let (phase, effects) = transition(RecorderPhase::Idle, event);

        assert_eq!(phase, RecorderPhase::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stop_event_finalizes() {
        let (phase, effects) =
            transition(active(64, 64), RecorderEvent::Stop(StopEvent::AcquisitionEnded));

        assert_eq!(phase, RecorderPhase::Idle);
        assert_eq!(effects, vec![SideEffect::FinalizeSession]);
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let (phase, effects) =
            transition(RecorderPhase::Idle, RecorderEvent::Stop(StopEvent::LiveStopped));

        assert_eq!(phase, RecorderPhase::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_open_failure_returns_to_idle() {
        let (phase, effects) = transition(active(64, 64), RecorderEvent::SessionOpenFailed);

        assert_eq!(phase, RecorderPhase::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_empty_frame_is_ignored() {
        let (phase, effects) = transition(active(64, 64), frame(0, 64));

        assert_eq!(phase, active(64, 64));
        assert!(effects.is_empty());
    }
}
