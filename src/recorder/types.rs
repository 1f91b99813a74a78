use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const ENCODING_CRF: &str = "18";
pub const ENCODING_PRESET: &str = "veryfast";
pub const ENCODING_CODEC: &str = "libx264";
pub const OUTPUT_PIX_FMT: &str = "yuv420p";

/// Raw samples of a single-channel acquisition.
#[derive(Clone, Debug)]
pub enum Samples {
    /// One byte per pixel.
    Gray8(Arc<[u8]>),
    /// Two bytes per pixel, already decoded to native `u16`.
    Gray16(Arc<[u16]>),
    /// Any other depth. Converted to an all-black plane.
    Raw {
        bytes_per_pixel: usize,
        data: Arc<[u8]>,
    },
}

/// Timestamp metadata attached to a frame by the host.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum FrameTimestamp {
    /// Milliseconds since the acquisition started.
    ElapsedMs(f64),
    /// Wall-clock instant at which the host received the frame.
    ReceivedAt(DateTime<Utc>),
    #[default]
    None,
}

/// Immutable view of one camera acquisition.
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub samples: Samples,
    pub timestamp: FrameTimestamp,
}

impl Frame {
    pub fn gray8(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            samples: Samples::Gray8(data.into()),
            timestamp: FrameTimestamp::None,
        }
    }

    pub fn gray16(width: u32, height: u32, data: impl Into<Arc<[u16]>>) -> Self {
        Self {
            width,
            height,
            samples: Samples::Gray16(data.into()),
            timestamp: FrameTimestamp::None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: FrameTimestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Display-scaling triple mirroring what a live preview shows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayScaling {
    pub min: f64,
    pub max: f64,
    pub gamma: f64,
}

impl DisplayScaling {
    pub fn new(min: f64, max: f64, gamma: f64) -> Self {
        Self { min, max, gamma }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.max > self.min && self.gamma > 0.0
    }
}

/// Recording mode as selected by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    #[default]
    ConstantFps,
    Realtime,
    Timelapse,
}

impl RecordingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingMode::ConstantFps => "constant_fps",
            RecordingMode::Realtime => "realtime",
            RecordingMode::Timelapse => "timelapse",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        parse_setting(value)
    }
}

/// How incoming frames are mapped onto output ticks. Fixed for a session's lifetime.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PacingMode {
    ConstantRate { target_fps: f64 },
    Passthrough,
    TimeLapse { target_fps: f64, factor: f64 },
}

impl PacingMode {
    pub fn from_settings(mode: RecordingMode, target_fps: f64, factor: f64) -> Self {
        match mode {
            RecordingMode::ConstantFps => PacingMode::ConstantRate { target_fps },
            RecordingMode::Realtime => PacingMode::Passthrough,
            RecordingMode::Timelapse => PacingMode::TimeLapse { target_fps, factor },
        }
    }

    /// Seconds on the output timeline for a given real elapsed time.
    pub fn framing_seconds(&self, real_elapsed_secs: f64) -> f64 {
        match self {
            PacingMode::TimeLapse { factor, .. } => real_elapsed_secs * factor,
            _ => real_elapsed_secs,
        }
    }

    pub fn target_fps(&self) -> Option<f64> {
        match self {
            PacingMode::ConstantRate { target_fps } | PacingMode::TimeLapse { target_fps, .. } => {
                Some(*target_fps)
            }
            PacingMode::Passthrough => None,
        }
    }
}

/// Fill colour of the elapsed-time label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelColor {
    #[default]
    White,
    Black,
}

impl LabelColor {
    pub fn parse(value: &str) -> Option<Self> {
        parse_setting(value)
    }

    pub fn fill(&self) -> u8 {
        match self {
            LabelColor::White => 255,
            LabelColor::Black => 0,
        }
    }

    pub fn outline(&self) -> u8 {
        255 - self.fill()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayStyle {
    pub enabled: bool,
    pub color: LabelColor,
    pub background: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            enabled: true,
            color: LabelColor::White,
            background: true,
        }
    }
}

/// Case-insensitive lookup of a settings string against the serde variant names.
fn parse_setting<T: DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase())).ok()
}

/// External stop signals from the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopEvent {
    LiveStopped,
    AcquisitionEnded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_mode_parse() {
        assert_eq!(RecordingMode::parse("timelapse"), Some(RecordingMode::Timelapse));
        assert_eq!(RecordingMode::parse(" Realtime "), Some(RecordingMode::Realtime));
        assert_eq!(RecordingMode::parse("constant_fps"), Some(RecordingMode::ConstantFps));
        assert_eq!(RecordingMode::parse("slowmo"), None);
    }

    #[test]
    fn test_label_color_parse() {
        assert_eq!(LabelColor::parse("BLACK"), Some(LabelColor::Black));
        assert_eq!(LabelColor::parse("white"), Some(LabelColor::White));
        assert_eq!(LabelColor::parse(""), None);
    }

    #[test]
    fn test_timelapse_framing_is_scaled() {
        let mode = PacingMode::TimeLapse {
            target_fps: 30.0,
            factor: 10.0,
        };
        assert_eq!(mode.framing_seconds(1.5), 15.0);
        assert_eq!(PacingMode::Passthrough.framing_seconds(1.5), 1.5);
    }

    #[test]
    fn test_display_scaling_validity() {
        assert!(DisplayScaling::new(0.0, 255.0, 1.0).is_valid());
        assert!(!DisplayScaling::new(10.0, 10.0, 1.0).is_valid());
        assert!(!DisplayScaling::new(0.0, 100.0, 0.0).is_valid());
        assert!(!DisplayScaling::new(0.0, f64::NAN, 1.0).is_valid());
    }
}
