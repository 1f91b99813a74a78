pub mod logging;
pub mod recorder;
pub mod settings;
pub mod shared;

pub use recorder::{
    DisplayScaling, EncodingError, Frame, FrameTimestamp, HostContext, PacingMode, RecorderError,
    RecordingCoordinator, RecordingMode, SessionSummary, StopEvent, StopHandle,
};
pub use settings::{JsonPreferenceStore, LayeredSettings, MapSettings, RecorderSettings, SettingsProvider};
