pub mod convert;
pub mod coordinator;
pub mod errors;
pub mod ffmpeg;
pub mod host;
pub mod overlay;
pub mod pacer;
pub mod session;
pub mod state;
pub mod types;
pub mod watchdog;
pub mod writer;

pub use coordinator::{RecordingCoordinator, StopHandle};
pub use errors::{EncodingError, RecorderError};
pub use host::HostContext;
pub use session::SessionSummary;
pub use types::{DisplayScaling, Frame, FrameTimestamp, PacingMode, RecordingMode, StopEvent};
