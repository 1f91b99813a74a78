use super::types::{DisplayScaling, Frame};

/// Queries the recorder makes against the host application.
///
/// Implementations are called from the frame-ingest thread once per frame and
/// must be cheap.
pub trait HostContext: Send + Sync {
    /// Whether the host is currently live-streaming or acquiring.
    fn is_recording_allowed(&self) -> bool;

    /// Current camera exposure in milliseconds, if known.
    fn exposure_ms(&self) -> Option<f64> {
        None
    }

    /// Display scaling currently applied to `frame` in the live preview.
    fn display_scaling(&self, _frame: &Frame) -> Option<DisplayScaling> {
        None
    }
}

/// Valid exposure readings only: finite and non-negative.
pub(crate) fn sanitized_exposure(host: &dyn HostContext) -> Option<f64> {
    host.exposure_ms().filter(|e| e.is_finite() && *e >= 0.0)
}
