use crate::service::CaptureState;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no depth sensor found")]
    NoDevice,

    #[error("depth sensor unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture bridge unreachable at {url}: {reason}")]
    BridgeUnreachable { url: String, reason: String },

    #[error("capture bridge reachable but sensor not ready: {0}")]
    SensorNotReady(String),

    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: CaptureState,
        action: &'static str,
    },

    #[error("frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("transient capture failure: {0}")]
    Transient(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid frame payload: {0}")]
    Decode(String),
}

impl CaptureError {
    /// Failures the streaming loop backs off from and retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceUnavailable(_)
                | CaptureError::BridgeUnreachable { .. }
                | CaptureError::SensorNotReady(_)
                | CaptureError::Transient(_)
                | CaptureError::Http(_)
        )
    }

    /// Failures confined to a single frame.
    pub fn drops_frame(&self) -> bool {
        matches!(
            self,
            CaptureError::FrameProcessing(_) | CaptureError::Decode(_)
        )
    }
}

impl From<pcd_core::FrameError> for CaptureError {
    fn from(err: pcd_core::FrameError) -> Self {
        CaptureError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
