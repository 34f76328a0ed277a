use serde::{Deserialize, Serialize};

/// Snapshot of the capture service as seen by observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub connected: bool,
    pub streaming: bool,
    pub fps: f64,
    pub frames_produced: u64,
    pub error_message: Option<String>,
    pub message: String,
}

impl StreamStatus {
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// A status never claims to stream without a connection.
    pub fn is_consistent(&self) -> bool {
        self.connected || !self.streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_shape() {
        let status = StreamStatus {
            connected: true,
            streaming: true,
            fps: 29.5,
            frames_produced: 120,
            error_message: None,
            message: "Streaming".to_string(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["framesProduced"], 120);
        assert!(value["errorMessage"].is_null());
        assert!(status.is_consistent());
    }

    #[test]
    fn test_streaming_without_connection_is_inconsistent() {
        let status = StreamStatus {
            streaming: true,
            ..StreamStatus::disconnected("oops")
        };
        assert!(!status.is_consistent());
    }
}
