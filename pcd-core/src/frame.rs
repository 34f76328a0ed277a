use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("point buffer length {0} is not a multiple of 3")]
    RaggedPoints(usize),

    #[error("{points} point floats do not match {colors} color bytes")]
    Misaligned { points: usize, colors: usize },

    #[error("declared point count {declared} does not match payload ({actual})")]
    CountMismatch { declared: usize, actual: usize },

    #[error("invalid base64 color payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One captured point cloud. The point and color buffers are flattened
/// triples and always describe the same number of points.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudFrame {
    timestamp: DateTime<Utc>,
    points: Vec<f32>,
    colors: Vec<u8>,
    frame_number: u64,
}

impl PointCloudFrame {
    pub fn new(
        timestamp: DateTime<Utc>,
        points: Vec<f32>,
        colors: Vec<u8>,
        frame_number: u64,
    ) -> Result<Self, FrameError> {
        if points.len() % 3 != 0 {
            return Err(FrameError::RaggedPoints(points.len()));
        }
        if points.len() != colors.len() {
            return Err(FrameError::Misaligned {
                points: points.len(),
                colors: colors.len(),
            });
        }
        Ok(Self {
            timestamp,
            points,
            colors,
            frame_number,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn points(&self) -> &[f32] {
        &self.points
    }

    pub fn colors(&self) -> &[u8] {
        &self.colors
    }

    pub fn point_count(&self) -> usize {
        self.points.len() / 3
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Same payload under a different sequence number.
    pub fn renumbered(self, frame_number: u64) -> Self {
        Self {
            frame_number,
            ..self
        }
    }

    pub fn to_message(&self, encoding: ColorEncoding) -> FrameMessage {
        let colors = match encoding {
            ColorEncoding::Raw => WireColors::Raw(self.colors.clone()),
            ColorEncoding::Base64 => WireColors::Base64(STANDARD.encode(&self.colors)),
        };
        FrameMessage {
            timestamp: self.timestamp,
            points: self.points.clone(),
            colors,
            point_count: self.point_count(),
            frame_number: self.frame_number,
        }
    }
}

impl TryFrom<FrameMessage> for PointCloudFrame {
    type Error = FrameError;

    fn try_from(message: FrameMessage) -> Result<Self, Self::Error> {
        let colors = message.colors.decode()?;
        let frame = PointCloudFrame::new(
            message.timestamp,
            message.points,
            colors,
            message.frame_number,
        )?;
        if frame.point_count() != message.point_count {
            return Err(FrameError::CountMismatch {
                declared: message.point_count,
                actual: frame.point_count(),
            });
        }
        Ok(frame)
    }
}

/// Colors travel either as a JSON byte array or as a base64 string; the
/// variant is picked from the JSON type on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireColors {
    Raw(Vec<u8>),
    Base64(String),
}

impl WireColors {
    pub fn decode(self) -> Result<Vec<u8>, FrameError> {
        match self {
            WireColors::Raw(bytes) => Ok(bytes),
            WireColors::Base64(text) => Ok(STANDARD.decode(text.as_bytes())?),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorEncoding {
    Raw,
    #[default]
    Base64,
}

impl FromStr for ColorEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(ColorEncoding::Raw),
            "base64" => Ok(ColorEncoding::Base64),
            other => Err(format!("unknown color encoding '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMessage {
    pub timestamp: DateTime<Utc>,
    pub points: Vec<f32>,
    pub colors: WireColors,
    pub point_count: usize,
    pub frame_number: u64,
}
