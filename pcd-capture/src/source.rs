use std::time::Duration;

use pcd_core::PointCloudFrame;

use crate::error::Result;
use crate::processor::{ColorMode, FrameProcessor};
use crate::sensor::DepthSensor;

/// Where the capture service gets its frames from.
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self);

    /// Called at the start of each streaming session.
    fn reset_session(&mut self);

    /// Next frame, or `None` if nothing new arrived within `timeout`.
    fn poll(&mut self, timeout: Duration) -> Result<Option<PointCloudFrame>>;

    /// Periodic health check while streaming.
    fn probe(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Frames computed locally from an attached sensor.
pub struct SensorSource<S: DepthSensor> {
    sensor: S,
    processor: FrameProcessor,
    open: bool,
}

impl<S: DepthSensor> SensorSource<S> {
    pub fn new(sensor: S, processor: FrameProcessor) -> Self {
        Self {
            sensor,
            processor,
            open: false,
        }
    }
}

impl<S: DepthSensor> FrameSource for SensorSource<S> {
    fn describe(&self) -> String {
        format!("sensor {}", self.sensor.name())
    }

    fn connect(&mut self) -> Result<()> {
        if !self.open {
            self.sensor.open()?;
            self.open = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.open {
            self.sensor.close();
            self.open = false;
        }
    }

    fn reset_session(&mut self) {
        self.processor.reset_sequence();
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<PointCloudFrame>> {
        let Some(depth) = self.sensor.read_depth(timeout)? else {
            return Ok(None);
        };
        let color = match self.processor.config().color_mode {
            ColorMode::Rgb => self.sensor.read_color(timeout)?,
            ColorMode::DepthGradient => None,
        };
        self.processor
            .process(&self.sensor, &depth, color.as_ref())
            .map(Some)
    }
}
