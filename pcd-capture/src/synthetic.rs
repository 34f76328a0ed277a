use std::time::{Duration, Instant};

use crate::error::{CaptureError, Result};
use crate::sensor::{
    CameraSpacePoint, ColorGrid, ColorSpacePoint, CoordinateMapper, DepthGrid, DepthSensor,
    Intrinsics, PinholeMapper,
};

/// A sensor that renders an animated surface. Useful without hardware.
pub struct SyntheticSensor {
    mapper: PinholeMapper,
    frame_interval: Duration,
    next_frame: Option<Instant>,
    tick: u64,
    open: bool,
}

impl SyntheticSensor {
    pub fn new(frame_rate: f64) -> Self {
        Self::with_mapper(PinholeMapper::default(), frame_rate)
    }

    pub fn with_mapper(mapper: PinholeMapper, frame_rate: f64) -> Self {
        let frame_interval = if frame_rate > 0.0 {
            Duration::from_secs_f64(1.0 / frame_rate)
        } else {
            Duration::ZERO
        };
        Self {
            mapper,
            frame_interval,
            next_frame: None,
            tick: 0,
            open: false,
        }
    }

    /// A small sensor for tests.
    pub fn small(width: usize, height: usize, frame_rate: f64) -> Self {
        let scale = width as f32 / Intrinsics::KINECT_V2_DEPTH.width as f32;
        let depth = Intrinsics {
            width,
            height,
            fx: Intrinsics::KINECT_V2_DEPTH.fx * scale,
            fy: Intrinsics::KINECT_V2_DEPTH.fy * scale,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        };
        let color = Intrinsics {
            width: width * 2,
            height: height * 2,
            fx: depth.fx * 2.0,
            fy: depth.fy * 2.0,
            cx: width as f32,
            cy: height as f32,
        };
        Self::with_mapper(
            PinholeMapper {
                depth,
                color,
                ..Default::default()
            },
            frame_rate,
        )
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(CaptureError::DeviceUnavailable(
                "synthetic sensor is closed".to_string(),
            ))
        }
    }

    fn render_depth(&self) -> DepthGrid {
        let Intrinsics { width, height, .. } = self.mapper.depth;
        let phase = self.tick as f32 * 0.15;
        let data = (0..width * height)
            .map(|i| {
                let (u, v) = ((i % width) as f32, (i / width) as f32);
                // sparse holes, as real sensors drop samples
                if (i as u64 + self.tick) % 97 == 0 {
                    return 0;
                }
                let wave = (u * 0.05 + phase).sin() * (v * 0.05).cos();
                (1800.0 + 400.0 * wave) as u16
            })
            .collect();
        DepthGrid::new(width, height, data)
    }

    fn render_color(&self) -> ColorGrid {
        let Intrinsics { width, height, .. } = self.mapper.color;
        let mut data = Vec::with_capacity(width * height * ColorGrid::BYTES_PER_PIXEL);
        for y in 0..height {
            for x in 0..width {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                let b = (self.tick % 256) as u8;
                data.extend_from_slice(&[b, g, r, 255]);
            }
        }
        ColorGrid::new(width, height, data)
    }
}

impl CoordinateMapper for SyntheticSensor {
    fn depth_to_camera(&self, depth: &DepthGrid) -> Vec<CameraSpacePoint> {
        self.mapper.depth_to_camera(depth)
    }

    fn depth_to_color(&self, depth: &DepthGrid) -> Vec<ColorSpacePoint> {
        self.mapper.depth_to_color(depth)
    }
}

impl DepthSensor for SyntheticSensor {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        self.next_frame = None;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read_depth(&mut self, timeout: Duration) -> Result<Option<DepthGrid>> {
        self.ensure_open()?;
        let now = Instant::now();
        let due = self.next_frame.unwrap_or(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }
        self.next_frame = Some(due.max(now) + self.frame_interval);
        let grid = self.render_depth();
        self.tick += 1;
        Ok(Some(grid))
    }

    fn read_color(&mut self, _timeout: Duration) -> Result<Option<ColorGrid>> {
        self.ensure_open()?;
        Ok(Some(self.render_color()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_sensor_is_unavailable() {
        let mut sensor = SyntheticSensor::small(8, 6, 0.0);
        assert!(matches!(
            sensor.read_depth(Duration::ZERO),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_frames_have_holes_and_valid_depths() {
        let mut sensor = SyntheticSensor::small(32, 24, 0.0);
        sensor.open().unwrap();
        let depth = sensor.read_depth(Duration::ZERO).unwrap().unwrap();
        assert!(depth.is_well_formed());
        assert!(depth.data.iter().any(|&d| d == 0));
        assert!(depth.data.iter().filter(|&&d| d != 0).all(|&d| (1400..=2200).contains(&d)));

        let color = sensor.read_color(Duration::ZERO).unwrap().unwrap();
        assert!(color.is_well_formed());
    }
}
