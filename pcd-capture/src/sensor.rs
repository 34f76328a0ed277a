use std::time::Duration;

use rayon::prelude::*;

use crate::error::Result;

/// Millimeter depth samples in row-major order. Zero marks a missing sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthGrid {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>,
}

impl DepthGrid {
    pub fn new(width: usize, height: usize, data: Vec<u16>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.len()
    }
}

/// BGRA color pixels in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorGrid {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl ColorGrid {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width * self.height * Self::BYTES_PER_PIXEL
    }

    /// RGB at integer pixel coordinates, `None` outside the image.
    pub fn rgb_at(&self, x: i64, y: i64) -> Option<[u8; 3]> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        let offset = (y as usize * self.width + x as usize) * Self::BYTES_PER_PIXEL;
        let bgra = self.data.get(offset..offset + Self::BYTES_PER_PIXEL)?;
        Some([bgra[2], bgra[1], bgra[0]])
    }
}

/// Metric 3D position in the depth camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSpacePoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl CameraSpacePoint {
    pub const INVALID: Self = Self {
        x: f32::NEG_INFINITY,
        y: f32::NEG_INFINITY,
        z: f32::NEG_INFINITY,
    };

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Pixel position in the color image. May fall outside the image bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSpacePoint {
    pub x: f32,
    pub y: f32,
}

impl ColorSpacePoint {
    pub const INVALID: Self = Self {
        x: f32::NEG_INFINITY,
        y: f32::NEG_INFINITY,
    };

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Projects a depth grid into camera space and color-image space.
/// Both outputs have one entry per depth sample; invalid samples map to
/// non-finite coordinates.
pub trait CoordinateMapper {
    fn depth_to_camera(&self, depth: &DepthGrid) -> Vec<CameraSpacePoint>;
    fn depth_to_color(&self, depth: &DepthGrid) -> Vec<ColorSpacePoint>;
}

/// A device producing depth and color frames.
pub trait DepthSensor: CoordinateMapper + Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    /// Waits up to `timeout` for the next depth frame.
    fn read_depth(&mut self, timeout: Duration) -> Result<Option<DepthGrid>>;

    /// The most recent color frame, waiting up to `timeout` if none is buffered.
    fn read_color(&mut self, timeout: Duration) -> Result<Option<ColorGrid>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub width: usize,
    pub height: usize,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub const KINECT_V2_DEPTH: Self = Self {
        width: 512,
        height: 424,
        fx: 365.456,
        fy: 365.456,
        cx: 254.878,
        cy: 205.395,
    };

    pub const KINECT_V2_COLOR: Self = Self {
        width: 1920,
        height: 1080,
        fx: 1081.372,
        fy: 1081.372,
        cx: 959.5,
        cy: 539.5,
    };
}

/// Pinhole model for a depth camera with a horizontally offset color camera.
/// Camera space is right-handed with +Y up and +Z away from the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeMapper {
    pub depth: Intrinsics,
    pub color: Intrinsics,
    /// Color camera offset along +X, meters.
    pub baseline: f32,
    /// Samples deeper than this are treated as invalid.
    pub max_depth_mm: u16,
}

impl Default for PinholeMapper {
    fn default() -> Self {
        Self {
            depth: Intrinsics::KINECT_V2_DEPTH,
            color: Intrinsics::KINECT_V2_COLOR,
            baseline: 0.052,
            max_depth_mm: 8000,
        }
    }
}

impl PinholeMapper {
    fn unproject(&self, width: usize, index: usize, depth_mm: u16) -> CameraSpacePoint {
        if depth_mm == 0 || depth_mm > self.max_depth_mm || width == 0 {
            return CameraSpacePoint::INVALID;
        }
        let u = (index % width) as f32;
        let v = (index / width) as f32;
        let z = depth_mm as f32 / 1000.0;
        CameraSpacePoint {
            x: (u - self.depth.cx) * z / self.depth.fx,
            y: (self.depth.cy - v) * z / self.depth.fy,
            z,
        }
    }

    fn project_to_color(&self, p: CameraSpacePoint) -> ColorSpacePoint {
        if !p.is_finite() || p.z <= 0.0 {
            return ColorSpacePoint::INVALID;
        }
        let x = p.x - self.baseline;
        ColorSpacePoint {
            x: x * self.color.fx / p.z + self.color.cx,
            y: self.color.cy - p.y * self.color.fy / p.z,
        }
    }
}

impl CoordinateMapper for PinholeMapper {
    fn depth_to_camera(&self, depth: &DepthGrid) -> Vec<CameraSpacePoint> {
        depth
            .data
            .par_iter()
            .enumerate()
            .map(|(i, &d)| self.unproject(depth.width, i, d))
            .collect()
    }

    fn depth_to_color(&self, depth: &DepthGrid) -> Vec<ColorSpacePoint> {
        depth
            .data
            .par_iter()
            .enumerate()
            .map(|(i, &d)| self.project_to_color(self.unproject(depth.width, i, d)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_and_far_samples_are_invalid() {
        let mapper = PinholeMapper::default();
        let grid = DepthGrid::new(3, 1, vec![0, 1000, 9000]);
        let camera = mapper.depth_to_camera(&grid);
        assert_eq!(camera.len(), 3);
        assert!(!camera[0].is_finite());
        assert!(camera[1].is_finite());
        assert!(!camera[2].is_finite());

        let color = mapper.depth_to_color(&grid);
        assert!(!color[0].is_finite());
        assert!(color[1].is_finite());
    }

    #[test]
    fn test_principal_point_unprojects_to_axis() {
        let mapper = PinholeMapper {
            depth: Intrinsics {
                width: 3,
                height: 3,
                fx: 2.0,
                fy: 2.0,
                cx: 1.0,
                cy: 1.0,
            },
            ..Default::default()
        };
        let grid = DepthGrid::new(3, 3, vec![2000; 9]);
        let camera = mapper.depth_to_camera(&grid);
        assert_eq!(camera[4], CameraSpacePoint { x: 0.0, y: 0.0, z: 2.0 });
        // top-left pixel sits left of and above the axis
        assert!(camera[0].x < 0.0 && camera[0].y > 0.0);
    }

    #[test]
    fn test_rgb_at_reorders_bgra() {
        let grid = ColorGrid::new(2, 1, vec![10, 20, 30, 255, 40, 50, 60, 255]);
        assert_eq!(grid.rgb_at(0, 0), Some([30, 20, 10]));
        assert_eq!(grid.rgb_at(1, 0), Some([60, 50, 40]));
        assert_eq!(grid.rgb_at(2, 0), None);
        assert_eq!(grid.rgb_at(-1, 0), None);
        assert_eq!(grid.rgb_at(0, 1), None);
    }
}
