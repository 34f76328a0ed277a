use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use pcd_core::PointCloudFrame;
use rayon::prelude::*;

use crate::error::{CaptureError, Result};
use crate::sensor::{CameraSpacePoint, ColorGrid, ColorSpacePoint, CoordinateMapper, DepthGrid};

/// Stand-in for points whose color pixel falls outside the color image.
pub const FALLBACK_GRAY: [u8; 3] = [128, 128, 128];

/// Near to far: cyan, blue, purple, red.
const GRADIENT_STOPS: [[f32; 3]; 4] = [
    [0.0, 255.0, 255.0],
    [0.0, 0.0, 255.0],
    [128.0, 0.0, 128.0],
    [255.0, 0.0, 0.0],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Sample the registered color image.
    #[default]
    Rgb,
    /// Tint by normalized depth.
    DepthGradient,
}

impl std::str::FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rgb" => Ok(ColorMode::Rgb),
            "depth" | "gradient" => Ok(ColorMode::DepthGradient),
            other => Err(format!("unknown color mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Keep every Nth depth sample.
    pub density: usize,
    pub color_mode: ColorMode,
    /// Nominal valid depth range used for gradient normalization.
    pub min_depth_mm: u16,
    pub max_depth_mm: u16,
    pub workers: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            density: 1,
            color_mode: ColorMode::default(),
            min_depth_mm: 0,
            max_depth_mm: 8000,
            workers: num_cpus::get(),
        }
    }
}

impl CaptureConfig {
    pub fn with_density(mut self, density: usize) -> Self {
        self.density = density;
        self
    }

    pub fn with_color_mode(mut self, color_mode: ColorMode) -> Self {
        self.color_mode = color_mode;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

enum Tint<'a> {
    Rgb {
        image: &'a ColorGrid,
        mapped: Vec<ColorSpacePoint>,
    },
    Gradient {
        near: f32,
        far: f32,
    },
}

impl Tint<'_> {
    fn color(&self, index: usize, depth_mm: u16) -> [u8; 3] {
        match self {
            Tint::Rgb { image, mapped } => {
                let p = mapped[index];
                if !p.is_finite() {
                    return FALLBACK_GRAY;
                }
                image
                    .rgb_at(p.x.round() as i64, p.y.round() as i64)
                    .unwrap_or(FALLBACK_GRAY)
            }
            Tint::Gradient { near, far } => {
                let span = far - near;
                let t = if span > 0.0 {
                    (depth_mm as f32 - near) / span
                } else {
                    0.0
                };
                gradient_color(t)
            }
        }
    }
}

/// Piecewise-linear ramp over the gradient stops. `t` is clamped to [0, 1].
pub fn gradient_color(t: f32) -> [u8; 3] {
    let scaled = t.clamp(0.0, 1.0) * (GRADIENT_STOPS.len() - 1) as f32;
    let segment = (scaled.floor() as usize).min(GRADIENT_STOPS.len() - 2);
    let f = scaled - segment as f32;
    let (a, b) = (GRADIENT_STOPS[segment], GRADIENT_STOPS[segment + 1]);
    [0, 1, 2].map(|c| (a[c] + (b[c] - a[c]) * f).round().clamp(0.0, 255.0) as u8)
}

/// Turns paired depth/color grids into point cloud frames. Work is spread
/// over a dedicated pool; each partition fills its own buffers and the
/// results are concatenated once in partition order.
pub struct FrameProcessor {
    config: CaptureConfig,
    pool: rayon::ThreadPool,
    sequence: AtomicU64,
}

impl FrameProcessor {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        if config.density == 0 {
            return Err(CaptureError::FrameProcessing(
                "density must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("capture-worker-{}", i))
            .build()
            .map_err(|e| CaptureError::FrameProcessing(e.to_string()))?;
        Ok(Self {
            config,
            pool,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Restart frame numbering at zero.
    pub fn reset_sequence(&self) {
        self.sequence.store(0, Ordering::SeqCst);
    }

    pub fn process(
        &self,
        mapper: &dyn CoordinateMapper,
        depth: &DepthGrid,
        color: Option<&ColorGrid>,
    ) -> Result<PointCloudFrame> {
        if !depth.is_well_formed() {
            return Err(CaptureError::FrameProcessing(format!(
                "depth grid {}x{} carries {} samples",
                depth.width,
                depth.height,
                depth.data.len()
            )));
        }

        let camera = mapper.depth_to_camera(depth);
        if camera.len() != depth.data.len() {
            return Err(CaptureError::FrameProcessing(format!(
                "mapper produced {} camera points for {} samples",
                camera.len(),
                depth.data.len()
            )));
        }

        let tint = self.tint(mapper, depth, color)?;
        let (points, colors) = self.sample(&camera, depth, &tint);

        let frame_number = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(PointCloudFrame::new(Utc::now(), points, colors, frame_number)?)
    }

    fn tint<'a>(
        &self,
        mapper: &dyn CoordinateMapper,
        depth: &DepthGrid,
        color: Option<&'a ColorGrid>,
    ) -> Result<Tint<'a>> {
        match (self.config.color_mode, color) {
            (ColorMode::Rgb, Some(image)) => {
                if !image.is_well_formed() {
                    return Err(CaptureError::FrameProcessing(format!(
                        "color grid {}x{} carries {} bytes",
                        image.width,
                        image.height,
                        image.data.len()
                    )));
                }
                let mapped = mapper.depth_to_color(depth);
                if mapped.len() != depth.data.len() {
                    return Err(CaptureError::FrameProcessing(format!(
                        "mapper produced {} color points for {} samples",
                        mapped.len(),
                        depth.data.len()
                    )));
                }
                Ok(Tint::Rgb { image, mapped })
            }
            (ColorMode::Rgb, None) => {
                log::debug!("no color frame available, tinting by depth");
                Ok(self.gradient(depth))
            }
            (ColorMode::DepthGradient, _) => Ok(self.gradient(depth)),
        }
    }

    /// Observed depth range over valid samples, limited to the nominal range.
    fn gradient(&self, depth: &DepthGrid) -> Tint<'static> {
        let (lo, hi) = (self.config.min_depth_mm, self.config.max_depth_mm);
        let observed = self.pool.install(|| {
            depth
                .data
                .par_iter()
                .copied()
                .filter(|&d| d > 0 && d >= lo && d <= hi)
                .map(|d| (d, d))
                .reduce_with(|a, b| (a.0.min(b.0), a.1.max(b.1)))
        });
        let (near, far) = observed.unwrap_or((lo, hi));
        Tint::Gradient {
            near: near as f32,
            far: far as f32,
        }
    }

    fn sample(
        &self,
        camera: &[CameraSpacePoint],
        depth: &DepthGrid,
        tint: &Tint<'_>,
    ) -> (Vec<f32>, Vec<u8>) {
        let density = self.config.density;
        let sampled = camera.len().div_ceil(density);
        let partitions = self.pool.current_num_threads().max(1);
        let chunk = sampled.div_ceil(partitions).max(1);

        let parts: Vec<(Vec<f32>, Vec<u8>)> = self.pool.install(|| {
            (0..partitions)
                .into_par_iter()
                .map(|p| {
                    let start = (p * chunk).min(sampled);
                    let end = ((p + 1) * chunk).min(sampled);
                    let mut points = Vec::with_capacity((end - start) * 3);
                    let mut colors = Vec::with_capacity((end - start) * 3);
                    for k in start..end {
                        let i = k * density;
                        let cp = camera[i];
                        if !cp.is_finite() {
                            continue;
                        }
                        points.extend_from_slice(&[cp.x, cp.y, cp.z]);
                        colors.extend_from_slice(&tint.color(i, depth.data[i]));
                    }
                    (points, colors)
                })
                .collect()
        });

        let total: usize = parts.iter().map(|(p, _)| p.len()).sum();
        let mut points = Vec::with_capacity(total);
        let mut colors = Vec::with_capacity(total);
        for (p, c) in parts {
            points.extend(p);
            colors.extend(c);
        }
        (points, colors)
    }
}
