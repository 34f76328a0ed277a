//! Depth/color capture: raw sensor grids to colored point cloud frames,
//! a latest-frame cache with subscribers, and the streaming service that
//! drives a frame source.

pub mod bridge;
pub mod cache;
pub mod error;
pub mod fps;
pub mod gate;
pub mod processor;
pub mod sensor;
pub mod service;
pub mod source;
pub mod synthetic;

pub use bridge::BridgeSource;
pub use cache::{FrameCache, Subscription};
pub use error::{CaptureError, Result};
pub use gate::{StreamControl, ViewerGate, ViewerTicket};
pub use processor::{CaptureConfig, ColorMode, FrameProcessor};
pub use sensor::{
    CameraSpacePoint, ColorGrid, ColorSpacePoint, CoordinateMapper, DepthGrid, DepthSensor,
    Intrinsics, PinholeMapper,
};
pub use service::{CaptureService, CaptureState, ServiceConfig};
pub use source::{FrameSource, SensorSource};
pub use synthetic::SyntheticSensor;
