pub mod frame;
pub mod pointcloud;
pub mod status;

pub use frame::{ColorEncoding, FrameError, FrameMessage, PointCloudFrame, WireColors};
pub use status::StreamStatus;
