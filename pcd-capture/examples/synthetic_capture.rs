use std::time::Duration;

use pcd_capture::{
    CaptureConfig, CaptureService, ColorMode, FrameCache, FrameProcessor, SensorSource,
    ServiceConfig, SyntheticSensor,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .init();

    let processor = FrameProcessor::new(
        CaptureConfig::default()
            .with_density(4)
            .with_color_mode(ColorMode::Rgb),
    )?;
    let source = SensorSource::new(SyntheticSensor::new(30.0), processor);
    let service = CaptureService::new(Box::new(source), FrameCache::new(), ServiceConfig::default());

    service.initialize()?;
    service.start()?;

    let subscription = service.cache().subscribe();
    for _ in 0..60 {
        if let Some(frame) = subscription.recv_timeout(Duration::from_secs(1)) {
            log::info!(
                "frame {} with {} points",
                frame.frame_number(),
                frame.point_count()
            );
        }
    }

    service.stop()?;
    let status = service.status();
    log::info!(
        "{} frames at {:.1} fps",
        status.frames_produced,
        status.fps
    );
    service.shutdown();
    Ok(())
}
