use std::time::{Duration, Instant};

use pcd_capture::{
    CaptureConfig, CaptureService, CaptureState, ColorMode, FrameCache, FrameProcessor,
    FrameSource, SensorSource, ServiceConfig, SyntheticSensor,
};

fn source(mode: ColorMode) -> SensorSource<SyntheticSensor> {
    let processor = FrameProcessor::new(
        CaptureConfig::default()
            .with_density(2)
            .with_color_mode(mode)
            .with_workers(2),
    )
    .unwrap();
    SensorSource::new(SyntheticSensor::small(64, 48, 0.0), processor)
}

#[test]
fn sensor_frames_are_finite_and_aligned() {
    for mode in [ColorMode::Rgb, ColorMode::DepthGradient] {
        let mut src = source(mode);
        src.connect().unwrap();
        let frame = src.poll(Duration::from_millis(10)).unwrap().unwrap();

        assert!(frame.point_count() > 0);
        // 64x48 at density 2 samples 1536 positions, some of them holes
        assert!(frame.point_count() <= 1536);
        assert_eq!(frame.points().len(), frame.colors().len());
        assert!(frame.points().iter().all(|v| v.is_finite()));
        src.disconnect();
    }
}

#[test]
fn poll_before_connect_fails() {
    let mut src = source(ColorMode::Rgb);
    assert!(src.poll(Duration::ZERO).is_err());
}

#[test]
fn service_streams_synthetic_frames() {
    let cache = FrameCache::new();
    let config = ServiceConfig {
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let service = CaptureService::new(Box::new(source(ColorMode::Rgb)), cache.clone(), config);
    service.initialize().unwrap();
    service.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while service.status().frames_produced < 3 {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    let frame = cache.get().unwrap();
    assert_eq!(frame.points().len(), frame.point_count() * 3);

    service.stop().unwrap();
    assert_eq!(service.state(), CaptureState::Stopped);
    service.shutdown();
    assert_eq!(service.state(), CaptureState::Uninitialized);
    assert!(!service.status().connected);
}
