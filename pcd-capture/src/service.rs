use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use pcd_core::StreamStatus;

use crate::cache::FrameCache;
use crate::error::{CaptureError, Result};
use crate::fps::FpsCounter;
use crate::gate::StreamControl;
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Uninitialized,
    Initializing,
    Ready,
    Streaming,
    Stopped,
    Error,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Uninitialized => "uninitialized",
            CaptureState::Initializing => "initializing",
            CaptureState::Ready => "ready",
            CaptureState::Streaming => "streaming",
            CaptureState::Stopped => "stopped",
            CaptureState::Error => "in error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Target time between polls of the frame source.
    pub poll_interval: Duration,
    /// Refresh source status every this many polls.
    pub status_every: u64,
    /// Wait after a transient failure before polling again.
    pub retry_backoff: Duration,
    /// Upper bound on any single network call to a capture bridge.
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(33),
            status_every: 30,
            retry_backoff: Duration::from_millis(500),
            request_timeout: Duration::from_secs(3),
        }
    }
}

struct Shared {
    state: CaptureState,
    status: StreamStatus,
}

struct Board(Mutex<Shared>);

impl Board {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut Shared)) {
        let mut shared = self.lock();
        f(&mut shared);
        debug_assert!(shared.status.is_consistent());
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

struct Control {
    // Held here whenever no streaming loop owns it.
    source: Option<Box<dyn FrameSource>>,
    worker: Option<Worker>,
}

/// Owns a frame source and moves it through the capture lifecycle.
/// Transitions are serialized; status reads never block on a transition.
pub struct CaptureService {
    config: ServiceConfig,
    cache: Arc<FrameCache>,
    board: Arc<Board>,
    control: Mutex<Control>,
}

impl CaptureService {
    pub fn new(source: Box<dyn FrameSource>, cache: Arc<FrameCache>, config: ServiceConfig) -> Self {
        Self {
            config,
            cache,
            board: Arc::new(Board(Mutex::new(Shared {
                state: CaptureState::Uninitialized,
                status: StreamStatus::disconnected("Not initialized"),
            }))),
            control: Mutex::new(Control {
                source: Some(source),
                worker: None,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    pub fn state(&self) -> CaptureState {
        self.board.lock().state
    }

    /// A copy of the current status; always available, whatever the state.
    pub fn status(&self) -> StreamStatus {
        self.board.lock().status.clone()
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        // A loop that left `Streaming` by itself has ended or is about to.
        if control.worker.is_some() && self.state() != CaptureState::Streaming {
            self.halt(&mut control);
        }
        control
    }

    /// Connect the source. A no-op once connected.
    pub fn initialize(&self) -> Result<()> {
        let mut control = self.control();
        match self.state() {
            CaptureState::Ready | CaptureState::Streaming | CaptureState::Stopped => return Ok(()),
            CaptureState::Uninitialized | CaptureState::Initializing | CaptureState::Error => {}
        }
        let Some(source) = control.source.as_mut() else {
            return Err(CaptureError::DeviceUnavailable(
                "frame source is held by a running loop".to_string(),
            ));
        };

        self.board.update(|s| {
            s.state = CaptureState::Initializing;
            s.status.message = "Initializing".to_string();
        });
        log::info!("initializing {}", source.describe());

        match source.connect() {
            Ok(()) => {
                self.board.update(|s| {
                    s.state = CaptureState::Ready;
                    s.status = StreamStatus {
                        connected: true,
                        message: "Ready".to_string(),
                        ..Default::default()
                    };
                });
                Ok(())
            }
            Err(e) => {
                log::error!("initialization failed: {}", e);
                self.board.update(|s| {
                    s.state = CaptureState::Error;
                    s.status = StreamStatus {
                        error_message: Some(e.to_string()),
                        ..StreamStatus::disconnected("Initialization failed")
                    };
                });
                Err(e)
            }
        }
    }

    /// Begin streaming. Legal from `Ready` or `Stopped`; a no-op while streaming.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control();
        let from = self.state();
        match from {
            CaptureState::Streaming => return Ok(()),
            CaptureState::Ready | CaptureState::Stopped => {}
            _ => {
                return Err(CaptureError::InvalidTransition {
                    from,
                    action: "start",
                })
            }
        }
        let Some(mut source) = control.source.take() else {
            return Err(CaptureError::DeviceUnavailable(
                "frame source is held by a running loop".to_string(),
            ));
        };
        source.reset_session();

        self.board.update(|s| {
            s.state = CaptureState::Streaming;
            s.status.streaming = true;
            s.status.fps = 0.0;
            s.status.frames_produced = 0;
            s.status.error_message = None;
            s.status.message = "Streaming".to_string();
        });

        let (stop, stop_rx) = channel::bounded(1);
        let streaming = StreamingLoop {
            config: self.config.clone(),
            cache: self.cache.clone(),
            board: self.board.clone(),
            stop: stop_rx,
        };
        let spawned = std::thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || streaming.run(source));
        match spawned {
            Ok(handle) => {
                control.worker = Some(Worker { stop, handle });
                log::info!("streaming started");
                Ok(())
            }
            Err(e) => {
                // The source moved into the failed closure and is gone.
                self.board.update(|s| {
                    s.state = CaptureState::Error;
                    s.status = StreamStatus {
                        error_message: Some(e.to_string()),
                        ..StreamStatus::disconnected("Could not start capture loop")
                    };
                });
                Err(CaptureError::DeviceUnavailable(e.to_string()))
            }
        }
    }

    /// Stop streaming. A no-op unless streaming.
    pub fn stop(&self) -> Result<()> {
        let mut control = self.control();
        if self.state() != CaptureState::Streaming {
            return Ok(());
        }
        self.halt(&mut control);
        self.board.update(|s| {
            if s.state == CaptureState::Streaming {
                s.state = CaptureState::Stopped;
                s.status.streaming = false;
                s.status.fps = 0.0;
                s.status.message = "Stopped".to_string();
            }
        });
        log::info!("streaming stopped");
        Ok(())
    }

    /// Stop streaming and release the source.
    pub fn shutdown(&self) {
        let mut control = self.control();
        self.halt(&mut control);
        if let Some(source) = control.source.as_mut() {
            source.disconnect();
        }
        self.board.update(|s| {
            s.state = CaptureState::Uninitialized;
            s.status = StreamStatus::disconnected("Shut down");
        });
    }

    fn halt(&self, control: &mut Control) {
        if let Some(worker) = control.worker.take() {
            // A closed channel stops the loop as well as a message does.
            drop(worker.stop);
            match worker.handle.join() {
                Ok(source) => control.source = Some(source),
                Err(_) => log::error!("capture loop panicked"),
            }
        }
    }
}

impl StreamControl for CaptureService {
    fn start_stream(&self) -> Result<()> {
        self.start()
    }

    fn stop_stream(&self) -> Result<()> {
        self.stop()
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = control.worker.take() {
            drop(worker.stop);
            let _ = worker.handle.join();
        }
    }
}

struct StreamingLoop {
    config: ServiceConfig,
    cache: Arc<FrameCache>,
    board: Arc<Board>,
    stop: Receiver<()>,
}

impl StreamingLoop {
    /// Sleep up to `duration`; true if asked to stop meanwhile.
    fn wait(&self, duration: Duration) -> bool {
        match self.stop.recv_timeout(duration) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(
            self.stop.try_recv(),
            Err(crossbeam::channel::TryRecvError::Empty)
        )
    }

    fn run(self, mut source: Box<dyn FrameSource>) -> Box<dyn FrameSource> {
        let mut fps = FpsCounter::new(Instant::now());
        let mut polls: u64 = 0;
        let mut failures: u32 = 0;

        while !self.stop_requested() {
            let started = Instant::now();
            polls += 1;

            let mut result = source.poll(self.config.poll_interval);
            if result.is_ok() && self.config.status_every > 0 && polls % self.config.status_every == 0 {
                if let Err(e) = source.probe() {
                    result = Err(e);
                }
            }

            match result {
                Ok(Some(frame)) => {
                    if failures > 0 {
                        log::info!("capture recovered after {} failed polls", failures);
                        failures = 0;
                    }
                    self.cache.set(Arc::new(frame));
                    fps.record_frame();
                    self.board.update(|s| {
                        s.status.frames_produced += 1;
                        s.status.error_message = None;
                        s.status.message = "Streaming".to_string();
                    });
                }
                Ok(None) => {}
                Err(e) if e.drops_frame() => {
                    log::warn!("dropping frame: {}", e);
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    log::warn!("capture poll failed ({} in a row): {}", failures, e);
                    self.board.update(|s| {
                        s.status.error_message = Some(e.to_string());
                        s.status.message = format!("Retrying (attempt {})", failures);
                    });
                    if self.wait(self.config.retry_backoff) {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    log::error!("capture loop stopped: {}", e);
                    self.board.update(|s| {
                        s.state = CaptureState::Error;
                        s.status = StreamStatus {
                            error_message: Some(e.to_string()),
                            ..StreamStatus::disconnected("Capture failed")
                        };
                    });
                    source.disconnect();
                    return source;
                }
            }

            if let Some(rate) = fps.sample(Instant::now()) {
                self.board.update(|s| s.status.fps = rate);
            }

            let elapsed = started.elapsed();
            if elapsed < self.config.poll_interval && self.wait(self.config.poll_interval - elapsed) {
                break;
            }
        }
        source
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use pcd_core::PointCloudFrame;

    use super::*;

    #[derive(Default)]
    struct Counters {
        connects: AtomicUsize,
        resets: AtomicUsize,
        polls: AtomicUsize,
    }

    /// Emits a one-point frame per poll; fails the polls listed in `fail_at`.
    /// With `permits` set, a frame is emitted only per received permit.
    struct Scripted {
        counters: Arc<Counters>,
        sequence: u64,
        refuse_connect: bool,
        fail_at: Vec<(usize, fn() -> CaptureError)>,
        permits: Option<crossbeam::channel::Receiver<()>>,
    }

    impl Scripted {
        fn new(counters: Arc<Counters>) -> Self {
            Self {
                counters,
                sequence: 0,
                refuse_connect: false,
                fail_at: Vec::new(),
                permits: None,
            }
        }
    }

    impl FrameSource for Scripted {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn connect(&mut self) -> Result<()> {
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connect {
                return Err(CaptureError::NoDevice);
            }
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn reset_session(&mut self) {
            self.counters.resets.fetch_add(1, Ordering::SeqCst);
            self.sequence = 0;
        }

        fn poll(&mut self, timeout: Duration) -> Result<Option<PointCloudFrame>> {
            let n = self.counters.polls.fetch_add(1, Ordering::SeqCst);
            if let Some((_, make)) = self.fail_at.iter().find(|(at, _)| *at == n) {
                return Err(make());
            }
            if let Some(permits) = &self.permits {
                if permits.recv_timeout(timeout).is_err() {
                    return Ok(None);
                }
            }
            let frame = PointCloudFrame::new(Utc::now(), vec![0.0, 0.0, 1.0], vec![1, 2, 3], self.sequence)?;
            self.sequence += 1;
            Ok(Some(frame))
        }
    }

    fn hiccup() -> CaptureError {
        CaptureError::Transient("hiccup".to_string())
    }

    fn bad_grid() -> CaptureError {
        CaptureError::FrameProcessing("bad grid".to_string())
    }

    fn unplugged() -> CaptureError {
        CaptureError::NoDevice
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            poll_interval: Duration::from_millis(2),
            status_every: 5,
            retry_backoff: Duration::from_millis(5),
            request_timeout: Duration::from_millis(100),
        }
    }

    fn service(source: Scripted) -> CaptureService {
        CaptureService::new(Box::new(source), FrameCache::new(), config())
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_start_before_initialize_is_rejected() {
        let counters = Arc::new(Counters::default());
        let svc = service(Scripted::new(counters.clone()));

        let err = svc.start().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidTransition {
                from: CaptureState::Uninitialized,
                action: "start"
            }
        ));
        assert_eq!(svc.state(), CaptureState::Uninitialized);
        assert!(!svc.status().streaming);
        assert_eq!(counters.polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let svc = service(Scripted::new(Arc::default()));
        svc.stop().unwrap();
        assert_eq!(svc.state(), CaptureState::Uninitialized);

        svc.initialize().unwrap();
        svc.stop().unwrap();
        assert_eq!(svc.state(), CaptureState::Ready);
    }

    #[test]
    fn test_initialize_twice_connects_once() {
        let counters = Arc::new(Counters::default());
        let svc = service(Scripted::new(counters.clone()));
        svc.initialize().unwrap();
        svc.initialize().unwrap();
        assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
        assert_eq!(svc.state(), CaptureState::Ready);
        let status = svc.status();
        assert!(status.connected && !status.streaming);
    }

    #[test]
    fn test_failed_initialize_reports_error() {
        let mut source = Scripted::new(Arc::default());
        source.refuse_connect = true;
        let svc = service(source);

        assert!(matches!(svc.initialize(), Err(CaptureError::NoDevice)));
        assert_eq!(svc.state(), CaptureState::Error);
        let status = svc.status();
        assert!(!status.connected && !status.streaming);
        assert!(status.error_message.is_some());
        assert!(svc.start().is_err());
    }

    #[test]
    fn test_stream_restart_resets_frame_numbers() {
        let counters = Arc::new(Counters::default());
        let (permit, permits) = crossbeam::channel::unbounded();
        let mut source = Scripted::new(counters.clone());
        source.permits = Some(permits);
        let svc = service(source);
        svc.initialize().unwrap();
        let sub = svc.cache().subscribe();

        let next_frame = || {
            permit.send(()).unwrap();
            sub.recv_timeout(Duration::from_secs(5))
                .expect("frame not delivered")
                .frame_number()
        };

        svc.start().unwrap();
        svc.start().unwrap();
        assert_eq!(counters.resets.load(Ordering::SeqCst), 1);
        let numbers: Vec<u64> = (0..5).map(|_| next_frame()).collect();
        assert_eq!(numbers, [0, 1, 2, 3, 4]);

        svc.stop().unwrap();
        assert_eq!(svc.state(), CaptureState::Stopped);
        let status = svc.status();
        assert!(status.connected && !status.streaming);

        svc.start().unwrap();
        let numbers: Vec<u64> = (0..3).map(|_| next_frame()).collect();
        assert_eq!(numbers, [0, 1, 2]);
        svc.stop().unwrap();
        assert_eq!(counters.resets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let counters = Arc::new(Counters::default());
        let mut source = Scripted::new(counters.clone());
        source.fail_at = vec![
            (1, hiccup as fn() -> CaptureError),
            (2, bad_grid as fn() -> CaptureError),
        ];
        let svc = service(source);
        svc.initialize().unwrap();
        svc.start().unwrap();

        wait_for(|| counters.polls.load(Ordering::SeqCst) > 4);
        wait_for(|| svc.status().frames_produced >= 3);
        assert_eq!(svc.state(), CaptureState::Streaming);
        svc.stop().unwrap();
    }

    #[test]
    fn test_unrecoverable_failure_ends_in_error() {
        let counters = Arc::new(Counters::default());
        let mut source = Scripted::new(counters.clone());
        source.fail_at = vec![(3, unplugged as fn() -> CaptureError)];
        let svc = service(source);
        svc.initialize().unwrap();
        svc.start().unwrap();

        wait_for(|| svc.state() == CaptureState::Error);
        let status = svc.status();
        assert!(!status.streaming && !status.connected);
        assert!(status.is_consistent());

        // the source comes back for a fresh initialize
        svc.initialize().unwrap();
        assert_eq!(svc.state(), CaptureState::Ready);
        assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
    }
}
