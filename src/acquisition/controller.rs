//! # Acquisition Control and the Sampling Loop
//!
//! The [`AcquisitionController`] owns the session state machine and the
//! producer task. There are two states, Idle and Running, and exactly one
//! producer may exist per process: `start` while Running and `stop` while
//! Idle are harmless no-ops with an informational status, so callers can
//! poll or retry without side effects.
//!
//! ## Session lifecycle:
//! 1. `start` resolves the session parameters, builds a fresh sample
//!    source, clears the record buffer, and spawns the sampling loop.
//! 2. The loop produces one frame per cadence period, records it, and
//!    fans it out to the subscribers.
//! 3. `stop` (or a timed session reaching its duration) cancels the loop
//!    cooperatively; cancellation is observed within one cadence period.
//! 4. Timed sessions export the record buffer on teardown; the export runs
//!    as its own task so stopping never waits on disk I/O.

use crate::acquisition::frame::Frame;
use crate::acquisition::source::SampleSource;
use crate::broadcast::SubscriberRegistry;
use crate::recording::{CsvExporter, RecordBuffer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Delay before retrying after a transient acquisition failure.
const ACQUISITION_BACKOFF: Duration = Duration::from_secs(1);

/// How a session decides when to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Runs until an explicit stop.
    Auto,
    /// Stops automatically after the configured duration, then exports.
    Timed,
}

/// Parameters resolved for one session: configuration defaults merged with
/// the overrides of the start request.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub mode: AcquisitionMode,
    pub duration: Option<Duration>,
    pub sample_rate: u32,
    pub packet_size: usize,
    pub channel_count: usize,
    pub emulate: bool,
}

impl SessionParams {
    /// Time between two frames: `packet_size / sample_rate` seconds,
    /// clamped to 1 ms so a zero-size packet (a valid boundary value)
    /// still ticks instead of busy-looping.
    pub fn cadence(&self) -> Duration {
        let seconds = self.packet_size as f64 / self.sample_rate as f64;
        Duration::from_secs_f64(seconds).max(Duration::from_millis(1))
    }
}

/// Result of a start call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

impl StartOutcome {
    /// Status string for the control API.
    pub fn as_status(&self) -> &'static str {
        match self {
            StartOutcome::Started => "acquisition started",
            StartOutcome::AlreadyRunning => "acquisition already running",
        }
    }
}

/// Result of a stop call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotStarted,
}

impl StopOutcome {
    /// Status string for the control API.
    pub fn as_status(&self) -> &'static str {
        match self {
            StopOutcome::Stopped => "acquisition stopped",
            StopOutcome::NotStarted => "acquisition not started",
        }
    }
}

/// Builds the sample source for one session.
///
/// Injected at construction so the hardware seam stays out of the
/// controller: the default factory picks the emulator or reports that no
/// register interface is linked in, and tests inject mocks.
pub type SourceFactory =
    Arc<dyn Fn(&SessionParams) -> Result<Box<dyn SampleSource>, String> + Send + Sync>;

/// Handle to the producer task of the currently running session.
struct RunningSession {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The control state machine. One instance per server process, shared with
/// every request handler through the application state.
pub struct AcquisitionController {
    registry: Arc<SubscriberRegistry>,
    recorder: RecordBuffer,
    exporter: CsvExporter,
    source_factory: SourceFactory,
    /// Sole source of truth for Idle/Running; flipped by `start`, by `stop`
    /// and by the loop itself on natural expiry.
    running: Arc<AtomicBool>,
    session: tokio::sync::Mutex<Option<RunningSession>>,
}

impl AcquisitionController {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        exporter: CsvExporter,
        source_factory: SourceFactory,
    ) -> Self {
        Self {
            registry,
            recorder: RecordBuffer::new(),
            exporter,
            source_factory,
            running: Arc::new(AtomicBool::new(false)),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Start a session. No-op with [`StartOutcome::AlreadyRunning`] if one
    /// is already running; the session mutex makes the check-and-spawn
    /// atomic, so two racing starts can never spawn two producers.
    pub async fn start(&self, params: SessionParams) -> Result<StartOutcome, String> {
        let mut session = self.session.lock().await;

        if self.running.load(Ordering::SeqCst) {
            return Ok(StartOutcome::AlreadyRunning);
        }

        if params.mode == AcquisitionMode::Timed && params.duration.is_none() {
            return Err("Timed mode requires a duration".to_string());
        }

        let source = (self.source_factory)(&params)?;

        self.recorder.clear();
        self.running.store(true, Ordering::SeqCst);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(sampling_loop(
            source,
            params,
            self.recorder.clone(),
            Arc::clone(&self.registry),
            self.exporter.clone(),
            Arc::clone(&self.running),
            cancel_rx,
        ));

        *session = Some(RunningSession {
            cancel: cancel_tx,
            handle,
        });

        Ok(StartOutcome::Started)
    }

    /// Stop the running session, awaiting the loop's orderly termination.
    /// No-op with [`StopOutcome::NotStarted`] if nothing is running.
    pub async fn stop(&self) -> StopOutcome {
        let mut session = self.session.lock().await;

        if !self.running.load(Ordering::SeqCst) {
            // A timed session may have expired on its own; drop the stale
            // task handle so the slot is clean for the next start.
            *session = None;
            return StopOutcome::NotStarted;
        }

        if let Some(running) = session.take() {
            let _ = running.cancel.send(true);
            if let Err(err) = running.handle.await {
                error!("Sampling loop task failed: {}", err);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        StopOutcome::Stopped
    }

    /// Whether a session is currently running. Pure read.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of connected data-plane subscribers. Pure read.
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }

    /// Number of frames recorded for the current session so far.
    pub fn recorded_frame_count(&self) -> usize {
        self.recorder.len()
    }

    /// Export whatever is currently buffered, running or not.
    pub async fn export_snapshot(&self) -> anyhow::Result<PathBuf> {
        self.exporter.export(self.recorder.snapshot()).await
    }
}

/// The producer: one frame per cadence period until cancelled or, for
/// timed sessions, until the duration elapses.
async fn sampling_loop(
    mut source: Box<dyn SampleSource>,
    params: SessionParams,
    recorder: RecordBuffer,
    registry: Arc<SubscriberRegistry>,
    exporter: CsvExporter,
    running: Arc<AtomicBool>,
    mut cancel: watch::Receiver<bool>,
) {
    let cadence = params.cadence();
    let started = Instant::now();

    let mut ticker = tokio::time::interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Acquisition started: {:?} mode, {} Hz, {} samples/channel, {} channels",
        params.mode, params.sample_rate, params.packet_size, params.channel_count
    );

    loop {
        // Cancellation is checked once per iteration, so a stop request is
        // observed within one cadence period in the worst case.
        tokio::select! {
            _ = cancel.changed() => {
                debug!("Sampling loop received cancellation");
                break;
            }
            _ = ticker.tick() => {}
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                // Transient failure: never fatal to the session.
                warn!(
                    "Frame acquisition failed: {}. Retrying in {:?}",
                    err, ACQUISITION_BACKOFF
                );
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = tokio::time::sleep(ACQUISITION_BACKOFF) => {}
                }
                continue;
            }
        };

        recorder.append(frame.clone());
        broadcast_frame(&registry, frame, cadence).await;

        if params.mode == AcquisitionMode::Timed {
            if let Some(duration) = params.duration {
                if started.elapsed() >= duration {
                    info!("Timed session reached its duration, stopping");
                    break;
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);

    // Timed sessions export on teardown, natural or caller-initiated. The
    // export runs as its own task so stop() is acknowledged promptly.
    if params.mode == AcquisitionMode::Timed {
        let frames = recorder.snapshot();
        tokio::spawn(async move {
            if let Err(err) = exporter.export(frames).await {
                error!("Automatic export at session end failed: {}", err);
            }
        });
    }

    info!("Acquisition stopped");
}

/// Serialize once, fan out to every subscriber. Delivery failures are
/// handled inside the registry and never reach the loop.
async fn broadcast_frame(registry: &SubscriberRegistry, frame: Frame, cadence: Duration) {
    let payload = frame.to_wire_bytes();
    registry.broadcast(payload, cadence).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::source::EmulatedSource;
    use std::sync::atomic::AtomicUsize;

    fn emulated_factory(counter: Arc<AtomicUsize>) -> SourceFactory {
        Arc::new(move |params: &SessionParams| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EmulatedSource::new(
                params.sample_rate,
                params.packet_size,
                params.channel_count,
            )) as Box<dyn SampleSource>)
        })
    }

    fn controller_in(dir: &std::path::Path, factory: SourceFactory) -> AcquisitionController {
        AcquisitionController::new(
            Arc::new(SubscriberRegistry::new()),
            CsvExporter::new(dir),
            factory,
        )
    }

    fn params(mode: AcquisitionMode, duration: Option<Duration>) -> SessionParams {
        SessionParams {
            mode,
            duration,
            sample_rate: 1000,
            packet_size: 10, // 10 ms cadence
            channel_count: 2,
            emulate: true,
        }
    }

    async fn wait_until_idle(controller: &AcquisitionController) {
        for _ in 0..100 {
            if !controller.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("controller did not reach idle");
    }

    #[tokio::test]
    async fn test_double_start_spawns_one_producer() {
        let dir = tempfile::tempdir().unwrap();
        let sources_built = Arc::new(AtomicUsize::new(0));
        let controller = controller_in(dir.path(), emulated_factory(sources_built.clone()));

        let first = controller
            .start(params(AcquisitionMode::Auto, None))
            .await
            .unwrap();
        let second = controller
            .start(params(AcquisitionMode::Auto, None))
            .await
            .unwrap();

        assert_eq!(first, StartOutcome::Started);
        assert_eq!(second, StartOutcome::AlreadyRunning);
        assert_eq!(sources_built.load(Ordering::SeqCst), 1);
        assert!(controller.is_running());

        assert_eq!(controller.stop().await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(dir.path(), emulated_factory(Arc::new(AtomicUsize::new(0))));

        assert_eq!(controller.stop().await, StopOutcome::NotStarted);
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_stop_halts_production() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(dir.path(), emulated_factory(Arc::new(AtomicUsize::new(0))));

        controller
            .start(params(AcquisitionMode::Auto, None))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(controller.stop().await, StopOutcome::Stopped);
        assert!(!controller.is_running());

        // stop() awaited the loop, so no more frames can arrive.
        let frames_at_stop = controller.recorded_frame_count();
        assert!(frames_at_stop > 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.recorded_frame_count(), frames_at_stop);
    }

    #[tokio::test]
    async fn test_timed_mode_requires_duration() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(dir.path(), emulated_factory(Arc::new(AtomicUsize::new(0))));

        let result = controller.start(params(AcquisitionMode::Timed, None)).await;
        assert!(result.is_err());
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_timed_session_expires_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_in(dir.path(), emulated_factory(Arc::new(AtomicUsize::new(0))));

        // 50 ms at 1000 Hz with 10-sample chunks: about 50 samples.
        controller
            .start(params(
                AcquisitionMode::Timed,
                Some(Duration::from_millis(50)),
            ))
            .await
            .unwrap();

        wait_until_idle(&controller).await;

        // A subsequent stop is a no-op: the session already ended itself.
        assert_eq!(controller.stop().await, StopOutcome::NotStarted);

        // The export task runs detached; wait for the file to land.
        let mut exported = None;
        for _ in 0..100 {
            let files: Vec<_> = std::fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|entry| entry.ok())
                .collect();
            if let Some(file) = files.first() {
                exported = Some(file.path());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let exported = exported.expect("timed session should export a CSV file");

        let contents = std::fs::read_to_string(exported).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Channel 0,Channel 1");

        // round(D * R) = 50 samples, within one chunk either way.
        let sample_rows = lines.len() - 1;
        assert!(
            (40..=60).contains(&sample_rows),
            "expected about 50 sample rows, got {}",
            sample_rows
        );
        for line in &lines[1..] {
            assert_eq!(line.split(',').count(), 2);
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_recorded_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SubscriberRegistry::new());
        let controller = AcquisitionController::new(
            Arc::clone(&registry),
            CsvExporter::new(dir.path()),
            emulated_factory(Arc::new(AtomicUsize::new(0))),
        );

        let (_id_a, mut rx_a) = registry.connect();
        let (_id_b, mut rx_b) = registry.connect();

        controller
            .start(params(AcquisitionMode::Auto, None))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        controller.stop().await;

        let mut stream_a = Vec::new();
        while let Ok(payload) = rx_a.try_recv() {
            stream_a.push(payload);
        }
        let mut stream_b = Vec::new();
        while let Ok(payload) = rx_b.try_recv() {
            stream_b.push(payload);
        }

        // Both subscribers saw the same frames, bit for bit, in
        // production order, and they match the record buffer.
        assert!(!stream_a.is_empty());
        assert_eq!(stream_a, stream_b);
        assert_eq!(stream_a.len(), controller.recorded_frame_count());

        // 2 channels x 10 samples x 2 bytes per payload.
        for payload in &stream_a {
            assert_eq!(payload.len(), 40);
        }
    }

    #[tokio::test]
    async fn test_transient_acquisition_failure_is_not_fatal() {
        struct FlakySource {
            inner: EmulatedSource,
            failed_once: bool,
        }

        impl SampleSource for FlakySource {
            fn next_frame(&mut self) -> Result<Frame, String> {
                if !self.failed_once {
                    self.failed_once = true;
                    return Err("transfer glitch".to_string());
                }
                self.inner.next_frame()
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let factory: SourceFactory = Arc::new(|params: &SessionParams| {
            Ok(Box::new(FlakySource {
                inner: EmulatedSource::new(
                    params.sample_rate,
                    params.packet_size,
                    params.channel_count,
                ),
                failed_once: false,
            }) as Box<dyn SampleSource>)
        });
        let controller = controller_in(dir.path(), factory);

        controller
            .start(params(AcquisitionMode::Auto, None))
            .await
            .unwrap();

        // The first acquisition fails; after the backoff the session is
        // still running and producing frames.
        tokio::time::sleep(ACQUISITION_BACKOFF + Duration::from_millis(100)).await;
        assert!(controller.is_running());
        assert!(controller.recorded_frame_count() > 0);

        assert_eq!(controller.stop().await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_failing_source_factory_leaves_controller_idle() {
        let dir = tempfile::tempdir().unwrap();
        let factory: SourceFactory =
            Arc::new(|_: &SessionParams| Err("no register interface linked".to_string()));
        let controller = controller_in(dir.path(), factory);

        assert!(controller
            .start(params(AcquisitionMode::Auto, None))
            .await
            .is_err());
        assert!(!controller.is_running());
        assert_eq!(controller.stop().await, StopOutcome::NotStarted);
    }
}
