//! Paced capture loop feeding the frame buffer and subscribers.

use super::{downscale, CaptureError, CapturedFrame, ScreenSource};
use crate::core::{window_cutoff, BufferStats, FrameRecord, StageHandle, TimeWindowBuffer};
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pacing and sizing for a [`FrameSource`].
#[derive(Debug, Clone)]
pub struct FrameSettings {
    /// Target frames per second
    pub fps: f64,
    /// Largest allowed edge after downscaling
    pub max_dimension: u32,
    /// Number of frames retained
    pub buffer_capacity: usize,
}

impl FrameSettings {
    /// Time between frames. Rates too low to represent never tick.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.fps).unwrap_or(Duration::MAX)
    }
}

/// Receives every frame the source emits.
///
/// Called on the capture loop, so implementations should return quickly.
/// Errors and panics are logged and never stop the loop.
pub trait FrameSubscriber: Send + Sync {
    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()>;
}

impl<F> FrameSubscriber for F
where
    F: Fn(&FrameRecord) -> anyhow::Result<()> + Send + Sync,
{
    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()> {
        self(frame)
    }
}

/// Forwards frames into a bounded channel, e.g. for a live preview.
///
/// A full channel drops the frame for this subscriber only.
pub struct ChannelSubscriber {
    sender: Sender<FrameRecord>,
    closed: AtomicBool,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, Receiver<FrameRecord>) {
        let (sender, receiver) = bounded(capacity.max(1));
        let subscriber = Self {
            sender,
            closed: AtomicBool::new(false),
        };
        (subscriber, receiver)
    }
}

impl FrameSubscriber for ChannelSubscriber {
    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()> {
        match self.sender.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("frame subscriber channel full, dropping frame");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                // Report once; a dropped receiver is not worth a warning per frame.
                if self.closed.swap(true, Ordering::Relaxed) {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("frame receiver was dropped"))
                }
            }
        }
    }
}

type SubscriberList = Arc<Mutex<Vec<Arc<dyn FrameSubscriber>>>>;

/// Drives a [`ScreenSource`] at a target rate.
pub struct FrameSource {
    source: Arc<dyn ScreenSource>,
    settings: FrameSettings,
    buffer: Arc<TimeWindowBuffer<FrameRecord>>,
    subscribers: SubscriberList,
    log: SharedTransparencyLog,
    stage: Option<StageHandle>,
}

impl FrameSource {
    pub fn new(
        source: Arc<dyn ScreenSource>,
        settings: FrameSettings,
        log: SharedTransparencyLog,
    ) -> Self {
        let buffer = Arc::new(TimeWindowBuffer::new(settings.buffer_capacity));
        Self {
            source,
            settings,
            buffer,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            log,
            stage: None,
        }
    }

    /// Register a subscriber; it sees frames captured from now on.
    pub fn subscribe(&self, subscriber: Arc<dyn FrameSubscriber>) {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(subscriber);
    }

    /// Subscribe through a bounded channel of `capacity` frames.
    pub fn subscribe_channel(&self, capacity: usize) -> Receiver<FrameRecord> {
        let (subscriber, receiver) = ChannelSubscriber::new(capacity);
        self.subscribe(Arc::new(subscriber));
        receiver
    }

    /// Start the capture loop. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let worker = CaptureWorker {
            source: Arc::clone(&self.source),
            settings: self.settings.clone(),
            buffer: Arc::clone(&self.buffer),
            subscribers: Arc::clone(&self.subscribers),
            log: Arc::clone(&self.log),
        };

        info!(
            source = self.source.name(),
            "started capturing at {} FPS", self.settings.fps
        );
        self.stage = Some(StageHandle::spawn("capture", move |token| {
            worker.run(token)
        }));
    }

    /// Stop the capture loop, waiting at most `timeout`. Safe to call twice.
    pub async fn stop(&mut self, timeout: Duration) {
        if let Some(stage) = self.stage.take() {
            stage.shutdown(timeout).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.stage
            .as_ref()
            .map(|stage| !stage.is_finished())
            .unwrap_or(false)
    }

    pub fn buffer(&self) -> Arc<TimeWindowBuffer<FrameRecord>> {
        Arc::clone(&self.buffer)
    }

    pub fn latest_frame(&self) -> Option<FrameRecord> {
        self.buffer.latest()
    }

    /// Frames captured within the trailing `window`.
    pub fn frames_since(&self, window: Duration) -> Vec<FrameRecord> {
        self.buffer.snapshot_since(window_cutoff(window))
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }
}

/// State moved into the capture task.
struct CaptureWorker {
    source: Arc<dyn ScreenSource>,
    settings: FrameSettings,
    buffer: Arc<TimeWindowBuffer<FrameRecord>>,
    subscribers: SubscriberList,
    log: SharedTransparencyLog,
}

impl CaptureWorker {
    async fn run(self, cancel_token: CancellationToken) {
        let interval = self.settings.interval();
        let mut last_timestamp: Option<DateTime<Utc>> = None;

        loop {
            let tick_start = Instant::now();

            match self.capture_once().await {
                Ok(captured) => {
                    // Keep timestamps monotonic even if the wall clock steps back.
                    let timestamp = match last_timestamp {
                        Some(last) if captured.timestamp < last => last,
                        _ => captured.timestamp,
                    };
                    last_timestamp = Some(timestamp);

                    let record = FrameRecord::new(timestamp, captured.image);
                    self.buffer.append(record.clone());
                    self.log.record_frame_captured();
                    self.dispatch(&record);
                }
                Err(e) => {
                    self.log.record_capture_failure();
                    warn!(source = self.source.name(), "screen capture failed: {e}");
                }
            }

            // Overrunning the interval fires the next tick immediately.
            let wait = interval.saturating_sub(tick_start.elapsed());
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("capture loop shutting down");
    }

    async fn capture_once(&self) -> Result<CapturedFrame, CaptureError> {
        let source = Arc::clone(&self.source);
        let max_dimension = self.settings.max_dimension;

        tokio::task::spawn_blocking(move || {
            let frame = source.capture_frame()?;
            Ok(CapturedFrame {
                timestamp: frame.timestamp,
                image: downscale(frame.image, max_dimension),
            })
        })
        .await
        .map_err(|e| CaptureError::Worker(e.to_string()))?
    }

    fn dispatch(&self, frame: &FrameRecord) {
        // Copy the list so no lock is held while subscribers run.
        let subscribers: Vec<Arc<dyn FrameSubscriber>> = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for subscriber in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_frame(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("frame subscriber error: {e}"),
                Err(_) => warn!("frame subscriber panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transparency::create_shared_log;
    use image::DynamicImage;
    use std::sync::atomic::AtomicUsize;

    /// Emits 400x200 frames, failing every third call.
    struct FlakySource {
        calls: AtomicUsize,
    }

    impl ScreenSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn capture_frame(&self) -> Result<CapturedFrame, CaptureError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 3 == 2 {
                return Err(CaptureError::EmptyOutput);
            }
            Ok(CapturedFrame {
                timestamp: Utc::now(),
                image: DynamicImage::new_rgb8(400, 200),
            })
        }
    }

    fn settings(fps: f64) -> FrameSettings {
        FrameSettings {
            fps,
            max_dimension: 100,
            buffer_capacity: 5,
        }
    }

    fn flaky_source() -> Arc<dyn ScreenSource> {
        Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_capture_loop_buffers_downscaled_frames_and_survives_failures() {
        let log = create_shared_log();
        let mut frames = FrameSource::new(flaky_source(), settings(50.0), Arc::clone(&log));

        frames.start();
        tokio::time::sleep(Duration::from_millis(400)).await;
        frames.stop(Duration::from_secs(2)).await;

        let stats = log.stats();
        assert!(stats.frames_captured >= 3, "captured {}", stats.frames_captured);
        assert!(stats.capture_failures >= 1);

        // Bounded by capacity, downscaled to the max dimension.
        assert!(frames.buffer().len() <= 5);
        let latest = frames.latest_frame().expect("at least one frame");
        assert_eq!(latest.dimensions(), (100, 50));

        let buffered = frames.buffer().snapshot();
        assert!(buffered
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[tokio::test]
    async fn test_subscriber_failures_are_isolated() {
        let log = create_shared_log();
        let mut frames = FrameSource::new(flaky_source(), settings(50.0), Arc::clone(&log));

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        frames.subscribe(Arc::new(|_: &FrameRecord| -> anyhow::Result<()> {
            panic!("subscriber bug")
        }));
        frames.subscribe(Arc::new(|_: &FrameRecord| -> anyhow::Result<()> {
            anyhow::bail!("subscriber error")
        }));
        frames.subscribe(Arc::new(move |_: &FrameRecord| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let preview = frames.subscribe_channel(2);

        frames.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(frames.is_running());
        frames.stop(Duration::from_secs(2)).await;

        assert!(seen.load(Ordering::SeqCst) >= 2);
        // The bounded preview channel never holds more than its capacity.
        assert!(!preview.is_empty());
        assert!(preview.len() <= 2);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let log = create_shared_log();
        let mut frames = FrameSource::new(flaky_source(), settings(20.0), log);

        frames.start();
        frames.start();
        assert!(frames.is_running());

        frames.stop(Duration::from_secs(2)).await;
        frames.stop(Duration::from_secs(2)).await;
        assert!(!frames.is_running());
    }

    #[tokio::test]
    async fn test_pacing_approximates_target_rate() {
        let log = create_shared_log();
        let source: Arc<dyn ScreenSource> = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let mut frames = FrameSource::new(source, settings(10.0), Arc::clone(&log));

        frames.start();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        frames.stop(Duration::from_secs(2)).await;

        let stats = log.stats();
        let attempts = stats.frames_captured + stats.capture_failures;
        assert!((6..=13).contains(&attempts), "attempts {attempts}");
    }

    #[test]
    fn test_interval_of_unrepresentable_rate_does_not_panic() {
        assert_eq!(settings(4.0).interval(), Duration::from_millis(250));
        assert_eq!(settings(1e-25).interval(), Duration::MAX);
        assert_eq!(settings(0.0).interval(), Duration::MAX);
    }
}
