// Camera/microphone capture with fragment-emitting recording
//!
//! # camera-capture
//!
//! Acquires a live media stream from a capture device and records it into
//! an ordered series of encoded fragments:
//! - `CaptureDevice` opens a `MediaStream` (video + optional audio track)
//! - `Recorder` encodes frames as Motion-JPEG and emits a `Fragment` every
//!   fragment interval over a channel, in emission order
//! - `mjpeg` splits and decodes the resulting container
//! - `TestPatternCamera` is a synthetic device for headless use and tests
//!
//! ## Example
//! ```no_run
//! use camera_capture::{CaptureConstraints, CaptureDevice, Recorder, RecorderEvent, RecorderOptions, TestPatternCamera};
//!
//! # async fn demo() -> Result<(), camera_capture::CaptureError> {
//! let camera = TestPatternCamera::new();
//! let stream = camera.open(&CaptureConstraints::default())?;
//!
//! let mut recorder = Recorder::new(&stream, RecorderOptions::default())?;
//! recorder.start()?;
//! // ... record for some time ...
//! recorder.stop()?;
//! while let Some(event) = recorder.next_event().await {
//!     if let RecorderEvent::Stopped = event {
//!         break;
//!     }
//! }
//! stream.stop_all();
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use log::{debug, info, warn};

pub mod mjpeg;
mod stream;
mod test_pattern;

pub use stream::{CaptureDevice, FrameSource, MediaStream, StreamSettings, Track, TrackKind};
pub use test_pattern::TestPatternCamera;

/// Errors raised by capture devices and recorders
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Recorder is already running")]
    AlreadyRecording,

    #[error("Recorder is not recording")]
    NotRecording,

    #[error("Video track has ended")]
    TrackEnded,

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Which camera to prefer on devices with several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// Constraints requested when opening a capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Preferred frame width in pixels (default: 720)
    pub ideal_width: u32,

    /// Preferred frame height in pixels (default: 1280, portrait)
    pub ideal_height: u32,

    /// Frames per second (default: 15)
    pub fps: u32,

    /// Camera facing mode (default: user)
    pub facing: FacingMode,

    /// Request a microphone track as well (default: true)
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 720,
            ideal_height: 1280,
            fps: 15,
            facing: FacingMode::User,
            audio: true,
        }
    }
}

/// Options for a single recorder
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// How often accumulated frames are emitted as a fragment
    pub fragment_interval: Duration,

    /// JPEG quality for each frame (1-100, default: 80)
    pub jpeg_quality: u8,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            fragment_interval: Duration::from_millis(1000),
            jpeg_quality: 80,
        }
    }
}

/// One chunk of encoded media emitted while recording
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Position in emission order, starting at 0
    pub index: u64,
    pub bytes: Vec<u8>,
    /// Milliseconds since the recorder started
    pub captured_at_ms: u64,
}

impl Fragment {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Events delivered by a running recorder
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    Data(Fragment),
    Error(CaptureError),
    /// Final event; no fragments follow it
    Stopped,
}

/// Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopped,
}

/// Records a media stream into Motion-JPEG fragments
pub struct Recorder {
    source: stream::SharedSource,
    video_live: Arc<AtomicBool>,
    frame_interval: Duration,
    options: RecorderOptions,
    state: RecordingState,
    events_tx: mpsc::UnboundedSender<RecorderEvent>,
    events: mpsc::UnboundedReceiver<RecorderEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

impl Recorder {
    /// Create a recorder bound to the stream's video track
    pub fn new(stream: &MediaStream, options: RecorderOptions) -> Result<Self, CaptureError> {
        let video = stream.video_track().ok_or(CaptureError::TrackEnded)?;
        if !video.is_live() {
            return Err(CaptureError::TrackEnded);
        }

        let fps = stream.settings().fps.max(1);
        let (events_tx, events) = mpsc::unbounded_channel();

        Ok(Self {
            source: stream.source(),
            video_live: video.liveness(),
            frame_interval: Duration::from_secs(1) / fps,
            options,
            state: RecordingState::Idle,
            events_tx,
            events,
            stop_tx: None,
            started_at: None,
            stopped_at: None,
        })
    }

    /// Container type of the emitted fragments
    pub fn mime_type(&self) -> &'static str {
        mjpeg::MIME_TYPE
    }

    /// Start recording. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != RecordingState::Idle {
            return Err(CaptureError::AlreadyRecording);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = FragmentWorker {
            source: self.source.clone(),
            live: self.video_live.clone(),
            frame_interval: self.frame_interval,
            fragment_interval: self.options.fragment_interval,
            quality: self.options.jpeg_quality,
            tx: self.events_tx.clone(),
        };
        tokio::spawn(worker.run(stop_rx));

        self.stop_tx = Some(stop_tx);
        self.started_at = Some(Instant::now());
        self.state = RecordingState::Recording;
        info!("▶️  Recorder started ({:?} per frame)", self.frame_interval);
        Ok(())
    }

    /// Request the recorder to stop. Remaining frames are flushed as a last
    /// fragment, followed by `RecorderEvent::Stopped`.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if self.state != RecordingState::Recording {
            return Err(CaptureError::NotRecording);
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.stopped_at = Some(Instant::now());
        self.state = RecordingState::Stopped;
        info!("⏹️  Recorder stop requested after {:.2}s", self.duration());
        Ok(())
    }

    /// Wait for the next event. Returns `None` once the worker is gone and
    /// every event has been consumed.
    pub async fn next_event(&mut self) -> Option<RecorderEvent> {
        if self.state == RecordingState::Idle {
            return None;
        }
        self.events.recv().await
    }

    /// Take an already-delivered event without waiting
    pub fn try_next_event(&mut self) -> Option<RecorderEvent> {
        self.events.try_recv().ok()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Time between two captured frames
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Wall-clock recording duration in seconds
    pub fn duration(&self) -> f64 {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => stop.duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            debug!("Recorder dropped while recording, stopping worker");
            let _ = stop_tx.send(());
        }
    }
}

struct FragmentWorker {
    source: stream::SharedSource,
    live: Arc<AtomicBool>,
    frame_interval: Duration,
    fragment_interval: Duration,
    quality: u8,
    tx: mpsc::UnboundedSender<RecorderEvent>,
}

impl FragmentWorker {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending: Vec<u8> = Vec::new();
        let mut pending_frames = 0usize;
        let mut index = 0u64;
        let mut last_flush = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    if !self.live.load(Ordering::SeqCst) {
                        warn!("⚠️  Video track ended while recording");
                        let _ = self.tx.send(RecorderEvent::Error(CaptureError::TrackEnded));
                        break;
                    }

                    match self.grab_encoded() {
                        Ok(bytes) => {
                            pending.extend_from_slice(&bytes);
                            pending_frames += 1;
                        }
                        Err(e) => {
                            warn!("⚠️  Frame capture failed: {}", e);
                            let _ = self.tx.send(RecorderEvent::Error(e));
                            break;
                        }
                    }

                    if last_flush.elapsed() >= self.fragment_interval {
                        self.flush(&mut pending, &mut pending_frames, &mut index, started);
                        last_flush = Instant::now();
                    }
                }
            }
        }

        self.flush(&mut pending, &mut pending_frames, &mut index, started);
        debug!("Recorder worker finished after {} fragment(s)", index);
        let _ = self.tx.send(RecorderEvent::Stopped);
    }

    fn grab_encoded(&self) -> Result<Vec<u8>, CaptureError> {
        let frame = {
            let mut source = self
                .source
                .lock()
                .map_err(|_| CaptureError::DeviceUnavailable("frame source poisoned".to_string()))?;
            source.grab()?
        };
        mjpeg::encode_frame(&frame, self.quality)
    }

    fn flush(&self, pending: &mut Vec<u8>, pending_frames: &mut usize, index: &mut u64, started: Instant) {
        if pending.is_empty() {
            return;
        }

        let fragment = Fragment {
            index: *index,
            bytes: std::mem::take(pending),
            captured_at_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            "📦 Fragment {} ready: {} frame(s), {} bytes",
            fragment.index,
            pending_frames,
            fragment.bytes.len()
        );
        *index += 1;
        *pending_frames = 0;
        let _ = self.tx.send(RecorderEvent::Data(fragment));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_constraints() -> CaptureConstraints {
        CaptureConstraints {
            ideal_width: 32,
            ideal_height: 48,
            fps: 4,
            ..Default::default()
        }
    }

    async fn drain(recorder: &mut Recorder) -> (Vec<Fragment>, bool) {
        let mut fragments = Vec::new();
        let mut stopped = false;
        while let Some(event) = recorder.next_event().await {
            match event {
                RecorderEvent::Data(fragment) => fragments.push(fragment),
                RecorderEvent::Error(e) => panic!("unexpected recorder error: {}", e),
                RecorderEvent::Stopped => {
                    stopped = true;
                    break;
                }
            }
        }
        (fragments, stopped)
    }

    #[test]
    fn test_constraints_default() {
        let constraints = CaptureConstraints::default();
        assert_eq!(constraints.ideal_width, 720);
        assert_eq!(constraints.ideal_height, 1280);
        assert_eq!(constraints.facing, FacingMode::User);
        assert!(constraints.audio);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragments_arrive_in_order() {
        let camera = TestPatternCamera::new();
        let stream = camera.open(&small_constraints()).unwrap();
        let mut recorder = Recorder::new(&stream, RecorderOptions::default()).unwrap();

        recorder.start().unwrap();
        tokio::time::sleep(Duration::from_millis(3100)).await;
        recorder.stop().unwrap();

        let (fragments, stopped) = drain(&mut recorder).await;
        assert!(stopped);
        assert!(fragments.len() >= 3);
        for (i, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.index, i as u64);
            assert!(!fragment.is_empty());
        }

        let all: Vec<u8> = fragments.iter().flat_map(|f| f.bytes.clone()).collect();
        // 4 fps for a little over 3 seconds
        let frames = mjpeg::frame_count(&all).unwrap();
        assert!((12..=14).contains(&frames), "got {} frames", frames);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let camera = TestPatternCamera::new();
        let stream = camera.open(&small_constraints()).unwrap();
        let mut recorder = Recorder::new(&stream, RecorderOptions::default()).unwrap();

        recorder.start().unwrap();
        assert_eq!(recorder.start(), Err(CaptureError::AlreadyRecording));
        recorder.stop().unwrap();
        assert_eq!(recorder.stop(), Err(CaptureError::NotRecording));
        assert_eq!(recorder.state(), RecordingState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_track_ends_recording() {
        let camera = TestPatternCamera::new();
        let stream = camera.open(&small_constraints()).unwrap();
        let mut recorder = Recorder::new(&stream, RecorderOptions::default()).unwrap();

        recorder.start().unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        stream.stop_all();

        let mut saw_error = false;
        while let Some(event) = recorder.next_event().await {
            match event {
                RecorderEvent::Error(CaptureError::TrackEnded) => saw_error = true,
                RecorderEvent::Stopped => break,
                _ => {}
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn test_recorder_requires_live_track() {
        let camera = TestPatternCamera::new();
        let stream = camera.open(&small_constraints()).unwrap();
        stream.stop_all();
        assert!(matches!(
            Recorder::new(&stream, RecorderOptions::default()),
            Err(CaptureError::TrackEnded)
        ));
    }
}
