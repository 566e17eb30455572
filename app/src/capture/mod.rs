// Capture session: owns the camera stream and drives one recording at a time

mod accumulator;

pub use accumulator::RecordingAccumulator;

use camera_capture::{
    CaptureConstraints, CaptureDevice, Fragment, MediaStream, Recorder, RecorderEvent, RecorderOptions,
    RecordingState,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use log::{debug, info, warn};

use crate::error::AppError;

pub const DEFAULT_MAX_SECONDS: u32 = 10;

/// Everything the finalizer needs from a finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedClip {
    pub fragments: Vec<Fragment>,
    pub elapsed_seconds: f64,
    pub mime_type: String,
}

/// Progress bar state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Countdown {
    pub elapsed: u32,
    pub max: u32,
    pub progress: f32,
}

pub struct CaptureSession {
    stream: Option<MediaStream>,
    recorder: Option<Recorder>,
    // Set once the recorder's `Stopped` event has been consumed
    recorder_done: bool,
    options: RecorderOptions,
    accumulator: RecordingAccumulator,
    elapsed: u32,
    max_seconds: u32,
}

impl CaptureSession {
    /// Acquire the camera (and microphone if requested). The device may
    /// block on a permission prompt, so it is opened on the blocking pool.
    pub async fn open(
        device: Arc<dyn CaptureDevice>,
        constraints: CaptureConstraints,
    ) -> Result<Self, AppError> {
        info!("📷 Opening {}...", device.name());

        let stream = tokio::task::spawn_blocking(move || device.open(&constraints))
            .await
            .map_err(|e| AppError::PermissionDenied(format!("camera open task failed: {}", e)))?
            .map_err(|e| {
                warn!("⚠️  Camera unavailable: {}", e);
                AppError::from(e)
            })?;

        Ok(Self {
            stream: Some(stream),
            recorder: None,
            recorder_done: false,
            options: RecorderOptions::default(),
            accumulator: RecordingAccumulator::new(),
            elapsed: 0,
            max_seconds: DEFAULT_MAX_SECONDS,
        })
    }

    pub fn with_recorder_options(mut self, options: RecorderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_seconds(mut self, max_seconds: u32) -> Self {
        self.max_seconds = max_seconds.max(1);
        self
    }

    /// Live stream for the preview surface
    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.stream.as_ref().map_or(false, MediaStream::is_active)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder
            .as_ref()
            .map_or(false, |r| r.state() == RecordingState::Recording)
    }

    pub fn countdown(&self) -> Countdown {
        Countdown {
            elapsed: self.elapsed,
            max: self.max_seconds,
            progress: self.elapsed as f32 / self.max_seconds as f32,
        }
    }

    /// Start a new recording. Returns `false` without doing anything when a
    /// recording is already running or the stream is closed.
    pub fn start_recording(&mut self) -> Result<bool, AppError> {
        if self.is_recording() {
            debug!("Start ignored, already recording");
            return Ok(false);
        }
        let stream = match self.stream.as_ref() {
            Some(stream) if stream.is_active() => stream,
            _ => {
                debug!("Start ignored, stream is closed");
                return Ok(false);
            }
        };

        let mut recorder = Recorder::new(stream, self.options.clone())?;
        recorder.start()?;

        self.accumulator.clear();
        self.elapsed = 0;
        self.recorder_done = false;
        self.recorder = Some(recorder);
        info!("🎬 Recording started (max {}s)", self.max_seconds);
        Ok(true)
    }

    /// One countdown second. Collects fragments emitted so far and stops the
    /// recording once the ceiling is reached.
    pub async fn tick(&mut self) -> Option<CapturedClip> {
        if !self.is_recording() {
            return None;
        }

        self.elapsed = (self.elapsed + 1).min(self.max_seconds);
        self.pull_fragments();
        debug!("⏱️  {}/{}s, {} fragment(s)", self.elapsed, self.max_seconds, self.accumulator.len());

        if self.elapsed >= self.max_seconds {
            let ceiling = self.max_seconds as f64;
            info!("⏱️  Reached {}s, stopping automatically", self.max_seconds);
            return self.finish(Some(ceiling)).await;
        }
        None
    }

    /// Stop the recording and collect every remaining fragment
    pub async fn stop_recording(&mut self) -> Option<CapturedClip> {
        self.finish(None).await
    }

    /// Record until `stop` resolves or the ceiling is reached, ticking once
    /// per second. Starts a recording if none is running.
    pub async fn record_until<F>(&mut self, stop: F) -> Result<Option<CapturedClip>, AppError>
    where
        F: Future<Output = ()>,
    {
        if !self.is_recording() && !self.start_recording()? {
            return Ok(None);
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        tokio::pin!(stop);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => return Ok(self.stop_recording().await),
                _ = ticker.tick() => {
                    if let Some(clip) = self.tick().await {
                        return Ok(Some(clip));
                    }
                    if !self.is_recording() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Stop every track. Safe to call repeatedly; also runs on drop.
    pub fn close(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            if recorder.state() == RecordingState::Recording {
                let _ = recorder.stop();
            }
        }
        self.accumulator.clear();

        if let Some(stream) = self.stream.take() {
            stream.stop_all();
            info!("📷 Camera released");
        }
    }

    fn pull_fragments(&mut self) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        while let Some(event) = recorder.try_next_event() {
            absorb(&mut self.accumulator, &mut self.recorder_done, event);
        }
    }

    async fn finish(&mut self, clamp_to: Option<f64>) -> Option<CapturedClip> {
        let mut recorder = self.recorder.take()?;
        if recorder.state() != RecordingState::Recording {
            return None;
        }
        if let Err(e) = recorder.stop() {
            warn!("⚠️  Recorder stop failed: {}", e);
        }

        while !self.recorder_done {
            match recorder.next_event().await {
                Some(event) => absorb(&mut self.accumulator, &mut self.recorder_done, event),
                None => break,
            }
        }

        // A stop right after start still spans at least one frame
        let measured = recorder
            .duration()
            .max(recorder.frame_interval().as_secs_f64())
            .min(self.max_seconds as f64);
        let elapsed_seconds = clamp_to.unwrap_or(measured);

        let total_bytes = self.accumulator.total_bytes();
        let fragments = self.accumulator.take();
        info!(
            "⏹️  Recording stopped: {:.2}s, {} fragment(s), {} bytes, last at {}ms",
            elapsed_seconds,
            fragments.len(),
            total_bytes,
            fragments.last().map_or(0, |f| f.captured_at_ms)
        );

        Some(CapturedClip {
            fragments,
            elapsed_seconds,
            mime_type: recorder.mime_type().to_string(),
        })
    }
}

fn absorb(accumulator: &mut RecordingAccumulator, done: &mut bool, event: RecorderEvent) {
    match event {
        RecorderEvent::Data(fragment) => {
            accumulator.push(fragment);
        }
        RecorderEvent::Error(e) => warn!("⚠️  Recorder error: {}", e),
        RecorderEvent::Stopped => *done = true,
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
