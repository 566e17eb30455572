// Media streams, tracks and the device seam

use crate::{CaptureConstraints, CaptureError};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use log::info;

pub(crate) type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// Produces decoded video frames for a live stream
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<RgbImage, CaptureError>;
}

/// A camera/microphone that can be opened into a live stream
pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire a stream matching the constraints as closely as possible.
    /// Refusal surfaces as `CaptureError::PermissionDenied`.
    fn open(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One track of a media stream
#[derive(Debug, Clone)]
pub struct Track {
    kind: TrackKind,
    label: String,
    live: Arc<AtomicBool>,
}

impl Track {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop the track. Idempotent.
    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub(crate) fn liveness(&self) -> Arc<AtomicBool> {
        self.live.clone()
    }
}

/// Settings a device actually granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Live input stream returned by a `CaptureDevice`
pub struct MediaStream {
    tracks: Vec<Track>,
    settings: StreamSettings,
    source: SharedSource,
}

impl MediaStream {
    pub fn new(tracks: Vec<Track>, settings: StreamSettings, source: Box<dyn FrameSource>) -> Self {
        Self {
            tracks,
            settings,
            source: Arc::new(Mutex::new(source)),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn settings(&self) -> StreamSettings {
        self.settings
    }

    /// True while at least one track is live
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(Track::is_live)
    }

    /// Stop every track
    pub fn stop_all(&self) {
        let live = self.tracks.iter().filter(|t| t.is_live()).count();
        for track in &self.tracks {
            track.stop();
        }
        if live > 0 {
            info!("🛑 Stopped {} live track(s)", live);
        }
    }

    pub(crate) fn source(&self) -> SharedSource {
        self.source.clone()
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("tracks", &self.tracks)
            .field("settings", &self.settings)
            .finish()
    }
}
