// Playback controller: play/pause/mute and the auto-hiding control overlay

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use log::{debug, info, warn};

use crate::error::AppError;
use crate::gallery::VideoRecord;

/// The media element a record is played on
pub trait PlaybackSurface: Send {
    fn load(&mut self, media: &str, looping: bool) -> Result<(), AppError>;

    fn play(&mut self) -> Result<(), AppError>;

    fn pause(&mut self);

    fn set_muted(&mut self, muted: bool);

    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    pub playing: bool,
    pub muted: bool,
    pub controls_visible: bool,
}

pub struct PlaybackController {
    surface: Box<dyn PlaybackSurface>,
    record_id: String,
    state: PlayerState,
    hide_after: Duration,
    last_interaction: Instant,
    released: bool,
}

impl PlaybackController {
    /// Load the record and start playing it, looping and unmuted
    pub fn open(
        mut surface: Box<dyn PlaybackSurface>,
        record: &VideoRecord,
        hide_after: Duration,
        now: Instant,
    ) -> Result<Self, AppError> {
        surface.load(&record.media, true)?;
        surface.set_muted(false);

        let playing = match surface.play() {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️  Autoplay refused for {}: {}", record.id, e);
                false
            }
        };

        info!("▶️  Playing {} ({:.1}s)", record.id, record.duration_seconds);
        Ok(Self {
            surface,
            record_id: record.id.clone(),
            state: PlayerState {
                playing,
                muted: false,
                controls_visible: true,
            },
            hide_after,
            last_interaction: now,
            released: false,
        })
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn toggle_play(&mut self, now: Instant) -> PlayerState {
        if self.state.playing {
            self.surface.pause();
            self.state.playing = false;
        } else {
            match self.surface.play() {
                Ok(()) => self.state.playing = true,
                Err(e) => warn!("⚠️  Play refused: {}", e),
            }
        }
        self.show_controls(now);
        self.state
    }

    pub fn toggle_mute(&mut self, now: Instant) -> PlayerState {
        self.state.muted = !self.state.muted;
        self.surface.set_muted(self.state.muted);
        self.show_controls(now);
        self.state
    }

    /// A tap on the video flips the overlay right away
    pub fn tap(&mut self, now: Instant) -> PlayerState {
        if self.state.controls_visible {
            self.state.controls_visible = false;
        } else {
            self.show_controls(now);
        }
        self.state
    }

    /// Hide the overlay once it has been idle for `hide_after`
    pub fn poll(&mut self, now: Instant) -> PlayerState {
        if let Some(deadline) = self.hide_deadline() {
            if now >= deadline {
                debug!("Hiding player controls");
                self.state.controls_visible = false;
            }
        }
        self.state
    }

    /// When the overlay will hide if nothing happens
    pub fn hide_deadline(&self) -> Option<Instant> {
        self.state
            .controls_visible
            .then(|| self.last_interaction + self.hide_after)
    }

    /// Release the media handle; returns the record that was playing
    pub fn close(mut self) -> String {
        self.release();
        std::mem::take(&mut self.record_id)
    }

    fn show_controls(&mut self, now: Instant) {
        self.state.controls_visible = true;
        self.last_interaction = now;
    }

    fn release(&mut self) {
        if !self.released {
            self.surface.release();
            self.released = true;
            debug!("Released playback surface for {}", self.record_id);
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.release();
    }
}

/// What a `HeadlessSurface` has been told to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceState {
    pub media: Option<String>,
    pub looping: bool,
    pub playing: bool,
    pub muted: bool,
    pub released: bool,
}

/// Surface without a display. Clones share state, so a handle kept outside
/// the controller observes what the controller did.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    state: Arc<Mutex<SurfaceState>>,
    refuse_play: bool,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface that rejects `play`, like a browser blocking autoplay
    pub fn refusing_play() -> Self {
        Self {
            refuse_play: true,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> SurfaceState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PlaybackSurface for HeadlessSurface {
    fn load(&mut self, media: &str, looping: bool) -> Result<(), AppError> {
        let mut state = self.lock();
        state.media = Some(media.to_string());
        state.looping = looping;
        state.released = false;
        Ok(())
    }

    fn play(&mut self) -> Result<(), AppError> {
        if self.refuse_play {
            return Err(AppError::EncodingFailure("playback was blocked".to_string()));
        }
        self.lock().playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.lock().playing = false;
    }

    fn set_muted(&mut self, muted: bool) {
        self.lock().muted = muted;
    }

    fn release(&mut self) {
        let mut state = self.lock();
        state.playing = false;
        state.media = None;
        state.released = true;
    }
}
