// Synthetic capture device producing moving colour bars

use crate::stream::{CaptureDevice, FrameSource, MediaStream, StreamSettings, Track, TrackKind};
use crate::{CaptureConstraints, CaptureError};
use image::{Rgb, RgbImage};
use log::{info, warn};

const MAX_DIMENSION: u32 = 1920;
const BARS: [[u8; 3]; 7] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Granted,
    Denied,
    Unavailable,
}

/// Headless camera that renders a test pattern at the requested size
#[derive(Debug, Clone)]
pub struct TestPatternCamera {
    name: String,
    access: Access,
}

impl TestPatternCamera {
    pub fn new() -> Self {
        Self {
            name: "Test Pattern Camera".to_string(),
            access: Access::Granted,
        }
    }

    /// A device whose user refuses camera/microphone access
    pub fn denied() -> Self {
        Self {
            access: Access::Denied,
            ..Self::new()
        }
    }

    /// A device that is missing or busy
    pub fn unavailable() -> Self {
        Self {
            access: Access::Unavailable,
            ..Self::new()
        }
    }
}

impl Default for TestPatternCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for TestPatternCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
        match self.access {
            Access::Denied => {
                warn!("📷 {} access denied", self.name);
                return Err(CaptureError::PermissionDenied(
                    "camera and microphone access was refused".to_string(),
                ));
            }
            Access::Unavailable => {
                warn!("📷 {} is not available", self.name);
                return Err(CaptureError::DeviceUnavailable(self.name.clone()));
            }
            Access::Granted => {}
        }

        let settings = StreamSettings {
            width: constraints.ideal_width.clamp(2, MAX_DIMENSION),
            height: constraints.ideal_height.clamp(2, MAX_DIMENSION),
            fps: constraints.fps.clamp(1, 60),
        };

        let mut tracks = vec![Track::new(TrackKind::Video, self.name.clone())];
        if constraints.audio {
            tracks.push(Track::new(TrackKind::Audio, "Test Tone Microphone"));
        }

        info!(
            "📷 Opened {} at {}x{} @ {} fps (audio: {})",
            self.name, settings.width, settings.height, settings.fps, constraints.audio
        );

        Ok(MediaStream::new(
            tracks,
            settings,
            Box::new(PatternSource {
                width: settings.width,
                height: settings.height,
                frame: 0,
            }),
        ))
    }
}

struct PatternSource {
    width: u32,
    height: u32,
    frame: u32,
}

impl FrameSource for PatternSource {
    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        let bar_width = (self.width / BARS.len() as u32).max(1);
        let shift = self.frame;
        let image = RgbImage::from_fn(self.width, self.height, |x, _y| {
            let bar = ((x + shift) / bar_width) as usize % BARS.len();
            Rgb(BARS[bar])
        });
        self.frame = self.frame.wrapping_add(1);
        Ok(image)
    }
}
