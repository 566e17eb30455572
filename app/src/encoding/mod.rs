// Finalizer: turns a captured clip into a storable gallery record

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use camera_capture::{mjpeg, Fragment};
use chrono::Utc;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};

use crate::capture::CapturedClip;
use crate::config::ThumbnailSettings;
use crate::error::AppError;
use crate::gallery::VideoRecord;

pub const THUMBNAIL_MIME: &str = "image/jpeg";

/// One contiguous media object tagged with its container type
#[derive(Debug, Clone, PartialEq)]
pub struct MediaBlob {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaBlob {
    /// Concatenate fragments in order
    pub fn assemble(fragments: &[Fragment], mime_type: &str) -> Result<Self, AppError> {
        if fragments.is_empty() {
            return Err(AppError::EncodingFailure("no media was recorded".to_string()));
        }

        let bytes = fragments.iter().flat_map(|f| f.bytes.iter().copied()).collect::<Vec<u8>>();
        Ok(Self {
            mime_type: mime_type.to_string(),
            bytes,
        })
    }

    pub fn to_data_url(&self) -> String {
        data_url(&self.mime_type, &self.bytes)
    }
}

/// `data:<mime>;base64,<payload>`
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Opens media blobs for seeking and frame grabs. Calls may block.
pub trait MediaDecoder: Send + Sync {
    fn load(&self, blob: &MediaBlob) -> Result<Box<dyn LoadedMedia>, AppError>;
}

/// A loaded media handle
pub trait LoadedMedia: Send {
    /// Intrinsic duration in seconds, if the container knows it
    fn duration(&self) -> Option<f64>;

    fn seek(&mut self, seconds: f64) -> Result<(), AppError>;

    /// Decoded frame at the current position
    fn frame(&self) -> Result<RgbImage, AppError>;
}

/// Decoder for the recorder's Motion-JPEG output
#[derive(Debug, Clone)]
pub struct MjpegDecoder {
    fps: u32,
}

impl MjpegDecoder {
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }
}

impl MediaDecoder for MjpegDecoder {
    fn load(&self, blob: &MediaBlob) -> Result<Box<dyn LoadedMedia>, AppError> {
        if blob.mime_type != mjpeg::MIME_TYPE {
            return Err(AppError::EncodingFailure(format!(
                "unsupported media type {}",
                blob.mime_type
            )));
        }

        let frames = mjpeg::frame_count(&blob.bytes)?;
        if frames == 0 {
            return Err(AppError::EncodingFailure("media has no frames".to_string()));
        }

        Ok(Box::new(MjpegMedia {
            data: blob.bytes.clone(),
            frames,
            fps: self.fps,
            position: 0,
        }))
    }
}

struct MjpegMedia {
    data: Vec<u8>,
    frames: usize,
    fps: u32,
    position: usize,
}

impl LoadedMedia for MjpegMedia {
    fn duration(&self) -> Option<f64> {
        Some(self.frames as f64 / self.fps as f64)
    }

    fn seek(&mut self, seconds: f64) -> Result<(), AppError> {
        let frame = (seconds.max(0.0) * self.fps as f64).floor() as usize;
        self.position = frame.min(self.frames - 1);
        Ok(())
    }

    fn frame(&self) -> Result<RgbImage, AppError> {
        Ok(mjpeg::decode_frame(&self.data, self.position)?)
    }
}

pub struct Finalizer {
    decoder: Arc<dyn MediaDecoder>,
    settings: ThumbnailSettings,
}

impl Finalizer {
    pub fn new(decoder: Arc<dyn MediaDecoder>, settings: ThumbnailSettings) -> Self {
        Self { decoder, settings }
    }

    /// Assemble the clip, grab the first frame as a thumbnail and encode
    /// both as data URLs. On error the clip is dropped.
    pub async fn finalize(&self, clip: CapturedClip) -> Result<VideoRecord, AppError> {
        let blob = Arc::new(MediaBlob::assemble(&clip.fragments, &clip.mime_type)?);
        info!("🔄 Finalizing {:.2}s clip ({} bytes)...", clip.elapsed_seconds, blob.bytes.len());
        let thumbnail = self.thumbnail(blob.clone()).await?;
        let media = blob.to_data_url();

        let record = new_record(media, thumbnail, clip.elapsed_seconds);
        info!("✅ Clip {} finalized", record.id);
        Ok(record)
    }

    /// Accept without a thumbnail. Duration comes from the media itself,
    /// falling back to the elapsed recording time.
    pub async fn finalize_without_thumbnail(&self, clip: CapturedClip) -> Result<VideoRecord, AppError> {
        let blob = Arc::new(MediaBlob::assemble(&clip.fragments, &clip.mime_type)?);

        let duration = match self.intrinsic_duration(blob.clone()).await {
            Some(seconds) => seconds,
            None => {
                debug!("Media duration unavailable, using elapsed time");
                clip.elapsed_seconds
            }
        };

        let record = new_record(blob.to_data_url(), String::new(), duration);
        info!("✅ Clip {} saved without thumbnail", record.id);
        Ok(record)
    }

    async fn thumbnail(&self, blob: Arc<MediaBlob>) -> Result<String, AppError> {
        let decoder = self.decoder.clone();
        let settings = self.settings.clone();

        let task = tokio::task::spawn_blocking(move || -> Result<String, AppError> {
            let mut media = decoder.load(&blob)?;
            debug!("Thumbnail source loaded");
            media.seek(0.0)?;
            debug!("Thumbnail source seeked");
            let frame = media.frame()?;
            encode_thumbnail(&frame, &settings)
        });

        match tokio::time::timeout(self.timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AppError::EncodingFailure(format!("thumbnail task failed: {}", e))),
            Err(_) => {
                warn!("⚠️  Thumbnail decode did not finish within {:?}", self.timeout());
                Err(AppError::EncodingFailure("thumbnail timed out".to_string()))
            }
        }
    }

    async fn intrinsic_duration(&self, blob: Arc<MediaBlob>) -> Option<f64> {
        let decoder = self.decoder.clone();
        let task = tokio::task::spawn_blocking(move || decoder.load(&blob).map(|media| media.duration()));

        match tokio::time::timeout(self.timeout(), task).await {
            Ok(Ok(Ok(duration))) => duration.filter(|d| d.is_finite() && *d > 0.0),
            Ok(Ok(Err(e))) => {
                warn!("⚠️  Could not read media duration: {}", e);
                None
            }
            _ => None,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }
}

fn new_record(media: String, thumbnail: String, duration_seconds: f64) -> VideoRecord {
    let created_at = Utc::now().timestamp_millis();
    VideoRecord {
        id: created_at.to_string(),
        media,
        thumbnail,
        duration_seconds,
        created_at,
    }
}

/// Fit the frame inside the thumbnail box and encode it as a JPEG data URL
fn encode_thumbnail(frame: &RgbImage, settings: &ThumbnailSettings) -> Result<String, AppError> {
    let (width, height) = fit_within(
        frame.width(),
        frame.height(),
        settings.max_width,
        settings.max_height,
    );

    let jpeg = if (width, height) == frame.dimensions() {
        mjpeg::encode_frame(frame, settings.jpeg_quality)?
    } else {
        let scaled = imageops::resize(frame, width, height, FilterType::Triangle);
        mjpeg::encode_frame(&scaled, settings.jpeg_quality)?
    };

    debug!("🖼️  Thumbnail {}x{}, {} bytes", width, height, jpeg.len());
    Ok(data_url(THUMBNAIL_MIME, &jpeg))
}

// Largest size with the same aspect ratio inside max_w x max_h; never upscales
fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let scale = (max_w as f64 / width as f64)
        .min(max_h as f64 / height as f64)
        .min(1.0);
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn clip_of(frames: usize, width: u32, height: u32, elapsed: f64) -> CapturedClip {
        let fragments = (0..frames)
            .map(|i| {
                let frame = RgbImage::from_pixel(width, height, Rgb([200, (i * 20) as u8, 40]));
                Fragment {
                    index: i as u64,
                    bytes: mjpeg::encode_frame(&frame, 80).unwrap(),
                    captured_at_ms: i as u64 * 250,
                }
            })
            .collect();
        CapturedClip {
            fragments,
            elapsed_seconds: elapsed,
            mime_type: mjpeg::MIME_TYPE.to_string(),
        }
    }

    fn finalizer() -> Finalizer {
        Finalizer::new(Arc::new(MjpegDecoder::new(4)), ThumbnailSettings::default())
    }

    fn decode_data_url(url: &str, mime: &str) -> Vec<u8> {
        let prefix = format!("data:{};base64,", mime);
        assert!(url.starts_with(&prefix), "unexpected data url prefix");
        STANDARD.decode(&url[prefix.len()..]).unwrap()
    }

    /// Blocks in `load` until the test drops the sender
    struct StalledDecoder {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl MediaDecoder for StalledDecoder {
        fn load(&self, _blob: &MediaBlob) -> Result<Box<dyn LoadedMedia>, AppError> {
            let _ = self.release.lock().unwrap().recv();
            Err(AppError::EncodingFailure("released".to_string()))
        }
    }

    #[tokio::test]
    async fn test_finalize_produces_media_and_thumbnail() {
        let record = finalizer().finalize(clip_of(6, 400, 400, 3.0)).await.unwrap();

        assert_eq!(record.id, record.created_at.to_string());
        assert_eq!(record.duration_seconds, 3.0);

        let media = decode_data_url(&record.media, mjpeg::MIME_TYPE);
        assert_eq!(mjpeg::frame_count(&media).unwrap(), 6);

        let thumb = decode_data_url(&record.thumbnail, THUMBNAIL_MIME);
        let thumb = image::load_from_memory(&thumb).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (320, 320));
    }

    #[tokio::test]
    async fn test_empty_clip_fails() {
        let err = finalizer().finalize(clip_of(0, 8, 8, 1.0)).await.unwrap_err();
        assert_eq!(err.code(), "ENCODING_FAILURE");
    }

    #[tokio::test]
    async fn test_undecodable_media_fails() {
        let mut clip = clip_of(1, 8, 8, 1.0);
        clip.fragments[0].bytes = vec![0, 1, 2, 3];
        assert!(matches!(
            finalizer().finalize(clip).await,
            Err(AppError::EncodingFailure(_))
        ));

        let mut clip = clip_of(1, 8, 8, 1.0);
        clip.mime_type = "video/webm".to_string();
        assert!(finalizer().finalize(clip).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_thumbnail_times_out() {
        let (release, rx) = mpsc::channel();
        let settings = ThumbnailSettings {
            timeout_ms: 50,
            ..Default::default()
        };
        let finalizer = Finalizer::new(Arc::new(StalledDecoder { release: Mutex::new(rx) }), settings);

        let err = finalizer.finalize(clip_of(2, 8, 8, 2.0)).await.unwrap_err();
        assert_eq!(err, AppError::EncodingFailure("thumbnail timed out".to_string()));
        drop(release);
    }

    #[tokio::test]
    async fn test_without_thumbnail_uses_intrinsic_duration() {
        // 6 frames at 4 fps
        let record = finalizer()
            .finalize_without_thumbnail(clip_of(6, 8, 8, 2.0))
            .await
            .unwrap();
        assert_eq!(record.thumbnail, "");
        assert_eq!(record.duration_seconds, 1.5);
        assert!(record.media.starts_with("data:video/x-motion-jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_without_thumbnail_falls_back_to_elapsed() {
        let mut clip = clip_of(2, 8, 8, 4.0);
        clip.mime_type = "video/webm".to_string();
        let record = finalizer().finalize_without_thumbnail(clip).await.unwrap();
        assert_eq!(record.duration_seconds, 4.0);
        assert!(record.media.starts_with("data:video/webm;base64,"));
    }

    #[test]
    fn test_fit_within() {
        let (w, h) = fit_within(720, 1280, 320, 568);
        assert_eq!(h, 568);
        assert!((319..=320).contains(&w));
        assert_eq!(fit_within(100, 50, 320, 568), (100, 50));
        assert_eq!(fit_within(1000, 100, 320, 568), (320, 32));
    }
}
