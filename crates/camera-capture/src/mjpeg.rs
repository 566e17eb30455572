//! Motion-JPEG container: a plain concatenation of baseline JPEG frames.
//!
//! Fragments emitted by the recorder are whole frames, so any ordered
//! concatenation of fragments is itself a valid stream.

use crate::CaptureError;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat, RgbImage};

pub const MIME_TYPE: &str = "video/x-motion-jpeg";

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;

/// Encode one RGB frame as a JPEG image
pub fn encode_frame(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut jpeg = Vec::with_capacity((frame.width() * frame.height() / 3) as usize);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(frame.as_raw(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CaptureError::Encoding(format!("jpeg encode: {}", e)))?;
    Ok(jpeg)
}

/// Split a stream into its JPEG frames
pub fn split_frames(data: &[u8]) -> Result<Vec<&[u8]>, CaptureError> {
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if data.len() - pos < 2 || data[pos] != MARKER || data[pos + 1] != SOI {
            return Err(CaptureError::Encoding(format!("expected start of frame at byte {}", pos)));
        }
        let end = frame_end(data, pos)
            .ok_or_else(|| CaptureError::Encoding(format!("truncated frame at byte {}", pos)))?;
        frames.push(&data[pos..end]);
        pos = end;
    }

    Ok(frames)
}

pub fn frame_count(data: &[u8]) -> Result<usize, CaptureError> {
    split_frames(data).map(|frames| frames.len())
}

/// Decode the frame at `index`
pub fn decode_frame(data: &[u8], index: usize) -> Result<RgbImage, CaptureError> {
    let frames = split_frames(data)?;
    let frame = frames
        .get(index)
        .ok_or_else(|| CaptureError::Encoding(format!("no frame at index {} ({} frames)", index, frames.len())))?;

    image::load_from_memory_with_format(frame, ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| CaptureError::Encoding(format!("jpeg decode: {}", e)))
}

// Walks marker segments from the SOI at `start`; returns the offset just past EOI.
fn frame_end(data: &[u8], start: usize) -> Option<usize> {
    let mut pos = start + 2;

    while pos + 1 < data.len() {
        if data[pos] != MARKER {
            return None;
        }

        let marker = data[pos + 1];
        match marker {
            MARKER => pos += 1,
            EOI => return Some(pos + 2),
            TEM | 0xD0..=0xD7 => pos += 2,
            _ => {
                if pos + 3 >= data.len() {
                    return None;
                }
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                if len < 2 {
                    return None;
                }
                pos += 2 + len;
                if marker == SOS {
                    pos = skip_entropy_data(data, pos)?;
                }
            }
        }
    }

    None
}

// Entropy-coded data stuffs 0xFF as FF 00; restart markers may be interleaved.
fn skip_entropy_data(data: &[u8], mut pos: usize) -> Option<usize> {
    while pos + 1 < data.len() {
        if data[pos] == MARKER {
            let next = data[pos + 1];
            if next == 0x00 || (0xD0..=0xD7).contains(&next) {
                pos += 2;
                continue;
            }
            return Some(pos);
        }
        pos += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb(rgb))
    }

    #[test]
    fn test_split_concatenated_frames() {
        let mut stream = Vec::new();
        for shade in [0u8, 120, 250] {
            stream.extend(encode_frame(&solid(16, 16, [shade, shade, shade]), 80).unwrap());
        }

        let frames = split_frames(&stream).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.iter().map(|f| f.len()).sum::<usize>(), stream.len());
    }

    #[test]
    fn test_decode_first_frame() {
        let mut stream = encode_frame(&solid(24, 40, [250, 10, 10]), 90).unwrap();
        stream.extend(encode_frame(&solid(24, 40, [10, 10, 250]), 90).unwrap());

        let first = decode_frame(&stream, 0).unwrap();
        assert_eq!(first.dimensions(), (24, 40));
        let pixel = first.get_pixel(12, 20);
        assert!(pixel[0] > 200 && pixel[2] < 60, "expected red, got {:?}", pixel);

        let second = decode_frame(&stream, 1).unwrap();
        assert!(second.get_pixel(12, 20)[2] > 200);
    }

    #[test]
    fn test_empty_stream_has_no_frames() {
        assert_eq!(frame_count(&[]).unwrap(), 0);
        assert!(decode_frame(&[], 0).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(split_frames(b"not a jpeg").is_err());

        let frame = encode_frame(&solid(8, 8, [1, 2, 3]), 80).unwrap();
        assert!(split_frames(&frame[..frame.len() - 10]).is_err());
    }
}
