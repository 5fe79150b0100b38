use crate::core::image::{MediaItem, MediaType, PixelGrid};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame extraction failed: {message}")]
    FrameExtraction { message: String },

    #[error("Decoded image is empty")]
    Empty,
}

/// Turns an item into pixels. Implementations must be shareable across the
/// analyzer's worker threads.
pub trait Decoder: Send + Sync {
    fn decode(&self, item: &MediaItem) -> Result<PixelGrid, DecodeError>;
}

fn non_empty(grid: PixelGrid) -> Result<PixelGrid, DecodeError> {
    if grid.is_empty() {
        Err(DecodeError::Empty)
    } else {
        Ok(grid)
    }
}

/// Still images through the `image` crate.
pub struct ImageDecoder;

impl ImageDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ImageDecoder {
    fn decode(&self, item: &MediaItem) -> Result<PixelGrid, DecodeError> {
        let image = image::open(&item.source)?;
        non_empty(PixelGrid::from_dynamic(image))
    }
}

/// Grabs one representative frame from a video with an external `ffmpeg`.
pub struct FfmpegFrameDecoder {
    binary: String,
    offset_secs: f64,
}

impl FfmpegFrameDecoder {
    pub fn new(offset_secs: f64) -> Self {
        Self::with_binary("ffmpeg", offset_secs)
    }

    pub fn with_binary(binary: impl Into<String>, offset_secs: f64) -> Self {
        Self {
            binary: binary.into(),
            offset_secs: offset_secs.max(0.0),
        }
    }

    fn grab_frame(&self, item: &MediaItem, offset_secs: f64) -> Result<Vec<u8>, DecodeError> {
        let output = Command::new(&self.binary)
            .args(["-v", "error", "-ss"])
            .arg(format!("{:.3}", offset_secs))
            .arg("-i")
            .arg(&item.source)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecodeError::FrameExtraction {
                message: format!("{} exited with {}: {}", self.binary, output.status, stderr.trim()),
            });
        }
        Ok(output.stdout)
    }
}

impl Decoder for FfmpegFrameDecoder {
    fn decode(&self, item: &MediaItem) -> Result<PixelGrid, DecodeError> {
        let mut frame = self.grab_frame(item, self.offset_secs)?;
        // Clips shorter than the offset produce no frame; fall back to the start.
        if frame.is_empty() && self.offset_secs > 0.0 {
            log::debug!("No frame at {:.3}s in {}, retrying at 0", self.offset_secs, item.file_name);
            frame = self.grab_frame(item, 0.0)?;
        }
        if frame.is_empty() {
            return Err(DecodeError::FrameExtraction {
                message: format!("no frame decoded from {}", item.source.display()),
            });
        }

        let image = image::load_from_memory(&frame)?;
        non_empty(PixelGrid::from_dynamic(image))
    }
}

/// Dispatches on media type.
pub struct MediaDecoder {
    images: ImageDecoder,
    videos: FfmpegFrameDecoder,
}

impl MediaDecoder {
    pub fn new(video_frame_offset_secs: f64) -> Self {
        Self {
            images: ImageDecoder::new(),
            videos: FfmpegFrameDecoder::new(video_frame_offset_secs),
        }
    }

    pub fn with_video_decoder(videos: FfmpegFrameDecoder) -> Self {
        Self {
            images: ImageDecoder::new(),
            videos,
        }
    }
}

impl Decoder for MediaDecoder {
    fn decode(&self, item: &MediaItem) -> Result<PixelGrid, DecodeError> {
        match item.media_type {
            MediaType::Image => self.images.decode(item),
            MediaType::Video => self.videos.decode(item),
        }
    }
}
