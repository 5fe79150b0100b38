use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "ico",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ogv", "ts", "m2ts", "mts",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

/// Classify a path by its extension. Returns `None` for anything that is
/// neither a supported image nor a supported video container.
pub fn media_type_for_path(path: &Path) -> Option<MediaType> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// One unit of work handed to the analyzer by the enumeration collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Unique per item within a batch, normally the path.
    pub identity: String,
    /// Where the decoder finds the bytes.
    pub source: PathBuf,
    pub media_type: MediaType,
    pub file_size: u64,
    pub file_name: String,
    /// SHA-256 of the bytes, when the scan computed one. Byte-identical
    /// files share it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_key: Option<String>,
}

impl MediaItem {
    pub fn new(
        identity: impl Into<String>,
        source: impl Into<PathBuf>,
        media_type: MediaType,
        file_size: u64,
    ) -> Self {
        let source = source.into();
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            identity: identity.into(),
            source,
            media_type,
            file_size,
            file_name,
            content_key: None,
        }
    }

    pub fn with_content_key(mut self, key: impl Into<String>) -> Self {
        self.content_key = Some(key.into());
        self
    }

    /// Key for the analysis store: the content key when known, so a cached
    /// analysis follows the bytes across renames.
    pub fn store_key(&self) -> &str {
        self.content_key.as_deref().unwrap_or(&self.identity)
    }
}

/// Raw technical facts about an item, persisted alongside its analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalMetrics {
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub format: Option<String>,
}

impl TechnicalMetrics {
    pub fn for_item(item: &MediaItem, grid: &PixelGrid) -> Self {
        let format = item
            .source
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());

        Self {
            width: grid.width(),
            height: grid.height(),
            file_size: item.file_size,
            format,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Encoded bits per decoded pixel, `None` for a zero-area item.
    pub fn bits_per_pixel(&self) -> Option<f64> {
        let pixels = self.pixel_count();
        if pixels == 0 {
            return None;
        }
        Some(self.file_size as f64 * 8.0 / pixels as f64)
    }
}

/// Decoded RGB pixels of an image, or of the representative frame of a video.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    image: RgbImage,
}

impl PixelGrid {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.to_rgb8())
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> [u8; 3],
    {
        Self::new(RgbImage::from_fn(width, height, |x, y| Rgb(f(x, y))))
    }

    /// Grayscale grid where every channel carries `f(x, y)`.
    pub fn from_luma_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> u8,
    {
        Self::from_fn(width, height, |x, y| {
            let v = f(x, y);
            [v, v, v]
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.image
    }

    pub fn luma(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Grayscale resample to exactly `width` x `height`.
    pub fn luma_resized(&self, width: u32, height: u32) -> GrayImage {
        imageops::resize(&self.luma(), width, height, FilterType::Triangle)
    }

    /// Copy whose long edge is at most `max_edge`, keeping the aspect ratio.
    /// Grids already within bounds are cloned unchanged.
    pub fn bounded(&self, max_edge: u32) -> PixelGrid {
        let (width, height) = self.dimensions();
        let long_edge = width.max(height);
        if long_edge <= max_edge || self.is_empty() {
            return self.clone();
        }

        let scale = max_edge as f64 / long_edge as f64;
        let new_width = ((width as f64 * scale).round() as u32).max(1);
        let new_height = ((height as f64 * scale).round() as u32).max(1);
        PixelGrid::new(imageops::resize(
            &self.image,
            new_width,
            new_height,
            FilterType::Triangle,
        ))
    }
}

impl From<DynamicImage> for PixelGrid {
    fn from(image: DynamicImage) -> Self {
        Self::from_dynamic(image)
    }
}
