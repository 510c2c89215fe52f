//! Image compression before transmission or storage.
//!
//! Captured photos are scaled down to fit 800x800 and re-encoded as JPEG at
//! quality 0.7 so two of them fit in a single vision request and a few fit
//! in the persisted history. Compression is best-effort: bytes that cannot
//! be decoded are passed through untouched.

use std::fmt;
use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_WIDTH: u32 = 800;
pub const DEFAULT_MAX_HEIGHT: u32 = 800;
pub const DEFAULT_QUALITY: f32 = 0.7;

/// Media type assumed when the bytes match no known image signature.
pub const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No image data was captured")]
    Empty,

    #[error("Invalid image payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to encode image to JPEG: {0}")]
    Encode(String),

    #[error("Image worker failed: {0}")]
    Worker(String),
}

/// Bounds and quality for [`compress`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// Lossy quality in `0.0..=1.0`.
    pub quality: f32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl CompressionOptions {
    fn jpeg_quality(&self) -> u8 {
        (self.quality.clamp(0.01, 1.0) * 100.0).round() as u8
    }
}

/// Encoded image bytes. Serialized as a `data:` URI so persisted entries can
/// be rendered directly.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ImageData(Vec<u8>);

impl ImageData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Media type sniffed from the leading bytes. Compressed output is
    /// always JPEG; a passthrough keeps whatever format it arrived in.
    pub fn media_type(&self) -> &'static str {
        media_type_of(&self.0)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type(), self.to_base64())
    }

    /// Decode a base64 payload, with or without a `data:...;base64,` prefix.
    pub fn from_data_uri(payload: &str) -> Result<Self, CaptureError> {
        let encoded = match payload.split_once(',') {
            Some((_, data)) => data,
            None => payload,
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CaptureError::InvalidPayload(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageData({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for ImageData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for ImageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_uri())
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageData::from_data_uri(&s).map_err(serde::de::Error::custom)
    }
}

/// Media type of encoded image bytes, [`DEFAULT_MEDIA_TYPE`] when unknown.
pub fn media_type_of(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or(DEFAULT_MEDIA_TYPE)
}

/// Scale an image to fit the bounds and re-encode it as JPEG.
///
/// Returns the original bytes when they cannot be decoded. Fails only when
/// there is nothing to compress or the JPEG encoder rejects the image.
pub fn compress(image_bytes: &[u8], options: &CompressionOptions) -> Result<Vec<u8>, CaptureError> {
    if image_bytes.is_empty() {
        return Err(CaptureError::Empty);
    }

    let img = match image::load_from_memory(image_bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("Could not decode captured image, keeping original bytes: {}", e);
            return Ok(image_bytes.to_vec());
        }
    };

    debug!("Loaded image: {}x{}", img.width(), img.height());
    let resized = fit_within(img, options.max_width, options.max_height);
    let jpeg = encode_jpeg(&resized, options.jpeg_quality())?;

    info!(
        "Compressed image to {}x{}: {} -> {} bytes",
        resized.width(),
        resized.height(),
        image_bytes.len(),
        jpeg.len()
    );
    Ok(jpeg)
}

/// [`compress`] on the blocking pool, so decoding never stalls the runtime.
pub async fn compress_async(
    image_bytes: Vec<u8>,
    options: CompressionOptions,
) -> Result<Vec<u8>, CaptureError> {
    tokio::task::spawn_blocking(move || compress(&image_bytes, &options))
        .await
        .map_err(|e| CaptureError::Worker(e.to_string()))?
}

/// Target dimensions after scaling by the binding dimension.
fn target_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_width);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_height);
    (new_width, new_height)
}

fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    let (new_width, new_height) = target_dimensions(width, height, max_width, max_height);

    if (new_width, new_height) == (width, height) {
        return img;
    }

    img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}
