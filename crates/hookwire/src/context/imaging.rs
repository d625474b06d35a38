//! Image encoding capability used by the image responders.
//!
//! Decoded images from the `image` crate encode to either format. Bytes
//! that are already encoded pass through when the format matches and are
//! transcoded otherwise.

use bytes::Bytes;
use image::{DynamicImage, RgbImage, RgbaImage};
use std::fmt;
use std::io::Cursor;

/// Output format for [`EncodeImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// JPEG for `.jpg`/`.jpeg` paths, PNG otherwise.
    pub fn for_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            ImageFormat::Jpeg
        } else {
            ImageFormat::Png
        }
    }

    /// JPEG for `image/jpeg` (or the common `image/jpg` alias), PNG otherwise.
    pub fn for_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("image/jpeg") || essence.eq_ignore_ascii_case("image/jpg")
        {
            ImageFormat::Jpeg
        } else {
            ImageFormat::Png
        }
    }
}

impl From<ImageFormat> for image::ImageFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        })
    }
}

pub type EncodeError = Box<dyn std::error::Error + Send + Sync>;

/// Something that can be serialized as PNG or JPEG.
pub trait EncodeImage {
    fn encode(&self, format: ImageFormat) -> Result<Bytes, EncodeError>;
}

/// Image bytes that are already encoded in one format.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    format: ImageFormat,
    bytes: Bytes,
}

impl EncodedImage {
    pub fn new(format: ImageFormat, bytes: impl Into<Bytes>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }
}

impl EncodeImage for EncodedImage {
    fn encode(&self, format: ImageFormat) -> Result<Bytes, EncodeError> {
        if format == self.format {
            return Ok(self.bytes.clone());
        }
        let decoded = image::load_from_memory_with_format(&self.bytes, self.format.into())?;
        EncodeImage::encode(&decoded, format)
    }
}

impl EncodeImage for DynamicImage {
    fn encode(&self, format: ImageFormat) -> Result<Bytes, EncodeError> {
        let mut out = Cursor::new(Vec::new());
        match format {
            // JPEG has no alpha channel.
            ImageFormat::Jpeg if self.color().has_alpha() => {
                DynamicImage::ImageRgb8(self.to_rgb8()).write_to(&mut out, format.into())?
            }
            _ => self.write_to(&mut out, format.into())?,
        }
        Ok(Bytes::from(out.into_inner()))
    }
}

impl EncodeImage for RgbaImage {
    fn encode(&self, format: ImageFormat) -> Result<Bytes, EncodeError> {
        EncodeImage::encode(&DynamicImage::ImageRgba8(self.clone()), format)
    }
}

impl EncodeImage for RgbImage {
    fn encode(&self, format: ImageFormat) -> Result<Bytes, EncodeError> {
        EncodeImage::encode(&DynamicImage::ImageRgb8(self.clone()), format)
    }
}
