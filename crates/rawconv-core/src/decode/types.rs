//! Core types shared by the decode stages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the individual decode stages.
///
/// These are stage-local; the converter maps each one onto a
/// [`crate::ErrorKind`] depending on which stage produced it.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a recognised RAW container.
    #[error("Invalid or unsupported image format")]
    InvalidFormat,

    /// The sensor decoder does not know this camera or file variant.
    #[error("Unsupported camera: {0}")]
    UnsupportedCamera(String),

    /// The file is truncated or its structure is inconsistent.
    #[error("Corrupted or incomplete image file: {0}")]
    CorruptedFile(String),

    /// EXIF parsing error.
    #[error("EXIF error: {0}")]
    ExifError(String),

    /// No embedded preview was found in the RAW container.
    #[error("No embedded thumbnail found")]
    NoThumbnail,

    /// Sensor data was unpacked but could not be developed.
    #[error("Development failed: {0}")]
    Development(String),
}

/// Filter type for image resizing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Nearest neighbor interpolation (fastest, lowest quality).
    Nearest,
    /// Bilinear interpolation (fast, acceptable quality).
    #[default]
    Bilinear,
    /// Lanczos3 interpolation (slower, highest quality).
    Lanczos3,
}

impl FilterType {
    /// Convert to the image crate's FilterType.
    pub fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            FilterType::Nearest => image::imageops::FilterType::Nearest,
            FilterType::Bilinear => image::imageops::FilterType::Triangle,
            FilterType::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// EXIF orientation values (1-8).
/// See: https://exiftool.org/TagNames/EXIF.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Orientation {
    /// Normal (no transformation needed).
    #[default]
    Normal = 1,
    /// Horizontal flip.
    FlipHorizontal = 2,
    /// Rotate 180 degrees.
    Rotate180 = 3,
    /// Vertical flip.
    FlipVertical = 4,
    /// Transpose (flip horizontal + rotate 270 CW).
    Transpose = 5,
    /// Rotate 90 degrees clockwise.
    Rotate90CW = 6,
    /// Transverse (flip horizontal + rotate 90 CW).
    Transverse = 7,
    /// Rotate 270 degrees clockwise (90 CCW).
    Rotate270CW = 8,
}

impl Orientation {
    /// Returns true if this orientation swaps width and height.
    #[inline]
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90CW
                | Orientation::Transverse
                | Orientation::Rotate270CW
        )
    }
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90CW,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270CW,
            _ => Orientation::Normal,
        }
    }
}

/// An in-memory RGB8 image, the converter's equivalent of a platform image
/// object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// RGB pixel data in row-major order (3 bytes per pixel).
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * 3,
            "Pixel buffer size mismatch"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_rgb_image(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.into_raw(),
        }
    }

    /// Borrowing conversion to an `image::RgbImage`.
    ///
    /// Returns `None` when the buffer length does not match the dimensions.
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    /// Consuming conversion to an `image::RgbImage`.
    pub fn into_rgb_image(self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.pixels)
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the buffer length agrees with `width * height * 3`.
    pub fn is_well_formed(&self) -> bool {
        self.pixels.len() as u64 == self.pixel_count() * 3
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_type_conversion() {
        assert!(matches!(
            FilterType::Nearest.to_image_filter(),
            image::imageops::FilterType::Nearest
        ));
        assert!(matches!(
            FilterType::Bilinear.to_image_filter(),
            image::imageops::FilterType::Triangle
        ));
        assert!(matches!(
            FilterType::Lanczos3.to_image_filter(),
            image::imageops::FilterType::Lanczos3
        ));
    }

    #[test]
    fn test_orientation_from_u32() {
        assert_eq!(Orientation::from(1), Orientation::Normal);
        assert_eq!(Orientation::from(6), Orientation::Rotate90CW);
        assert_eq!(Orientation::from(8), Orientation::Rotate270CW);
        assert_eq!(Orientation::from(0), Orientation::Normal);
        assert_eq!(Orientation::from(99), Orientation::Normal);
    }

    #[test]
    fn test_orientation_swaps_dimensions() {
        assert!(!Orientation::Normal.swaps_dimensions());
        assert!(!Orientation::Rotate180.swaps_dimensions());
        assert!(Orientation::Rotate90CW.swaps_dimensions());
        assert!(Orientation::Transverse.swaps_dimensions());
    }

    #[test]
    fn test_decoded_image_well_formed() {
        let img = DecodedImage::new(4, 2, vec![0u8; 4 * 2 * 3]);
        assert!(img.is_well_formed());
        assert!(!img.is_empty());
        assert_eq!(img.pixel_count(), 8);

        let broken = DecodedImage {
            width: 4,
            height: 2,
            pixels: vec![0u8; 5],
        };
        assert!(!broken.is_well_formed());
        assert!(broken.to_rgb_image().is_none());
    }

    #[test]
    fn test_decoded_image_rgb_round_trip() {
        let rgb = image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]));
        let img = DecodedImage::from_rgb_image(rgb);
        assert_eq!((img.width, img.height), (3, 2));
        assert_eq!(&img.pixels[..3], &[10, 20, 30]);
        assert!(img.into_rgb_image().is_some());
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::UnsupportedCamera("Unknown XYZ".to_string());
        assert_eq!(err.to_string(), "Unsupported camera: Unknown XYZ");
        assert_eq!(
            DecodeError::NoThumbnail.to_string(),
            "No embedded thumbnail found"
        );
    }
}
