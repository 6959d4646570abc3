//! Decoding of embedded JPEG previews into in-memory images.

use std::io::Cursor;

use exif::{In, Reader, Tag};
use image::{DynamicImage, ImageReader};

use super::{DecodeError, DecodedImage, Orientation};

/// Decode an embedded preview into RGB pixels, honoring orientation.
///
/// The preview's own EXIF orientation wins when present. Most cameras strip
/// EXIF from the embedded JPEG, so `container` (the orientation recorded in
/// the RAW file's primary IFD) is used otherwise.
pub fn decode_preview(bytes: &[u8], container: Orientation) -> Result<DecodedImage, DecodeError> {
    let orientation = read_orientation(bytes).unwrap_or(container);

    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::CorruptedFile(e.to_string()))?
        .decode()
        .map_err(|e| DecodeError::CorruptedFile(e.to_string()))?;

    let img = apply_orientation(img, orientation);
    Ok(DecodedImage::from_rgb_image(img.into_rgb8()))
}

/// Read the EXIF orientation tag from a JPEG or TIFF-based container.
///
/// Returns `None` when there is no EXIF block or no orientation tag.
pub fn read_orientation(bytes: &[u8]) -> Option<Orientation> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let value = exif
        .get_field(Tag::Orientation, In::PRIMARY)?
        .value
        .get_uint(0)?;
    Some(Orientation::from(value))
}

pub(crate) fn apply_orientation(img: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Normal => img,
        Orientation::FlipHorizontal => img.fliph(),
        Orientation::Rotate180 => img.rotate180(),
        Orientation::FlipVertical => img.flipv(),
        Orientation::Transpose => img.rotate90().fliph(),
        Orientation::Rotate90CW => img.rotate90(),
        Orientation::Transverse => img.rotate270().fliph(),
        Orientation::Rotate270CW => img.rotate270(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ExtendedColorType, ImageEncoder};

    fn make_jpeg(width: u32, height: u32) -> Vec<u8> {
        let pixels = vec![200u8; (width * height * 3) as usize];
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .write_image(&pixels, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    #[test]
    fn test_decode_preview_dimensions() {
        let jpeg = make_jpeg(8, 4);
        let img = decode_preview(&jpeg, Orientation::Normal).unwrap();
        assert_eq!((img.width, img.height), (8, 4));
        assert!(img.is_well_formed());
    }

    #[test]
    fn test_decode_preview_uses_container_orientation() {
        // Encoder output carries no EXIF, so the container orientation applies.
        let jpeg = make_jpeg(8, 4);
        let img = decode_preview(&jpeg, Orientation::Rotate90CW).unwrap();
        assert_eq!((img.width, img.height), (4, 8));
    }

    #[test]
    fn test_decode_preview_rejects_garbage() {
        let result = decode_preview(&[0xFF, 0xD8, 0x00, 0x01], Orientation::Normal);
        assert!(matches!(result, Err(DecodeError::CorruptedFile(_))));

        let result = decode_preview(&[], Orientation::Normal);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_orientation_without_exif() {
        assert_eq!(read_orientation(&make_jpeg(2, 2)), None);
        assert_eq!(read_orientation(&[]), None);
    }

    #[test]
    fn test_apply_orientation_swaps() {
        let img = DynamicImage::new_rgb8(6, 2);
        for orientation in [
            Orientation::Transpose,
            Orientation::Rotate90CW,
            Orientation::Transverse,
            Orientation::Rotate270CW,
        ] {
            let out = apply_orientation(img.clone(), orientation);
            assert_eq!((out.width(), out.height()), (2, 6), "{:?}", orientation);
        }
        let out = apply_orientation(img, Orientation::FlipVertical);
        assert_eq!((out.width(), out.height()), (6, 2));
    }
}
