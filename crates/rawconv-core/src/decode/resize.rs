//! Downscaling of decoded images to a bounding edge.

use super::{DecodeError, DecodedImage, FilterType};

/// Scale `image` so its longest edge is at most `max_edge`, preserving
/// aspect ratio. Images that already fit are returned unchanged; images are
/// never upscaled.
///
/// # Errors
///
/// Returns `DecodeError::Development` when `max_edge` is zero or the pixel
/// buffer does not match the dimensions.
pub fn resize_to_fit(
    image: DecodedImage,
    max_edge: u32,
    filter: FilterType,
) -> Result<DecodedImage, DecodeError> {
    if max_edge == 0 {
        return Err(DecodeError::Development(
            "Resize target edge must be non-zero".to_string(),
        ));
    }
    if image.width <= max_edge && image.height <= max_edge {
        return Ok(image);
    }

    let (width, height) = fit_dimensions(image.width, image.height, max_edge);
    let rgb = image.into_rgb_image().ok_or_else(|| {
        DecodeError::Development("Pixel buffer does not match dimensions".to_string())
    })?;
    let resized = image::imageops::resize(&rgb, width, height, filter.to_image_filter());
    Ok(DecodedImage::from_rgb_image(resized))
}

/// Dimensions that fit within `max_edge` while preserving aspect ratio.
pub(crate) fn fit_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    let ratio = width as f64 / height as f64;
    if width >= height {
        let h = (max_edge as f64 / ratio).round() as u32;
        (max_edge, h.max(1))
    } else {
        let w = (max_edge as f64 * ratio).round() as u32;
        (w.max(1), max_edge)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Fitted dimensions never exceed the bound and never collapse to zero.
        #[test]
        fn prop_fit_dimensions_bounded(
            width in 1u32..20_000,
            height in 1u32..20_000,
            max_edge in 1u32..4096,
        ) {
            let (w, h) = fit_dimensions(width, height, max_edge);
            prop_assert!(w >= 1 && h >= 1);
            prop_assert!(w <= max_edge && h <= max_edge);
            prop_assert!(w == max_edge || h == max_edge);
        }
    }
}
