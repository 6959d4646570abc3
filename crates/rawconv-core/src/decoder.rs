//! The decoding backend a converter delegates to.

use tracing::debug;

use crate::decode::{
    container_orientation, develop, extract_preview, is_raw_file, unpack_sensor, DecodeError,
    DecodedImage, DevelopOptions, Orientation, SensorImage,
};
use crate::metadata::RawMetadata;

/// Backend that understands RAW containers.
///
/// Methods are stateless over the file bytes; the converter owns the bytes
/// and caches whatever the backend produces.
pub trait RawDecoder: Send + Sync {
    /// True when `bytes` look like a RAW container this backend can open.
    fn probe(&self, bytes: &[u8]) -> bool;

    /// Embedded preview, usually a JPEG.
    fn unpack_thumbnail(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError>;

    fn unpack_image(&self, bytes: &[u8]) -> Result<SensorImage, DecodeError>;

    fn postprocess(
        &self,
        sensor: &SensorImage,
        options: &DevelopOptions,
    ) -> Result<DecodedImage, DecodeError>;

    /// Capture metadata read without touching sensor data.
    fn read_metadata(&self, bytes: &[u8]) -> Result<RawMetadata, DecodeError> {
        RawMetadata::from_exif_bytes(bytes)
    }

    /// Orientation the camera recorded for the capture.
    fn orientation(&self, bytes: &[u8]) -> Orientation {
        container_orientation(bytes)
    }
}

/// Pure-Rust backend: container sniffing and preview extraction over the
/// TIFF structure, `rawloader` for sensor data, and the built-in develop
/// pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDecoder;

impl RawDecoder for NativeDecoder {
    fn probe(&self, bytes: &[u8]) -> bool {
        is_raw_file(bytes)
    }

    fn unpack_thumbnail(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let preview = extract_preview(bytes)?;
        debug!(bytes = preview.len(), "extracted embedded preview");
        Ok(preview)
    }

    fn unpack_image(&self, bytes: &[u8]) -> Result<SensorImage, DecodeError> {
        unpack_sensor(bytes)
    }

    fn postprocess(
        &self,
        sensor: &SensorImage,
        options: &DevelopOptions,
    ) -> Result<DecodedImage, DecodeError> {
        develop(sensor, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_probe() {
        let decoder = NativeDecoder;
        assert!(decoder.probe(&[0x49, 0x49, 0x2A, 0x00, 8, 0, 0, 0]));
        assert!(decoder.probe(&[0x4D, 0x4D, 0x00, 0x2A, 0, 0, 0, 8]));
        assert!(!decoder.probe(b"GIF89a.."));
        assert!(!decoder.probe(&[]));
    }

    #[test]
    fn test_native_rejects_non_raw_bytes() {
        let decoder = NativeDecoder;
        let junk = vec![0u8; 64];
        assert!(decoder.unpack_thumbnail(&junk).is_err());
        assert!(decoder.unpack_image(&junk).is_err());
        assert!(decoder.read_metadata(&junk).is_err());
        assert_eq!(decoder.orientation(&junk), Orientation::Normal);
    }
}
