//! The converter facade.
//!
//! A [`RawConverter`] is bound to one source file for its whole life. Each
//! operation either returns its product or a [`ConversionError`] and records
//! progress in a [`ConverterState`]. Intermediate products are cached, so
//! asking for the full image after its metadata does not unpack the sensor
//! data twice.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConvertOptions;
use crate::decode::{decode_preview, resize_to_fit, DecodeError, DecodedImage, SensorImage};
use crate::decoder::{NativeDecoder, RawDecoder};
use crate::encode::write_image;
use crate::error::{ConversionError, ErrorKind, Result};
use crate::metadata::RawMetadata;
use crate::state::ConverterState;

/// Which in-memory products a directory conversion hands back besides the
/// written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputSelection {
    pub thumbnail: bool,
    pub image: bool,
}

impl OutputSelection {
    pub const NONE: Self = Self {
        thumbnail: false,
        image: false,
    };
    pub const ALL: Self = Self {
        thumbnail: true,
        image: true,
    };

    pub fn with_thumbnail(mut self) -> Self {
        self.thumbnail = true;
        self
    }

    pub fn with_image(mut self) -> Self {
        self.image = true;
        self
    }
}

/// Result of [`RawConverter::decode_to_directory`].
#[derive(Debug, Clone)]
pub struct DirectoryConversion {
    /// Path of the written file.
    pub path: PathBuf,
    pub thumbnail: Option<DecodedImage>,
    pub image: Option<DecodedImage>,
}

/// Converts one RAW file.
pub struct RawConverter<D: RawDecoder = NativeDecoder> {
    source: PathBuf,
    bytes: Vec<u8>,
    decoder: D,
    options: ConvertOptions,
    state: ConverterState,
    error: Option<ConversionError>,
    metadata: Option<RawMetadata>,
    preview: Option<Vec<u8>>,
    thumbnail: Option<DecodedImage>,
    /// Held only until the image is processed.
    sensor: Option<SensorImage>,
    sensor_dimensions: Option<(u32, u32)>,
    image: Option<DecodedImage>,
}

impl RawConverter<NativeDecoder> {
    /// Open `path` with the built-in decoder and default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, NativeDecoder, ConvertOptions::default())
    }
}

impl<D: RawDecoder> RawConverter<D> {
    /// Read `path` and check that `decoder` recognises it.
    ///
    /// # Errors
    ///
    /// - `OpenFailed` - the file cannot be read
    /// - `DataIsNotAnImage` - the file is readable but not a RAW container
    pub fn open_with(path: impl AsRef<Path>, decoder: D, options: ConvertOptions) -> Result<Self> {
        let source = path.as_ref().to_path_buf();
        let bytes = fs::read(&source).map_err(|e| {
            ConversionError::new(
                ErrorKind::OpenFailed,
                format!("{}: {}", source.display(), e),
            )
        })?;

        if !decoder.probe(&bytes) {
            return Err(ConversionError::new(
                ErrorKind::DataIsNotAnImage,
                format!("{} is not a recognised RAW file", source.display()),
            ));
        }

        debug!(source = %source.display(), bytes = bytes.len(), "opened RAW file");
        let mut state = ConverterState::default();
        state.insert(ConverterState::OPENED);

        Ok(Self {
            source,
            bytes,
            decoder,
            options,
            state,
            error: None,
            metadata: None,
            preview: None,
            thumbnail: None,
            sensor: None,
            sensor_dimensions: None,
            image: None,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn state(&self) -> ConverterState {
        self.state
    }

    /// The most recent failure of any operation.
    pub fn error(&self) -> Option<&ConversionError> {
        self.error.as_ref()
    }

    /// Metadata from the last successful [`Self::decode_metadata`].
    pub fn metadata(&self) -> Option<&RawMetadata> {
        self.metadata.as_ref()
    }

    pub fn is_opened(&self) -> bool {
        self.state.contains(ConverterState::OPENED)
    }

    pub fn is_thumbnail_unpacked(&self) -> bool {
        self.state.contains(ConverterState::THUMBNAIL_UNPACKED)
    }

    pub fn is_thumbnail_decoded(&self) -> bool {
        self.state.contains(ConverterState::THUMBNAIL_DECODED)
    }

    pub fn is_image_unpacked(&self) -> bool {
        self.state.contains(ConverterState::IMAGE_UNPACKED)
    }

    pub fn is_image_processed(&self) -> bool {
        self.state.contains(ConverterState::IMAGE_PROCESSED)
    }

    pub fn is_image_written(&self) -> bool {
        self.state.contains(ConverterState::IMAGE_WRITTEN)
    }

    pub fn is_image_decoded(&self) -> bool {
        self.state.contains(ConverterState::IMAGE_DECODED)
    }

    /// Capture metadata without post-processing.
    ///
    /// Dimensions come from unpacked sensor data when there is some, then
    /// from EXIF, and finally by unpacking the sensor data.
    ///
    /// # Errors
    ///
    /// `UnpackImageFailed` when neither EXIF nor sensor data yields any of
    /// the published keys.
    pub fn decode_metadata(&mut self) -> Result<RawMetadata> {
        if let Some(metadata) = &self.metadata {
            return Ok(metadata.clone());
        }

        let (mut metadata, exif_error) = match self.decoder.read_metadata(&self.bytes) {
            Ok(metadata) => (metadata, None),
            Err(e) => {
                warn!(source = %self.source.display(), error = %e, "no readable EXIF, using sensor data");
                (RawMetadata::default(), Some(e))
            }
        };

        if self.sensor_dimensions.is_none() && !metadata.has_dimensions() {
            if let Err(e) = self.unpack() {
                if metadata.is_empty() {
                    let message = match exif_error {
                        Some(exif) => format!("{}; {}", exif, e),
                        None => e.to_string(),
                    };
                    return Err(self.record(ConversionError::new(ErrorKind::UnpackImageFailed, message)));
                }
                warn!(error = %e, "sensor data unavailable, metadata has no dimensions");
            }
        }

        if let Some((width, height)) = self.sensor_dimensions {
            metadata.set_dimensions(width, height);
        }
        if let Some(sensor) = &self.sensor {
            if metadata.make.is_none() && !sensor.make.is_empty() {
                metadata.make = Some(sensor.make.clone());
            }
            if metadata.model.is_none() && !sensor.model.is_empty() {
                metadata.model = Some(sensor.model.clone());
            }
        }

        debug!(keys = metadata.to_map().len(), "decoded metadata");
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// Decode the embedded preview into an in-memory image.
    ///
    /// # Errors
    ///
    /// - `UnpackThumbnailFailed` - no usable preview in the file
    /// - `InMemoryThumbnailCreationFailed` - the preview cannot be decoded
    pub fn decode_thumbnail(&mut self) -> Result<DecodedImage> {
        if let Some(thumbnail) = &self.thumbnail {
            return Ok(thumbnail.clone());
        }

        let preview = match self.preview.take() {
            Some(preview) => preview,
            None => {
                let unpacked = self.decoder.unpack_thumbnail(&self.bytes);
                let preview = self.check(unpacked, ErrorKind::UnpackThumbnailFailed)?;
                self.state.insert(ConverterState::THUMBNAIL_UNPACKED);
                preview
            }
        };

        let orientation = self.decoder.orientation(&self.bytes);
        let decoded = decode_preview(&preview, orientation).and_then(|img| {
            match self.options.thumbnail_max_edge {
                Some(edge) => resize_to_fit(img, edge, self.options.thumbnail_filter),
                None => Ok(img),
            }
        });
        self.preview = Some(preview);
        let thumbnail = self.check(decoded, ErrorKind::InMemoryThumbnailCreationFailed)?;

        debug!(width = thumbnail.width, height = thumbnail.height, "decoded thumbnail");
        self.state.insert(ConverterState::THUMBNAIL_DECODED);
        self.thumbnail = Some(thumbnail.clone());
        Ok(thumbnail)
    }

    /// Unpack and develop the full-size image, in memory only.
    ///
    /// # Errors
    ///
    /// - `UnpackImageFailed` - sensor data cannot be unpacked
    /// - `PostprocessingFailed` - sensor data cannot be developed
    /// - `InMemoryFullSizeImageCreationFailed` - the developed buffer is unusable
    pub fn decode_image(&mut self) -> Result<DecodedImage> {
        self.process()?;
        let image = match &self.image {
            Some(image) if image.is_well_formed() && !image.is_empty() => Ok(image.clone()),
            Some(image) => Err(format!(
                "{}x{} image with {} bytes of pixel data",
                image.width,
                image.height,
                image.pixels.len()
            )),
            None => Err("no processed image".to_string()),
        };
        let image = self.check(image, ErrorKind::InMemoryFullSizeImageCreationFailed)?;
        self.state.insert(ConverterState::IMAGE_DECODED);
        Ok(image)
    }

    /// Develop the image and write it to `directory` as
    /// `<source stem>.<format extension>`.
    ///
    /// Products in `outputs` are also returned in memory. Stages run in the
    /// order thumbnail, image, write; the first failure ends the call and
    /// nothing produced so far is returned.
    ///
    /// # Errors
    ///
    /// Any error of [`Self::decode_thumbnail`] (when requested) or
    /// [`Self::decode_image`], and `InMemoryConvertedImageWritingFailed`
    /// when encoding or writing fails.
    pub fn decode_to_directory(
        &mut self,
        directory: impl AsRef<Path>,
        outputs: OutputSelection,
    ) -> Result<DirectoryConversion> {
        let directory = directory.as_ref();

        let thumbnail = if outputs.thumbnail {
            Some(self.decode_thumbnail()?)
        } else {
            None
        };
        let image = if outputs.image {
            Some(self.decode_image()?)
        } else {
            self.process()?;
            None
        };

        let written = match &self.image {
            Some(image) => write_image(
                image,
                directory,
                &self.source,
                self.options.format,
                self.options.quality,
            )
            .map_err(|e| e.to_string()),
            None => Err("no processed image".to_string()),
        };
        let path = self.check(written, ErrorKind::InMemoryConvertedImageWritingFailed)?;
        self.state.insert(ConverterState::IMAGE_WRITTEN);

        info!(source = %self.source.display(), output = %path.display(), "converted");
        Ok(DirectoryConversion {
            path,
            thumbnail,
            image,
        })
    }

    /// Unpack sensor data unless it is already available.
    fn unpack(&mut self) -> std::result::Result<(), DecodeError> {
        if self.sensor.is_some() || self.image.is_some() {
            return Ok(());
        }
        let sensor = self.decoder.unpack_image(&self.bytes)?;
        let (width, height) = sensor.active_dimensions();
        debug!(width, height, make = %sensor.make, model = %sensor.model, "unpacked image");
        self.sensor_dimensions = Some((width as u32, height as u32));
        self.sensor = Some(sensor);
        self.state.insert(ConverterState::IMAGE_UNPACKED);
        Ok(())
    }

    /// Develop the sensor data unless a processed image is cached.
    fn process(&mut self) -> Result<()> {
        if self.image.is_some() {
            return Ok(());
        }
        let unpacked = self.unpack();
        self.check(unpacked, ErrorKind::UnpackImageFailed)?;

        let developed = match &self.sensor {
            Some(sensor) => self
                .decoder
                .postprocess(sensor, &self.options.develop)
                .map_err(|e| e.to_string()),
            None => Err("no unpacked sensor data".to_string()),
        };
        let image = self.check(developed, ErrorKind::PostprocessingFailed)?;

        debug!(width = image.width, height = image.height, "processed image");
        self.state.insert(ConverterState::IMAGE_PROCESSED);
        self.image = Some(image);
        self.sensor = None;
        Ok(())
    }

    fn check<T, E: Display>(&mut self, result: std::result::Result<T, E>, kind: ErrorKind) -> Result<T> {
        result.map_err(|e| self.record(ConversionError::new(kind, e.to_string())))
    }

    fn record(&mut self, error: ConversionError) -> ConversionError {
        debug!(source = %self.source.display(), code = error.code(), %error, "operation failed");
        self.error = Some(error.clone());
        error
    }
}

impl<D: RawDecoder> std::fmt::Debug for RawConverter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawConverter")
            .field("source", &self.source)
            .field("state", &self.state)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}



#[cfg(test)]
mod proptests {
    use super::testing::{fake_raw, FakeDecoder};
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Whatever runs and whatever fails, the state keeps its prerequisites
        /// and only ever grows.
        #[test]
        fn prop_state_stays_consistent(
            ops in prop::collection::vec(0u8..4, 1..6),
            fail_thumbnail in any::<bool>(),
            fail_unpack in any::<bool>(),
            fail_postprocess in any::<bool>(),
        ) {
            let dir = TempDir::new().unwrap();
            let path = fake_raw(dir.path(), "P.RAF");
            let decoder = FakeDecoder {
                fail_thumbnail,
                fail_unpack,
                fail_postprocess,
                ..Default::default()
            };
            let mut converter =
                RawConverter::open_with(path, decoder, ConvertOptions::default()).unwrap();

            for op in ops {
                let before = converter.state();
                let failed = match op {
                    0 => converter.decode_metadata().is_err(),
                    1 => converter.decode_thumbnail().is_err(),
                    2 => converter.decode_image().is_err(),
                    _ => converter
                        .decode_to_directory(dir.path(), OutputSelection::ALL)
                        .is_err(),
                };
                let after = converter.state();
                prop_assert!(after.is_consistent());
                prop_assert!(after.contains(before));
                if failed {
                    prop_assert!(converter.error().is_some());
                }
            }
        }
    }
}
