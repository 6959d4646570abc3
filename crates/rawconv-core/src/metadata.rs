//! Capture metadata of a RAW file.
//!
//! [`RawMetadata`] is the full record; [`RawMetadata::to_map`] projects the
//! six published keys into a [`MetadataMap`].

use std::collections::BTreeMap;
use std::io::Cursor;

use exif::{Exif, Field, In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};

use crate::decode::{DecodeError, Orientation};

/// Keys of the metadata map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetadataKey {
    Aperture,
    FocalLength,
    ImageWidth,
    ImageHeight,
    #[serde(rename = "ISO")]
    Iso,
    ShutterSpeed,
}

impl MetadataKey {
    pub const ALL: [MetadataKey; 6] = [
        MetadataKey::Aperture,
        MetadataKey::FocalLength,
        MetadataKey::ImageWidth,
        MetadataKey::ImageHeight,
        MetadataKey::Iso,
        MetadataKey::ShutterSpeed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetadataKey::Aperture => "Aperture",
            MetadataKey::FocalLength => "FocalLength",
            MetadataKey::ImageWidth => "ImageWidth",
            MetadataKey::ImageHeight => "ImageHeight",
            MetadataKey::Iso => "ISO",
            MetadataKey::ShutterSpeed => "ShutterSpeed",
        }
    }
}

impl std::fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata value: pixel counts and ISO are integers, optics are reals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(u32),
    Real(f64),
}

impl MetadataValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MetadataValue::Integer(v) => v as f64,
            MetadataValue::Real(v) => v,
        }
    }
}

pub type MetadataMap = BTreeMap<MetadataKey, MetadataValue>;

/// Everything the converter knows about a capture without developing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMetadata {
    /// F-number, e.g. 2.8.
    pub aperture: Option<f64>,
    /// Focal length in millimetres.
    pub focal_length: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub iso: Option<u32>,
    /// Exposure time in seconds.
    pub shutter_speed: Option<f64>,
    pub make: Option<String>,
    pub model: Option<String>,
    /// `DateTimeOriginal` as recorded by the camera.
    pub date_taken: Option<String>,
    pub orientation: Orientation,
}

impl RawMetadata {
    /// Read capture metadata from the EXIF block of a RAW container.
    ///
    /// Dimensions are taken from `PixelXDimension`/`PixelYDimension` only;
    /// IFD0 width and height usually describe a preview, not the sensor.
    pub fn from_exif_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let exif = Reader::new()
            .read_from_container(&mut Cursor::new(bytes))
            .map_err(|e| DecodeError::ExifError(e.to_string()))?;
        Ok(Self::from_exif(&exif))
    }

    fn from_exif(exif: &Exif) -> Self {
        let field = |tag: Tag| exif.get_field(tag, In::PRIMARY);

        Self {
            aperture: field(Tag::FNumber).and_then(rational),
            focal_length: field(Tag::FocalLength).and_then(rational),
            width: field(Tag::PixelXDimension).and_then(|f| f.value.get_uint(0)),
            height: field(Tag::PixelYDimension).and_then(|f| f.value.get_uint(0)),
            iso: field(Tag::PhotographicSensitivity).and_then(|f| f.value.get_uint(0)),
            shutter_speed: field(Tag::ExposureTime).and_then(rational),
            make: field(Tag::Make).and_then(ascii),
            model: field(Tag::Model).and_then(ascii),
            date_taken: field(Tag::DateTimeOriginal).and_then(ascii),
            orientation: field(Tag::Orientation)
                .and_then(|f| f.value.get_uint(0))
                .map(Orientation::from)
                .unwrap_or_default(),
        }
    }

    pub fn has_dimensions(&self) -> bool {
        matches!((self.width, self.height), (Some(w), Some(h)) if w > 0 && h > 0)
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = Some(width);
        self.height = Some(height);
    }

    /// True when none of the published keys has a value.
    pub fn is_empty(&self) -> bool {
        self.to_map().is_empty()
    }

    /// The published key/value projection; missing values are omitted.
    pub fn to_map(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        let mut put = |key, value: Option<MetadataValue>| {
            if let Some(value) = value {
                map.insert(key, value);
            }
        };
        put(MetadataKey::Aperture, self.aperture.map(MetadataValue::Real));
        put(MetadataKey::FocalLength, self.focal_length.map(MetadataValue::Real));
        put(MetadataKey::ImageWidth, self.width.map(MetadataValue::Integer));
        put(MetadataKey::ImageHeight, self.height.map(MetadataValue::Integer));
        put(MetadataKey::Iso, self.iso.map(MetadataValue::Integer));
        put(MetadataKey::ShutterSpeed, self.shutter_speed.map(MetadataValue::Real));
        map
    }
}

fn rational(field: &Field) -> Option<f64> {
    match field.value {
        Value::Rational(ref v) if !v.is_empty() && v[0].denom != 0 => Some(v[0].to_f64()),
        Value::SRational(ref v) if !v.is_empty() && v[0].denom != 0 => Some(v[0].to_f64()),
        _ => None,
    }
}

fn ascii(field: &Field) -> Option<String> {
    match field.value {
        Value::Ascii(ref v) => {
            let text = String::from_utf8_lossy(v.first()?);
            let text = text.trim_matches(char::from(0)).trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::experimental::Writer;
    use exif::Rational;

    fn exif_tiff(fields: &[Field]) -> Vec<u8> {
        let mut writer = Writer::new();
        for field in fields {
            writer.push_field(field);
        }
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, true).unwrap();
        buf.into_inner()
    }

    fn field(tag: Tag, value: Value) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        }
    }

    fn sample_fields() -> Vec<Field> {
        vec![
            field(Tag::Make, Value::Ascii(vec![b"Canon".to_vec()])),
            field(Tag::Model, Value::Ascii(vec![b"Canon EOS R5".to_vec()])),
            field(Tag::Orientation, Value::Short(vec![6])),
            field(Tag::FNumber, Value::Rational(vec![Rational { num: 28, denom: 10 }])),
            field(Tag::FocalLength, Value::Rational(vec![Rational { num: 50, denom: 1 }])),
            field(Tag::ExposureTime, Value::Rational(vec![Rational { num: 1, denom: 250 }])),
            field(Tag::PhotographicSensitivity, Value::Short(vec![400])),
            field(Tag::PixelXDimension, Value::Long(vec![8192])),
            field(Tag::PixelYDimension, Value::Long(vec![5464])),
            field(
                Tag::DateTimeOriginal,
                Value::Ascii(vec![b"2024:05:01 10:20:30".to_vec()]),
            ),
        ]
    }

    #[test]
    fn test_reads_capture_fields() {
        let meta = RawMetadata::from_exif_bytes(&exif_tiff(&sample_fields())).unwrap();
        assert_eq!(meta.aperture, Some(2.8));
        assert_eq!(meta.focal_length, Some(50.0));
        assert_eq!(meta.shutter_speed, Some(1.0 / 250.0));
        assert_eq!(meta.iso, Some(400));
        assert_eq!(meta.width, Some(8192));
        assert_eq!(meta.height, Some(5464));
        assert_eq!(meta.make.as_deref(), Some("Canon"));
        assert_eq!(meta.model.as_deref(), Some("Canon EOS R5"));
        assert_eq!(meta.date_taken.as_deref(), Some("2024:05:01 10:20:30"));
        assert_eq!(meta.orientation, Orientation::Rotate90CW);
    }

    #[test]
    fn test_missing_fields_are_none() {
        let fields = vec![field(Tag::Make, Value::Ascii(vec![b"NIKON".to_vec()]))];
        let meta = RawMetadata::from_exif_bytes(&exif_tiff(&fields)).unwrap();
        assert_eq!(meta.make.as_deref(), Some("NIKON"));
        assert!(meta.aperture.is_none());
        assert!(!meta.has_dimensions());
        assert!(meta.is_empty());
        assert_eq!(meta.orientation, Orientation::Normal);
    }

    #[test]
    fn test_non_exif_bytes_fail() {
        let result = RawMetadata::from_exif_bytes(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::ExifError(_))));
    }

    #[test]
    fn test_map_has_published_keys_only() {
        let meta = RawMetadata::from_exif_bytes(&exif_tiff(&sample_fields())).unwrap();
        let map = meta.to_map();
        assert_eq!(map.len(), 6);
        assert_eq!(map[&MetadataKey::Iso], MetadataValue::Integer(400));
        assert_eq!(map[&MetadataKey::Aperture], MetadataValue::Real(2.8));
        assert_eq!(map[&MetadataKey::ImageWidth].as_f64(), 8192.0);
    }

    #[test]
    fn test_map_omits_missing_values() {
        let mut meta = RawMetadata {
            iso: Some(100),
            ..Default::default()
        };
        assert_eq!(meta.to_map().len(), 1);
        meta.set_dimensions(6000, 4000);
        let map = meta.to_map();
        assert_eq!(map.len(), 3);
        assert!(meta.has_dimensions());
    }

    #[test]
    fn test_map_serializes_with_key_names() {
        let meta = RawMetadata {
            iso: Some(200),
            aperture: Some(4.0),
            ..Default::default()
        };
        let json = serde_json::to_string(&meta.to_map()).unwrap();
        assert_eq!(json, r#"{"Aperture":4.0,"ISO":200}"#);
    }

    #[test]
    fn test_key_names() {
        let names: Vec<_> = MetadataKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            ["Aperture", "FocalLength", "ImageWidth", "ImageHeight", "ISO", "ShutterSpeed"]
        );
    }

    #[test]
    fn test_zero_denominator_ignored() {
        let fields = vec![field(
            Tag::FNumber,
            Value::Rational(vec![Rational { num: 1, denom: 0 }]),
        )];
        let meta = RawMetadata::from_exif_bytes(&exif_tiff(&fields)).unwrap();
        assert!(meta.aperture.is_none());
    }
}
