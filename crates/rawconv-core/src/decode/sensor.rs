//! Unpacked sensor data.
//!
//! `rawloader` does the format-specific unpacking (it knows the compression
//! schemes and per-camera calibration tables); this module copies what the
//! develop stage needs into an owned, decoder-independent [`SensorImage`].

use std::io::Cursor;

use tracing::debug;

use super::preview::container_orientation;
use super::{DecodeError, Orientation};

/// Color index used for the fourth CFA color (emerald / second green).
pub const CFA_EXTRA: usize = 3;

/// A repeating color filter array pattern.
///
/// Colors are 0 = red, 1 = green, 2 = blue, 3 = fourth color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfaPattern {
    width: usize,
    height: usize,
    colors: Vec<usize>,
}

impl CfaPattern {
    /// Parse a pattern name such as `"RGGB"` or a 36-letter X-Trans layout.
    ///
    /// The layout follows the row-major naming convention used by rawloader:
    /// 4 letters are 2x2, 16 are 8 wide by 2 high, 36 are 6x6 and 144 are
    /// 12x12. Anything else yields an empty pattern (non-mosaiced data).
    pub fn parse(name: &str) -> Self {
        let (width, height) = match name.len() {
            4 => (2, 2),
            16 => (8, 2),
            36 => (6, 6),
            144 => (12, 12),
            _ => (0, 0),
        };
        let colors = if width == 0 {
            Vec::new()
        } else {
            name.chars()
                .map(|c| match c.to_ascii_uppercase() {
                    'R' => 0,
                    'B' => 2,
                    'E' => CFA_EXTRA,
                    _ => 1,
                })
                .collect()
        };
        Self {
            width,
            height,
            colors,
        }
    }

    /// Which of the four colors occur in the pattern.
    pub fn colors_present(&self) -> [bool; 4] {
        let mut seen = [false; 4];
        for &c in &self.colors {
            seen[c] = true;
        }
        seen
    }

    /// True for data that already has all colors at every photosite.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    #[inline]
    pub fn color_at(&self, row: usize, col: usize) -> usize {
        self.colors[(row % self.height) * self.width + (col % self.width)]
    }

    /// The pattern as seen from an origin moved by `(top, left)`.
    pub fn shifted(&self, top: usize, left: usize) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        let mut colors = Vec::with_capacity(self.colors.len());
        for row in 0..self.height {
            for col in 0..self.width {
                colors.push(self.color_at(row + top, col + left));
            }
        }
        Self {
            width: self.width,
            height: self.height,
            colors,
        }
    }

    /// Number of distinct colors in the pattern.
    pub fn color_count(&self) -> usize {
        self.colors_present().iter().filter(|s| **s).count()
    }
}

/// Decoder-independent unpacked sensor data plus its calibration.
#[derive(Debug, Clone)]
pub struct SensorImage {
    pub make: String,
    pub model: String,
    /// Full width of `data` in photosites.
    pub width: usize,
    /// Full height of `data` in photosites.
    pub height: usize,
    /// Components per pixel: 1 for mosaiced data, 3 for linear RGB.
    pub cpp: usize,
    /// Row-major samples, `width * height * cpp` long.
    pub data: Vec<u16>,
    pub cfa: CfaPattern,
    /// Per-color black levels.
    pub black_levels: [u16; 4],
    /// Per-color white (saturation) levels.
    pub white_levels: [u16; 4],
    /// Camera as-shot white balance multipliers, NaN when unknown.
    pub wb_coeffs: [f32; 4],
    /// XYZ to camera color matrix; all zeros when uncalibrated.
    pub xyz_to_cam: [[f32; 3]; 4],
    /// Borders to crop away: top, right, bottom, left.
    pub crops: [usize; 4],
    /// How the developed image must be turned to display upright.
    pub orientation: Orientation,
}

impl SensorImage {
    /// Width and height of the image after the crops are applied.
    pub fn active_dimensions(&self) -> (usize, usize) {
        let [top, right, bottom, left] = self.crops;
        (
            self.width.saturating_sub(left + right),
            self.height.saturating_sub(top + bottom),
        )
    }

    /// True when the sample buffer agrees with the stated geometry.
    pub fn is_consistent(&self) -> bool {
        self.cpp > 0 && self.data.len() == self.width * self.height * self.cpp
    }
}

/// Unpack the sensor data of a RAW file held in memory.
///
/// # Errors
///
/// Returns `DecodeError::UnsupportedCamera` when rawloader cannot decode the
/// file, which covers both unknown cameras and damaged files.
pub fn unpack_sensor(bytes: &[u8]) -> Result<SensorImage, DecodeError> {
    let raw = rawloader::decode(&mut Cursor::new(bytes))
        .map_err(|e| DecodeError::UnsupportedCamera(format!("{:?}", e)))?;

    debug!(
        make = %raw.clean_make,
        model = %raw.clean_model,
        width = raw.width,
        height = raw.height,
        cfa = %raw.cfa.name,
        "unpacked sensor data"
    );

    // rawloader leaves orientation unknown for some formats; IFD0 usually has it.
    let orientation = match Orientation::from(raw.orientation.to_u16() as u32) {
        Orientation::Normal => container_orientation(bytes),
        other => other,
    };

    let (data, black_levels, white_levels) = match raw.data {
        rawloader::RawImageData::Integer(data) => (data, raw.blacklevels, raw.whitelevels),
        // Float DNGs are scaled into the integer range with a unit white point.
        rawloader::RawImageData::Float(data) => (
            data.iter()
                .map(|v| (v.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16)
                .collect(),
            [0; 4],
            [u16::MAX; 4],
        ),
    };

    Ok(SensorImage {
        make: raw.clean_make,
        model: raw.clean_model,
        width: raw.width,
        height: raw.height,
        cpp: raw.cpp,
        data,
        cfa: if raw.cpp == 1 {
            CfaPattern::parse(&raw.cfa.name)
        } else {
            CfaPattern::parse("")
        },
        black_levels,
        white_levels,
        wb_coeffs: raw.wb_coeffs,
        xyz_to_cam: raw.xyz_to_cam,
        crops: raw.crops,
        orientation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bayer() {
        let cfa = CfaPattern::parse("RGGB");
        assert_eq!(cfa.color_at(0, 0), 0);
        assert_eq!(cfa.color_at(0, 1), 1);
        assert_eq!(cfa.color_at(1, 0), 1);
        assert_eq!(cfa.color_at(1, 1), 2);
        assert_eq!(cfa.color_at(2, 2), 0);
        assert_eq!(cfa.color_count(), 3);
    }

    #[test]
    fn test_parse_four_color() {
        let cfa = CfaPattern::parse("RGEB");
        assert_eq!(cfa.color_at(1, 0), CFA_EXTRA);
        assert_eq!(cfa.color_count(), 4);
    }

    #[test]
    fn test_parse_xtrans_and_empty() {
        let cfa = CfaPattern::parse("GGRGGBGGBGGRBRGRBGGGBGGRGGRGGBRBGBRG");
        assert!(!cfa.is_empty());
        assert_eq!(cfa.color_at(0, 2), 0);
        assert_eq!(cfa.color_at(6, 8), cfa.color_at(0, 2));
        assert_eq!(cfa.colors_present(), [true, true, true, false]);

        assert!(CfaPattern::parse("").is_empty());
        assert!(CfaPattern::parse("RGB").is_empty());
    }

    #[test]
    fn test_shifted() {
        let cfa = CfaPattern::parse("RGGB").shifted(1, 0);
        assert_eq!(cfa, CfaPattern::parse("GBRG"));
        let cfa = CfaPattern::parse("RGGB").shifted(1, 1);
        assert_eq!(cfa, CfaPattern::parse("BGGR"));
    }

    #[test]
    fn test_active_dimensions() {
        let sensor = SensorImage {
            make: String::new(),
            model: String::new(),
            width: 100,
            height: 80,
            cpp: 1,
            data: vec![0; 8000],
            cfa: CfaPattern::parse("RGGB"),
            black_levels: [0; 4],
            white_levels: [1023; 4],
            wb_coeffs: [f32::NAN; 4],
            xyz_to_cam: [[0.0; 3]; 4],
            crops: [2, 4, 6, 8],
            orientation: Orientation::Normal,
        };
        assert_eq!(sensor.active_dimensions(), (88, 72));
        assert!(sensor.is_consistent());
    }

    #[test]
    fn test_unpack_sensor_rejects_non_raw() {
        let result = unpack_sensor(b"definitely not a raw file");
        assert!(matches!(result, Err(DecodeError::UnsupportedCamera(_))));
    }
}
