//! Post-processing of unpacked sensor data into a viewable RGB image.
//!
//! The pipeline runs, in order: crop to the active area, black/white level
//! normalisation, white balance, demosaic, camera to linear sRGB matrix,
//! brightness, gamma, 8-bit quantisation and finally the sensor orientation.
//! Demosaicing is a plain neighbourhood average (full size) or 2x2 binning
//! (half size); either widens its window until every CFA color is found,
//! since X-Trans blocks can lack red or blue.

use std::ops::Range;

use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::jpeg::apply_orientation;
use super::sensor::{CfaPattern, SensorImage};
use super::{DecodeError, DecodedImage, Orientation};

/// Linear sRGB (D65) to XYZ.
const SRGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

const GAMMA_LUT_SIZE: usize = 1 << 16;
/// Largest window growth when searching for a missing CFA color.
const MAX_SEARCH: usize = 6;

/// White balance applied before demosaicing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteBalance {
    /// The camera's as-shot multipliers.
    #[default]
    Camera,
    /// Raw sensor response, no multipliers.
    None,
    /// Explicit multipliers for R, G, B and the fourth CFA color.
    Custom([f32; 4]),
}

/// Transfer curve applied to linear output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GammaCurve {
    /// IEC 61966-2-1 sRGB curve.
    #[default]
    Srgb,
    /// ITU-R BT.709 curve.
    Bt709,
    /// No transfer curve.
    Linear,
}

impl GammaCurve {
    fn encode(self, v: f32) -> f32 {
        match self {
            GammaCurve::Srgb if v <= 0.003_130_8 => v * 12.92,
            GammaCurve::Srgb => 1.055 * v.powf(1.0 / 2.4) - 0.055,
            GammaCurve::Bt709 if v < 0.018 => v * 4.5,
            GammaCurve::Bt709 => 1.099 * v.powf(0.45) - 0.099,
            GammaCurve::Linear => v,
        }
    }

    fn lookup_table(self) -> Vec<u8> {
        (0..=GAMMA_LUT_SIZE)
            .map(|i| {
                let v = self.encode(i as f32 / GAMMA_LUT_SIZE as f32);
                (v.clamp(0.0, 1.0) * 255.0).round() as u8
            })
            .collect()
    }
}

/// Parameters of the develop stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevelopOptions {
    pub white_balance: WhiteBalance,
    /// Bin 2x2 blocks instead of interpolating: half the size, 4x faster.
    pub half_size: bool,
    pub gamma: GammaCurve,
    /// Linear exposure multiplier applied before the transfer curve.
    pub brightness: f32,
    /// Convert camera RGB to sRGB with the camera's color matrix.
    pub color_matrix: bool,
}

impl Default for DevelopOptions {
    fn default() -> Self {
        Self {
            white_balance: WhiteBalance::Camera,
            half_size: false,
            gamma: GammaCurve::Srgb,
            brightness: 1.0,
            color_matrix: true,
        }
    }
}

/// Float working buffer with four channels per pixel (R, G, B, extra).
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

/// Develop unpacked sensor data into an 8-bit RGB image.
///
/// # Errors
///
/// Returns `DecodeError::Development` when the sensor geometry is
/// inconsistent, the active area is empty, or the layout is unsupported.
pub fn develop(sensor: &SensorImage, options: &DevelopOptions) -> Result<DecodedImage, DecodeError> {
    if !sensor.is_consistent() {
        return Err(DecodeError::Development(format!(
            "Sample buffer holds {} values, expected {}x{}x{}",
            sensor.data.len(),
            sensor.width,
            sensor.height,
            sensor.cpp
        )));
    }
    let (width, height) = sensor.active_dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::Development("Active sensor area is empty".to_string()));
    }
    let mosaiced = sensor.cpp == 1;
    if mosaiced && sensor.cfa.is_empty() {
        return Err(DecodeError::Development(
            "Single-component data without a CFA pattern".to_string(),
        ));
    }
    if !mosaiced && sensor.cpp < 3 {
        return Err(DecodeError::Development(format!(
            "Unsupported component count {}",
            sensor.cpp
        )));
    }

    let [top, _, _, left] = sensor.crops;
    let cfa = sensor.cfa.shifted(top, left);
    let multipliers = white_balance_multipliers(sensor, options.white_balance);

    let plane = if mosaiced {
        let levelled = level_mosaic(sensor, &cfa, &multipliers);
        if options.half_size {
            bin_half(&cfa, &levelled, width, height)
        } else {
            interpolate_full(&cfa, &levelled, width, height)
        }
    } else {
        level_linear(sensor, &multipliers)
    };

    let matrix = if options.color_matrix {
        camera_to_srgb(&sensor.xyz_to_cam)
    } else {
        None
    };
    debug!(
        width = plane.width,
        height = plane.height,
        color_matrix = matrix.is_some(),
        "demosaiced sensor data"
    );

    let lut = options.gamma.lookup_table();
    let brightness = options.brightness.max(0.0);
    let mut pixels = vec![0u8; plane.width * plane.height * 3];
    pixels
        .par_chunks_mut(3)
        .zip(plane.data.par_chunks(4))
        .for_each(|(out, px)| {
            let rgb = match &matrix {
                Some(m) => apply_matrix(m, px),
                None => [px[0], px[1], px[2]],
            };
            for (o, v) in out.iter_mut().zip(rgb) {
                let v = (v * brightness).clamp(0.0, 1.0);
                *o = lut[(v * GAMMA_LUT_SIZE as f32) as usize];
            }
        });

    let image = DecodedImage::new(plane.width as u32, plane.height as u32, pixels);
    orient(image, sensor.orientation)
}

fn orient(image: DecodedImage, orientation: Orientation) -> Result<DecodedImage, DecodeError> {
    if orientation == Orientation::Normal {
        return Ok(image);
    }
    let rgb = image
        .into_rgb_image()
        .ok_or_else(|| DecodeError::Development("Developed buffer does not match its size".to_string()))?;
    let turned = apply_orientation(DynamicImage::ImageRgb8(rgb), orientation);
    debug!(?orientation, width = turned.width(), height = turned.height(), "oriented developed image");
    Ok(DecodedImage::from_rgb_image(turned.into_rgb8()))
}

/// Per-color multipliers normalised to green, with missing values as 1.0.
fn white_balance_multipliers(sensor: &SensorImage, mode: WhiteBalance) -> [f32; 4] {
    let coeffs = match mode {
        WhiteBalance::None => return [1.0; 4],
        WhiteBalance::Camera => sensor.wb_coeffs,
        WhiteBalance::Custom(c) => c,
    };
    let green = coeffs[1];
    if !green.is_finite() || green <= 0.0 {
        return [1.0; 4];
    }
    let mut out = [1.0; 4];
    for (o, c) in out.iter_mut().zip(coeffs) {
        if c.is_finite() && c > 0.0 {
            *o = c / green;
        }
    }
    // Four-color sensors often leave the extra coefficient unset.
    if sensor.cfa.color_count() < 4 || !coeffs[3].is_finite() {
        out[3] = out[1];
    }
    out
}

#[inline]
fn normalise(sample: u16, black: u16, white: u16, multiplier: f32) -> f32 {
    let range = white.saturating_sub(black).max(1) as f32;
    let v = (sample.saturating_sub(black)) as f32 / range;
    (v * multiplier).min(1.0)
}

/// Crop, level and white-balance mosaiced samples into one float per site.
fn level_mosaic(sensor: &SensorImage, cfa: &CfaPattern, mul: &[f32; 4]) -> Vec<f32> {
    let (width, height) = sensor.active_dimensions();
    let [top, _, _, left] = sensor.crops;
    let mut out = vec![0.0f32; width * height];
    out.par_chunks_mut(width).enumerate().for_each(|(row, line)| {
        let src = &sensor.data[(row + top) * sensor.width + left..][..width];
        for (col, (o, &s)) in line.iter_mut().zip(src).enumerate() {
            let c = cfa.color_at(row, col);
            *o = normalise(s, sensor.black_levels[c], sensor.white_levels[c], mul[c]);
        }
    });
    out
}

/// Crop, level and white-balance data that already has RGB at every site.
fn level_linear(sensor: &SensorImage, mul: &[f32; 4]) -> Plane {
    let (width, height) = sensor.active_dimensions();
    let [top, _, _, left] = sensor.crops;
    let cpp = sensor.cpp;
    let mut data = vec![0.0f32; width * height * 4];
    data.par_chunks_mut(width * 4).enumerate().for_each(|(row, line)| {
        let start = ((row + top) * sensor.width + left) * cpp;
        let src = &sensor.data[start..start + width * cpp];
        for (px, s) in line.chunks_mut(4).zip(src.chunks(cpp)) {
            for c in 0..3 {
                px[c] = normalise(s[c], sensor.black_levels[c], sensor.white_levels[c], mul[c]);
            }
        }
    });
    Plane {
        width,
        height,
        data,
    }
}

/// Fill each missing color with the mean of same-colored 3x3 neighbours.
fn interpolate_full(cfa: &CfaPattern, samples: &[f32], width: usize, height: usize) -> Plane {
    let present = cfa.colors_present();
    let mut data = vec![0.0f32; width * height * 4];
    data.par_chunks_mut(width * 4).enumerate().for_each(|(row, line)| {
        let rows = row.saturating_sub(1)..(row + 2).min(height);
        for (col, px) in line.chunks_mut(4).enumerate() {
            let own = cfa.color_at(row, col);
            let mut sums = [0.0f32; 4];
            let mut counts = [0u32; 4];
            for y in rows.clone() {
                for x in col.saturating_sub(1)..(col + 2).min(width) {
                    let c = cfa.color_at(y, x);
                    if c != own {
                        sums[c] += samples[y * width + x];
                        counts[c] += 1;
                    }
                }
            }
            for c in 0..4 {
                px[c] = if c == own {
                    samples[row * width + col]
                } else if counts[c] > 0 {
                    sums[c] / counts[c] as f32
                } else if present[c] {
                    nearest_mean(cfa, samples, width, height, row..row + 1, col..col + 1, c)
                } else {
                    0.0
                };
            }
        }
    });
    Plane {
        width,
        height,
        data,
    }
}

/// Average each 2x2 block per color into one output pixel.
///
/// Colors of the pattern that the block lacks come from the nearest
/// surrounding ring that has them.
fn bin_half(cfa: &CfaPattern, samples: &[f32], width: usize, height: usize) -> Plane {
    let (out_w, out_h) = ((width / 2).max(1), (height / 2).max(1));
    let present = cfa.colors_present();
    let mut data = vec![0.0f32; out_w * out_h * 4];
    data.par_chunks_mut(out_w * 4).enumerate().for_each(|(row, line)| {
        let rows = row * 2..(row * 2 + 2).min(height);
        for (col, px) in line.chunks_mut(4).enumerate() {
            let cols = col * 2..(col * 2 + 2).min(width);
            let mut sums = [0.0f32; 4];
            let mut counts = [0u32; 4];
            for y in rows.clone() {
                for x in cols.clone() {
                    let c = cfa.color_at(y, x);
                    sums[c] += samples[y * width + x];
                    counts[c] += 1;
                }
            }
            for c in 0..4 {
                if counts[c] > 0 {
                    px[c] = sums[c] / counts[c] as f32;
                } else if present[c] {
                    px[c] = nearest_mean(cfa, samples, width, height, rows.clone(), cols.clone(), c);
                }
            }
        }
    });
    Plane {
        width: out_w,
        height: out_h,
        data,
    }
}

/// Mean of `color` over the smallest window grown around `rows` x `cols`
/// that contains it, or 0 when none is within reach.
fn nearest_mean(
    cfa: &CfaPattern,
    samples: &[f32],
    width: usize,
    height: usize,
    rows: Range<usize>,
    cols: Range<usize>,
    color: usize,
) -> f32 {
    for grow in 1..=MAX_SEARCH {
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for y in rows.start.saturating_sub(grow)..(rows.end + grow).min(height) {
            for x in cols.start.saturating_sub(grow)..(cols.end + grow).min(width) {
                if cfa.color_at(y, x) == color {
                    sum += samples[y * width + x];
                    count += 1;
                }
            }
        }
        if count > 0 {
            return sum / count as f32;
        }
    }
    0.0
}

#[inline]
fn apply_matrix(m: &[[f32; 4]; 3], px: &[f32]) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for (o, row) in out.iter_mut().zip(m) {
        *o = row[0] * px[0] + row[1] * px[1] + row[2] * px[2] + row[3] * px[3];
    }
    out
}

/// Camera RGBE to linear sRGB, derived from the camera's XYZ matrix.
///
/// Rows of `rgb_to_cam` are normalised so that sRGB white maps to camera
/// white, then pseudo-inverted. Returns `None` for an all-zero (missing) or
/// singular matrix.
pub(crate) fn camera_to_srgb(xyz_to_cam: &[[f32; 3]; 4]) -> Option<[[f32; 4]; 3]> {
    if xyz_to_cam.iter().flatten().all(|v| *v == 0.0) {
        return None;
    }

    let mut rgb_to_cam = [[0.0f32; 3]; 4];
    for (i, row) in rgb_to_cam.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| xyz_to_cam[i][k] * SRGB_TO_XYZ[k][j]).sum();
        }
        let sum: f32 = row.iter().sum();
        for cell in row.iter_mut() {
            *cell = if sum == 0.0 { 0.0 } else { *cell / sum };
        }
    }

    pseudoinverse(&rgb_to_cam)
}

/// Moore-Penrose pseudo-inverse of a 4x3 matrix via Gauss-Jordan on AᵀA.
fn pseudoinverse(a: &[[f32; 3]; 4]) -> Option<[[f32; 4]; 3]> {
    // [AᵀA | I]
    let mut work = [[0.0f32; 6]; 3];
    for i in 0..3 {
        work[i][i + 3] = 1.0;
        for j in 0..3 {
            work[i][j] = (0..4).map(|k| a[k][i] * a[k][j]).sum();
        }
    }

    for i in 0..3 {
        let pivot = work[i][i];
        if pivot.abs() < f32::EPSILON {
            return None;
        }
        for cell in work[i].iter_mut() {
            *cell /= pivot;
        }
        for k in 0..3 {
            if k == i {
                continue;
            }
            let factor = work[k][i];
            for j in 0..6 {
                work[k][j] -= work[i][j] * factor;
            }
        }
    }

    // (AᵀA)⁻¹ Aᵀ
    let mut out = [[0.0f32; 4]; 3];
    for (j, row) in out.iter_mut().enumerate() {
        for (i, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| work[j][k + 3] * a[i][k]).sum();
        }
    }
    Some(out)
}
