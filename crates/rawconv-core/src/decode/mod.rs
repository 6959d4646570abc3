//! Decode stages used by the converter.
//!
//! - Sniffing RAW containers and extracting embedded previews (fast path)
//! - Decoding previews into in-memory images
//! - Unpacking sensor data and developing it into RGB (quality path)
//! - Downscaling decoded images
//!
//! Every stage is a synchronous function over bytes or owned buffers with
//! its own [`DecodeError`]; mapping errors onto the converter's taxonomy is
//! left to [`crate::converter`].

mod develop;
mod jpeg;
mod preview;
mod resize;
mod sensor;
mod types;

pub use develop::{develop, DevelopOptions, GammaCurve, WhiteBalance};
pub use jpeg::{decode_preview, read_orientation};
pub use preview::{container_orientation, extract_preview, is_raw_file, sniff_container, Container};
pub use resize::resize_to_fit;
pub use sensor::{unpack_sensor, CfaPattern, SensorImage, CFA_EXTRA};
pub use types::{DecodeError, DecodedImage, FilterType, Orientation};
