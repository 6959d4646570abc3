//! rawconv core - camera RAW conversion library
//!
//! This crate opens camera RAW files and turns them into viewable images:
//! capture metadata, the embedded thumbnail, and the fully developed sensor
//! image, either in memory or written to a directory as JPEG or PNG.
//!
//! [`RawConverter`] is the synchronous facade; [`ConverterTask`] runs the
//! same operations on tokio's blocking pool. Decoding is delegated to a
//! [`RawDecoder`], by default the pure-Rust [`NativeDecoder`].

pub mod config;
pub mod converter;
pub mod decode;
pub mod decoder;
pub mod encode;
pub mod error;
pub mod metadata;
pub mod state;
pub mod task;

pub use config::{ConfigError, ConvertOptions};
pub use converter::{DirectoryConversion, OutputSelection, RawConverter};
pub use decode::{DecodeError, DecodedImage, DevelopOptions, GammaCurve, WhiteBalance};
pub use decoder::{NativeDecoder, RawDecoder};
pub use encode::{EncodeError, OutputFormat};
pub use error::{ConversionError, ErrorKind, Result, ERROR_DOMAIN};
pub use metadata::{MetadataKey, MetadataMap, MetadataValue, RawMetadata};
pub use state::ConverterState;
pub use task::{ConverterTask, Outcome, Output, Request};
