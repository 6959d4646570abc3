//! Asynchronous front end over [`RawConverter`].
//!
//! Requests are serialised through a tokio mutex and run on the blocking
//! pool. Every request resolves to exactly one [`Outcome`], which carries the
//! converter state observed when the request finished.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::config::ConvertOptions;
use crate::converter::{DirectoryConversion, OutputSelection, RawConverter};
use crate::decode::DecodedImage;
use crate::decoder::{NativeDecoder, RawDecoder};
use crate::error::{ConversionError, ErrorKind, Result};
use crate::metadata::RawMetadata;
use crate::state::ConverterState;

/// One unit of work for a [`ConverterTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Metadata,
    Thumbnail,
    Image,
    ToDirectory {
        directory: PathBuf,
        outputs: OutputSelection,
    },
}

impl Request {
    /// Kind reported when the request dies without producing a result.
    fn abort_kind(&self) -> ErrorKind {
        match self {
            Request::Metadata => ErrorKind::UnpackImageFailed,
            Request::Thumbnail => ErrorKind::InMemoryThumbnailCreationFailed,
            Request::Image => ErrorKind::PostprocessingFailed,
            Request::ToDirectory { .. } => ErrorKind::InMemoryConvertedImageWritingFailed,
        }
    }
}

/// Successful product of a request.
#[derive(Debug, Clone)]
pub enum Output {
    Metadata(RawMetadata),
    /// Thumbnail or full-size image.
    Image(DecodedImage),
    Directory(DirectoryConversion),
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub result: std::result::Result<Output, ConversionError>,
    /// Snapshot taken while the converter was still locked.
    pub state: ConverterState,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Shareable handle to a converter. Clones refer to the same converter.
pub struct ConverterTask<D: RawDecoder + 'static = NativeDecoder> {
    inner: Arc<Mutex<RawConverter<D>>>,
}

impl<D: RawDecoder + 'static> Clone for ConverterTask<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConverterTask<NativeDecoder> {
    pub async fn open(path: impl AsRef<Path>, options: ConvertOptions) -> Result<Self> {
        Self::open_with(path, NativeDecoder, options).await
    }
}

impl<D: RawDecoder + 'static> ConverterTask<D> {
    pub fn new(converter: RawConverter<D>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(converter)),
        }
    }

    /// Open `path` on the blocking pool.
    pub async fn open_with(
        path: impl AsRef<Path>,
        decoder: D,
        options: ConvertOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();
        let opened = tokio::task::spawn_blocking(move || RawConverter::open_with(path, decoder, options))
            .await
            .map_err(|e| ConversionError::new(ErrorKind::OpenFailed, format!("{}: {}", display, e)))?;
        Ok(Self::new(opened?))
    }

    /// Execute `request`, waiting for any request already in flight.
    pub async fn run(&self, request: Request) -> Outcome {
        debug!(?request, "running request");
        let abort_kind = request.abort_kind();
        let mut guard = Arc::clone(&self.inner).lock_owned().await;

        let joined = tokio::task::spawn_blocking(move || {
            let result = execute(&mut *guard, request);
            Outcome {
                result,
                state: guard.state(),
            }
        })
        .await;

        match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "conversion worker died");
                Outcome {
                    result: Err(ConversionError::new(abort_kind, e.to_string())),
                    state: self.state().await,
                }
            }
        }
    }

    pub async fn state(&self) -> ConverterState {
        self.inner.lock().await.state()
    }

    pub async fn error(&self) -> Option<ConversionError> {
        self.inner.lock().await.error().cloned()
    }
}

fn execute<D: RawDecoder>(converter: &mut RawConverter<D>, request: Request) -> Result<Output> {
    match request {
        Request::Metadata => converter.decode_metadata().map(Output::Metadata),
        Request::Thumbnail => converter.decode_thumbnail().map(Output::Image),
        Request::Image => converter.decode_image().map(Output::Image),
        Request::ToDirectory { directory, outputs } => converter
            .decode_to_directory(directory, outputs)
            .map(Output::Directory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::testing::{fake_raw, FakeDecoder};
    use tempfile::TempDir;

    async fn fake_task(decoder: FakeDecoder) -> (TempDir, ConverterTask<FakeDecoder>) {
        let dir = TempDir::new().unwrap();
        let path = fake_raw(dir.path(), "IMG_0042.CR2");
        let task = ConverterTask::open_with(path, decoder, ConvertOptions::default())
            .await
            .unwrap();
        (dir, task)
    }

    #[tokio::test]
    async fn test_open_failures() {
        let dir = TempDir::new().unwrap();
        let err = ConverterTask::open(dir.path().join("nope.DNG"), ConvertOptions::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::OpenFailed);
    }

    #[tokio::test]
    async fn test_image_request() {
        let (_dir, task) = fake_task(FakeDecoder::default()).await;
        let outcome = task.run(Request::Image).await;
        match outcome.result {
            Ok(Output::Image(image)) => assert_eq!((image.width, image.height), (6, 4)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(outcome.state.contains(ConverterState::IMAGE_DECODED));
        assert!(!outcome.state.contains(ConverterState::IMAGE_WRITTEN));
    }

    #[tokio::test]
    async fn test_failed_request_carries_state() {
        let decoder = FakeDecoder {
            fail_thumbnail: true,
            ..Default::default()
        };
        let (_dir, task) = fake_task(decoder).await;
        let outcome = task.run(Request::Thumbnail).await;
        assert_eq!(
            outcome.result.unwrap_err().kind,
            ErrorKind::UnpackThumbnailFailed
        );
        assert_eq!(outcome.state, ConverterState::OPENED);
        assert_eq!(
            task.error().await.map(|e| e.kind),
            Some(ErrorKind::UnpackThumbnailFailed)
        );
    }

    #[tokio::test]
    async fn test_to_directory_request() {
        let (dir, task) = fake_task(FakeDecoder::default()).await;
        let outcome = task
            .run(Request::ToDirectory {
                directory: dir.path().join("out"),
                outputs: OutputSelection::NONE.with_thumbnail(),
            })
            .await;
        let conversion = match outcome.result {
            Ok(Output::Directory(conversion)) => conversion,
            other => panic!("unexpected result: {:?}", other),
        };
        assert!(conversion.path.ends_with("out/IMG_0042.jpg"));
        assert!(conversion.thumbnail.is_some());
        assert!(conversion.image.is_none());
        assert!(outcome.state.contains(ConverterState::IMAGE_WRITTEN));
        assert!(outcome.state.contains(ConverterState::THUMBNAIL_DECODED));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_are_serialised() {
        let decoder = FakeDecoder::default();
        let (_dir, task) = fake_task(decoder.clone()).await;

        let handles: Vec<_> = [Request::Metadata, Request::Image, Request::Thumbnail, Request::Image]
            .into_iter()
            .map(|request| {
                let task = task.clone();
                tokio::spawn(async move { task.run(request).await })
            })
            .collect();

        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(outcome.is_ok());
            assert!(outcome.state.is_consistent());
        }
        // Sensor data was unpacked once despite concurrent callers.
        assert_eq!(decoder.unpack_count(), 1);
        let state = task.state().await;
        assert!(state.contains(ConverterState::IMAGE_DECODED | ConverterState::THUMBNAIL_DECODED));
    }
}
