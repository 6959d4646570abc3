//! Writing converted images into an output directory as `<stem>.<ext>`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{encode_image, EncodeError, OutputFormat};
use crate::decode::DecodedImage;

/// Path of the converted image for `source` inside `directory`.
///
/// The file stem of the source is kept and the extension replaced, so
/// `DSC01234.ARW` becomes `<directory>/DSC01234.jpg`.
pub fn output_path(directory: &Path, source: &Path, format: OutputFormat) -> PathBuf {
    let mut name = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "converted".into());
    // Not `with_extension`: stems may contain dots of their own.
    name.push(".");
    name.push(format.extension());
    directory.join(name)
}

/// Encode `image` and write it next to its siblings in `directory`.
///
/// The directory is created when missing. An existing file at the output
/// path is replaced.
pub fn write_image(
    image: &DecodedImage,
    directory: &Path,
    source: &Path,
    format: OutputFormat,
    quality: u8,
) -> Result<PathBuf, EncodeError> {
    let bytes = encode_image(image, format, quality)?;
    let path = output_path(directory, source, format);

    let io_err = |source| EncodeError::Io {
        path: path.display().to_string(),
        source,
    };
    fs::create_dir_all(directory).map_err(io_err)?;
    fs::write(&path, &bytes).map_err(io_err)?;

    debug!(path = %path.display(), bytes = bytes.len(), "wrote converted image");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_path_replaces_extension() {
        let path = output_path(Path::new("/out"), Path::new("/in/DSC01234.ARW"), OutputFormat::Jpeg);
        assert_eq!(path, PathBuf::from("/out/DSC01234.jpg"));

        let path = output_path(Path::new("/out"), Path::new("IMG.final.CR2"), OutputFormat::Png);
        assert_eq!(path, PathBuf::from("/out/IMG.final.png"));
    }

    #[test]
    fn test_write_image_creates_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("out");
        let img = DecodedImage::new(4, 4, vec![50; 48]);

        let path = write_image(&img, &target, Path::new("shot.NEF"), OutputFormat::Png, 90).unwrap();
        assert_eq!(path, target.join("shot.png"));
        let written = fs::read(&path).unwrap();
        assert_eq!(&written[..4], b"\x89PNG");
    }

    #[test]
    fn test_write_image_rejects_invalid_image_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let img = DecodedImage {
            width: 4,
            height: 4,
            pixels: vec![],
        };
        let result = write_image(&img, dir.path(), Path::new("a.ARW"), OutputFormat::Jpeg, 90);
        assert!(matches!(result, Err(EncodeError::InvalidPixelData { .. })));
        assert!(!dir.path().join("a.jpg").exists());
    }

    #[test]
    fn test_write_image_reports_io_failure() {
        let dir = TempDir::new().unwrap();
        // A regular file where the directory should be.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let img = DecodedImage::new(2, 2, vec![0; 12]);

        let result = write_image(&img, &blocker, Path::new("a.ARW"), OutputFormat::Jpeg, 90);
        assert!(matches!(result, Err(EncodeError::Io { .. })));
    }
}
