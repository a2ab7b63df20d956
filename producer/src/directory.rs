//! Static image sets.
//!
//! An [`ImageDirectory`] enumerates the image files of one directory by
//! extension. Entries are decoded lazily so that one unreadable file does not
//! affect the others, and so that decoding can be spread across workers.

use frame_clarity_common::frame::{Frame, FrameError};
use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A named image file waiting to be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    /// File name without the directory part.
    pub name: String,
    pub path: PathBuf,
}

pub struct ImageDirectory {
    root: PathBuf,
    entries: Vec<ImageEntry>,
}

impl ImageDirectory {
    /// List the files in `dir` whose extension matches one of `extensions`
    /// (case-insensitive). Subdirectories are not traversed.
    pub fn open(dir: &Path, extensions: &[String]) -> Result<Self, DirectoryError> {
        let read_dir =
            std::fs::read_dir(dir).map_err(|e| DirectoryError::Read(dir.display().to_string(), e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| DirectoryError::Read(dir.display().to_string(), e))?;
            let path = entry.path();
            if !path.is_file() || !has_extension(&path, extensions) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(ImageEntry { name, path });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            dir = dir.display().to_string(),
            images = entries.len(),
            "enumerated image directory"
        );

        Ok(Self {
            root: dir.to_path_buf(),
            entries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ImageEntry> {
        self.entries
    }
}

impl ImageEntry {
    /// Decode the file, sniffing the format from its contents.
    pub fn decode(&self) -> Result<Frame, ImageReadError> {
        let path = self.path.display().to_string();
        let image = ImageReader::open(&self.path)
            .map_err(|e| ImageReadError::Open(path.clone(), e))?
            .with_guessed_format()
            .map_err(|e| ImageReadError::Open(path.clone(), e))?
            .decode()
            .map_err(|e| ImageReadError::Decode(path.clone(), e))?;
        frame_from_image(image).map_err(|e| ImageReadError::Frame(path, e))
    }
}

/// Convert a decoded image into a frame. Images without colour become
/// single-channel frames; everything else is converted to 8-bit RGB.
pub fn frame_from_image(image: DynamicImage) -> Result<Frame, FrameError> {
    let (width, height) = (image.width(), image.height());
    if image.color().has_color() {
        Frame::rgb(width, height, image.into_rgb8().into_raw())
    } else {
        Frame::gray(width, height, image.into_luma8().into_raw())
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read image directory {0}: {1}")]
    Read(String, std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ImageReadError {
    #[error("failed to open image {0}: {1}")]
    Open(String, std::io::Error),
    #[error("failed to decode image {0}: {1}")]
    Decode(String, image::ImageError),
    #[error("unusable pixel buffer in {0}: {1}")]
    Frame(String, FrameError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_clarity_common::frame::PixelFormat;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn exts() -> Vec<String> {
        ["jpg", "jpeg", "png", "bmp"].map(String::from).to_vec()
    }

    #[test]
    fn enumerates_matching_files_only() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 4, Luma([10]))
            .save(dir.path().join("a.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save(dir.path().join("b.PNG"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let images = ImageDirectory::open(dir.path(), &exts()).unwrap();
        let names: Vec<&str> = images.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.PNG"]);
        assert_eq!(images.len(), 2);
        assert_eq!(images.root(), dir.path());
    }

    #[test]
    fn decodes_gray_and_colour_images() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(3, 2, Luma([200]))
            .save(dir.path().join("gray.png"))
            .unwrap();
        RgbImage::from_pixel(5, 4, Rgb([10, 20, 30]))
            .save(dir.path().join("colour.png"))
            .unwrap();

        let images = ImageDirectory::open(dir.path(), &exts()).unwrap();
        let colour = images.entries()[0].decode().unwrap();
        assert_eq!(colour.format(), PixelFormat::Rgb8);
        assert_eq!((colour.width(), colour.height()), (5, 4));
        assert_eq!(&colour.data()[..3], &[10, 20, 30]);

        let gray = images.entries()[1].decode().unwrap();
        assert_eq!(gray.format(), PixelFormat::Gray8);
        assert!(gray.data().iter().all(|&v| v == 200));
    }

    #[test]
    fn corrupt_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"\xFF\xD8 definitely not jpeg").unwrap();
        let images = ImageDirectory::open(dir.path(), &exts()).unwrap();
        assert_eq!(images.len(), 1);
        assert!(images.entries()[0].decode().is_err());
    }

    #[test]
    fn missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(matches!(
            ImageDirectory::open(&missing, &exts()),
            Err(DirectoryError::Read(..))
        ));
    }
}
