use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use image::{ImageFormat, RgbImage};
use tempfile::TempPath;

use crate::error::{DecodeError, EncodeError};

/// What an input file holds, judged by its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub const IMAGE_EXTENSIONS: [&'static str; 3] = ["jpg", "jpeg", "png"];
    pub const VIDEO_EXTENSIONS: [&'static str; 4] = ["mp4", "avi", "mov", "mkv"];

    pub fn from_path(path: &Path) -> Result<Self, DecodeError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if Self::IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Ok(MediaKind::Image)
        } else if Self::VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            Ok(MediaKind::Video)
        } else {
            Err(DecodeError::UnsupportedFormat(path.display().to_string()))
        }
    }
}

/// Where annotated artifacts are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub image_dir: PathBuf,
    pub video_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(image_dir: impl Into<PathBuf>, video_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            video_dir: video_dir.into(),
        }
    }

    /// Creates both output directories if they are missing
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.image_dir)?;
        std::fs::create_dir_all(&self.video_dir)
    }

    /// `<image_dir>/<original stem>_annotated.jpg`
    pub fn annotated_image_path(&self, original: &Path) -> PathBuf {
        let stem = original
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("image");
        self.image_dir.join(format!("{stem}_annotated.jpg"))
    }

    /// `<image_dir>/detected_<timestamp>.jpg`, suffixed if that file exists.
    /// Nothing is created, so the name is only free as of this call.
    pub fn timestamped_image_path(&self, at: NaiveDateTime) -> PathBuf {
        unused_path(&self.image_dir, &format!("detected_{}", timestamp(at)), "jpg")
    }

    /// `<video_dir>/detected_<timestamp>.mp4`, suffixed if that file exists.
    /// Nothing is created, so the name is only free as of this call.
    pub fn timestamped_video_path(&self, at: NaiveDateTime) -> PathBuf {
        unused_path(&self.video_dir, &format!("detected_{}", timestamp(at)), "mp4")
    }
}

pub fn timestamp(at: NaiveDateTime) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// First of `<stem>.<ext>`, `<stem>_1.<ext>`, ... with no file on disk.
/// Checks existence only; concurrent callers can be handed the same path.
fn unused_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{extension}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{n}.{extension}"));
        n += 1;
    }
    candidate
}

/// Writes an annotated image as JPEG
pub fn save_jpeg(image: &RgbImage, path: &Path) -> Result<(), EncodeError> {
    image.save_with_format(path, ImageFormat::Jpeg)?;
    log::info!("saved {}", path.display());
    Ok(())
}

/// Uploaded video bytes spilled to a temporary file, since decoders read
/// from paths. The file is deleted when this value is dropped.
pub struct VideoUpload {
    path: TempPath,
}

impl VideoUpload {
    /// `original_name` only contributes its extension; `.mp4` otherwise
    pub fn from_bytes(bytes: &[u8], original_name: Option<&str>) -> io::Result<Self> {
        let suffix = original_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| ".mp4".to_string());
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 26)
            .unwrap()
            .and_hms_opt(12, 5, 9)
            .unwrap()
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a/b.JPG")).unwrap(), MediaKind::Image);
        assert_eq!(MediaKind::from_path(Path::new("b.png")).unwrap(), MediaKind::Image);
        assert_eq!(MediaKind::from_path(Path::new("c.mkv")).unwrap(), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("c.Mov")).unwrap(), MediaKind::Video);
        assert!(matches!(
            MediaKind::from_path(Path::new("notes.txt")),
            Err(DecodeError::UnsupportedFormat(_))
        ));
        assert!(MediaKind::from_path(Path::new("noextension")).is_err());
    }

    #[test]
    fn artifact_paths() {
        let layout = OutputLayout::new("Output/annotated_images", "Output/annotated_videos");
        assert_eq!(
            layout.annotated_image_path(Path::new("/tmp/street.png")),
            PathBuf::from("Output/annotated_images/street_annotated.jpg")
        );
        assert_eq!(
            layout.timestamped_video_path(noon()),
            PathBuf::from("Output/annotated_videos/detected_20251026_120509.mp4")
        );
    }

    #[test]
    fn taken_timestamp_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path().join("img"), dir.path().join("vid"));
        layout.ensure_dirs().unwrap();

        let first = layout.timestamped_image_path(noon());
        std::fs::write(&first, b"x").unwrap();
        let second = layout.timestamped_image_path(noon());

        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap(),
            "detected_20251026_120509_1.jpg"
        );
        // Picking a name does not claim it
        assert_eq!(layout.timestamped_image_path(noon()), second);
        assert!(!second.exists());
    }

    #[test]
    fn upload_is_removed_on_drop() {
        let upload = VideoUpload::from_bytes(b"not really a video", Some("clip.avi")).unwrap();
        let path = upload.path().to_path_buf();
        assert_eq!(path.extension().unwrap(), "avi");
        assert_eq!(std::fs::read(&path).unwrap(), b"not really a video");
        drop(upload);
        assert!(!path.exists());
    }
}
