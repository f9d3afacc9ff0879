//! Video decode and encode seams.
//!
//! The pipeline only talks to [`VideoDecoder`] and [`VideoEncoder`]; the
//! OpenCV backend lives in [`opencv_io`] behind the `opencv` feature.

use std::borrow::Borrow;
use std::io;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::{DecodeError, EncodeError, Error, Result};

#[cfg(feature = "opencv")]
pub mod opencv_io;

/// Decoded frames in source order. Finite and not restartable: decode the
/// file again to re-read it.
pub type Frames<'a> = Box<dyn Iterator<Item = std::result::Result<RgbImage, DecodeError>> + 'a>;

pub trait VideoDecoder {
    fn decode<'a>(&'a self, path: &Path) -> std::result::Result<Frames<'a>, DecodeError>;
}

pub trait VideoEncoder {
    /// Opens a container at `path` for frames of `size` (width, height)
    fn create<'a>(
        &'a self,
        path: &Path,
        fps: f64,
        size: (u32, u32),
    ) -> std::result::Result<Box<dyn FrameWriter + 'a>, EncodeError>;
}

/// An open output container.
///
/// Dropping a writer without calling `finish` must still release the
/// underlying file handle.
pub trait FrameWriter {
    fn write(&mut self, frame: &RgbImage) -> std::result::Result<(), EncodeError>;

    /// Flushes and closes the container
    fn finish(self: Box<Self>) -> std::result::Result<(), EncodeError>;
}

/// A video written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub frames: u64,
    pub fps: f64,
    pub size: (u32, u32),
}

impl EncodedVideo {
    /// Whole seconds of playback, 0 when the frame rate is not positive
    pub fn duration_secs(&self) -> u64 {
        if self.fps > 0.0 {
            (self.frames as f64 / self.fps) as u64
        } else {
            0
        }
    }
}

/// Streams frames into an encoder as they are produced.
///
/// The container is opened lazily on the first frame, whose dimensions
/// fix the geometry of the video; later frames of another size are
/// rejected. A sink dropped before a successful [`VideoSink::finish`]
/// closes the writer and deletes the partial file.
pub struct VideoSink<'a> {
    encoder: &'a dyn VideoEncoder,
    path: PathBuf,
    fps: f64,
    writer: Option<Box<dyn FrameWriter + 'a>>,
    size: Option<(u32, u32)>,
    frames: u64,
    touched: bool,
    finished: bool,
}

impl<'a> VideoSink<'a> {
    pub fn new(encoder: &'a dyn VideoEncoder, path: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            encoder,
            path: path.into(),
            fps,
            writer: None,
            size: None,
            frames: 0,
            touched: false,
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames accepted so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn push(&mut self, frame: &RgbImage) -> std::result::Result<(), EncodeError> {
        let size = frame.dimensions();
        match self.size {
            Some(expected) if expected != size => {
                return Err(EncodeError::FrameSize {
                    index: self.frames,
                    expected,
                    found: size,
                });
            }
            Some(_) => {}
            None => {
                log::debug!(
                    "opening {} at {}x{} {} fps",
                    self.path.display(),
                    size.0,
                    size.1,
                    self.fps
                );
                self.writer = Some(self.encoder.create(&self.path, self.fps, size)?);
                // Only a container this sink opened is ours to delete
                self.touched = true;
                self.size = Some(size);
            }
        }
        let writer = self.writer.as_mut().ok_or_else(|| EncodeError::Write {
            index: self.frames,
            reason: "writer is closed".to_string(),
        })?;
        writer.write(frame)?;
        self.frames += 1;
        Ok(())
    }

    /// Closes the container. Fails with [`Error::InvalidInput`] when no
    /// frame was pushed, in which case nothing was written.
    pub fn finish(mut self) -> Result<EncodedVideo> {
        let (Some(writer), Some(size)) = (self.writer.take(), self.size) else {
            return Err(Error::InvalidInput("no frames to encode".to_string()));
        };
        writer.finish()?;
        self.finished = true;
        log::info!("wrote {} frames to {}", self.frames, self.path.display());
        Ok(EncodedVideo {
            path: self.path.clone(),
            frames: self.frames,
            fps: self.fps,
            size,
        })
    }
}

impl Drop for VideoSink<'_> {
    fn drop(&mut self) {
        if self.finished || !self.touched {
            return;
        }
        // Release the encoder before removing what it wrote
        drop(self.writer.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::warn!("discarded partial video {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "could not remove partial video {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Writes `frames` in order to a new video at `path`.
///
/// An empty sequence fails with [`Error::InvalidInput`] and creates no
/// file; any failure removes the partial output.
pub fn encode<I>(
    encoder: &dyn VideoEncoder,
    frames: I,
    path: impl Into<PathBuf>,
    fps: f64,
) -> Result<EncodedVideo>
where
    I: IntoIterator,
    I::Item: Borrow<RgbImage>,
{
    let mut sink = VideoSink::new(encoder, path, fps);
    for frame in frames {
        sink.push(frame.borrow())?;
    }
    sink.finish()
}
