use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};

use crate::annotate::Annotator;
use crate::codec::{VideoDecoder, VideoEncoder, VideoSink};
use crate::counts::ClassCount;
use crate::detector::{Detector, DetectorHandle};
use crate::error::{DecodeError, Error, Result};
use crate::media::VideoUpload;
use crate::{DetectionSet, OUTPUT_FPS};

/// Result of running the detector over one image
#[derive(Debug, Clone)]
pub struct ImageDetection {
    pub annotated: RgbImage,
    pub counts: ClassCount,
    pub detections: DetectionSet,
}

/// Result of running the detector over every frame of a video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoReport {
    pub path: PathBuf,
    pub frames: u64,
    pub fps: f64,
    pub duration_secs: u64,
    /// Detections summed over all frames
    pub detections: ClassCount,
}

/// Runs a loaded detector over images and videos.
///
/// A pipeline holds no per-request state; the same value can serve any
/// number of requests.
pub struct Pipeline<D> {
    detector: DetectorHandle<D>,
    annotator: Annotator,
    fps: f64,
}

fn check_confidence(confidence: f32) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "confidence threshold must be within [0, 1], got {confidence}"
        )))
    }
}

/// Decodes an encoded image (jpg, png, ...) held in memory
pub fn decode_image(bytes: &[u8]) -> std::result::Result<DynamicImage, DecodeError> {
    Ok(image::load_from_memory(bytes)?)
}

impl<D: Detector> Pipeline<D> {
    pub fn new(detector: DetectorHandle<D>, annotator: Annotator) -> Self {
        Self {
            detector,
            annotator,
            fps: OUTPUT_FPS,
        }
    }

    /// Frame rate of encoded videos
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    pub fn detector(&self) -> &DetectorHandle<D> {
        &self.detector
    }

    pub fn detect_image(&self, image: &DynamicImage, confidence: f32) -> Result<ImageDetection> {
        check_confidence(confidence)?;
        let detections = self.detector.infer(image, confidence)?;
        let labels = self.detector.labels();
        let annotated = self.annotator.annotate(image, &detections, labels);
        let counts = ClassCount::tally(&detections, labels);
        log::debug!(
            "{} detections at confidence {}",
            detections.len(),
            confidence
        );
        Ok(ImageDetection {
            annotated,
            counts,
            detections,
        })
    }

    pub fn detect_image_bytes(&self, bytes: &[u8], confidence: f32) -> Result<ImageDetection> {
        let image = decode_image(bytes)?;
        self.detect_image(&image, confidence)
    }

    pub fn detect_image_file(&self, path: &Path, confidence: f32) -> Result<ImageDetection> {
        let image = image::open(path).map_err(DecodeError::from)?;
        self.detect_image(&image, confidence)
    }

    /// Annotates every frame of `input` and streams it into a new video at
    /// `output`. Frames are never buffered, so memory use does not grow
    /// with the length of the video.
    ///
    /// A frame that cannot be decoded aborts the whole request. The partial
    /// output is deleted on any failure, and a video with no frames fails
    /// with [`Error::InvalidInput`] without creating a file.
    pub fn detect_video(
        &self,
        input: &Path,
        output: &Path,
        confidence: f32,
        decoder: &dyn VideoDecoder,
        encoder: &dyn VideoEncoder,
    ) -> Result<VideoReport> {
        check_confidence(confidence)?;
        log::info!(
            "processing {} at confidence {}",
            input.display(),
            confidence
        );
        let labels = self.detector.labels();
        let mut sink = VideoSink::new(encoder, output, self.fps);
        let mut totals = ClassCount::new();

        for frame in decoder.decode(input)? {
            let image = DynamicImage::ImageRgb8(frame?);
            let detections = self.detector.infer(&image, confidence)?;
            totals.merge(&ClassCount::tally(&detections, labels));
            sink.push(&self.annotator.annotate(&image, &detections, labels))?;
            log::trace!("frame {}: {} detections", sink.frames(), detections.len());
        }

        let video = sink.finish()?;
        Ok(VideoReport {
            duration_secs: video.duration_secs(),
            path: video.path,
            frames: video.frames,
            fps: video.fps,
            detections: totals,
        })
    }

    /// Same as [`Pipeline::detect_video`] for an upload held in memory.
    /// The bytes are spilled to a temporary file that is removed before
    /// this returns.
    pub fn detect_video_bytes(
        &self,
        bytes: &[u8],
        original_name: Option<&str>,
        output: &Path,
        confidence: f32,
        decoder: &dyn VideoDecoder,
        encoder: &dyn VideoEncoder,
    ) -> Result<VideoReport> {
        let upload = VideoUpload::from_bytes(bytes, original_name).map_err(DecodeError::from)?;
        self.detect_video(upload.path(), output, confidence, decoder, encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_bounds() {
        assert!(check_confidence(0.0).is_ok());
        assert!(check_confidence(0.4).is_ok());
        assert!(check_confidence(1.0).is_ok());
        assert!(matches!(check_confidence(-0.1), Err(Error::InvalidInput(_))));
        assert!(matches!(check_confidence(1.01), Err(Error::InvalidInput(_))));
        assert!(matches!(check_confidence(f32::NAN), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        assert!(decode_image(b"definitely not a png").is_err());
    }
}
