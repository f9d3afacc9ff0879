use image::imageops::FilterType;

pub use annotate::Annotator;
pub use codec::{encode, EncodedVideo, FrameWriter, Frames, VideoDecoder, VideoEncoder, VideoSink};
pub use config::{ConfigError, Settings};
pub use counts::ClassCount;
pub use detector::{ClassLabels, Detector, DetectorCell, DetectorHandle};
pub use error::{
    ClassesParseError, DecodeError, EncodeError, Error, InferenceError, ModelLoadError, Result,
};
pub use media::{save_jpeg, timestamp, MediaKind, OutputLayout, VideoUpload};
pub use pipeline::{decode_image, ImageDetection, Pipeline, VideoReport};
pub use yolov8::YOLOV8;

mod annotate;
pub mod codec;
mod config;
mod counts;
mod detector;
mod error;
mod media;
mod pipeline;
mod yolov8;

/// Confidence threshold used when the caller does not pick one
pub const DEFAULT_CONFIDENCE: f32 = 0.4;

/// Frame rate of every encoded video, regardless of the source rate
pub const OUTPUT_FPS: f64 = 24.0;

/// One detected object, in pixel coordinates of the image it was found in
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Index into the detector's [`ClassLabels`]
    pub class_id: usize,
    pub confidence: f32,
}

/// Detections for one image or frame, highest confidence first
pub type DetectionSet = Vec<Detection>;

impl Detection {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn union(&self, other: &Detection) -> f32 {
        self.area() + other.area() - self.intersection(other)
    }

    pub fn intersection(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let union = self.union(other);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection(other) / union
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeType {
    /// Add black padding to the image
    Pad,
    /// Resize the image
    Resize(FilterType),
}

/// Options fixed when the model is loaded. The confidence threshold is
/// not here: it is picked per call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Intersection over union above which the weaker of two same-class
    /// boxes is suppressed
    pub iou: f32,
    /// Method of resizing the image
    pub resize_type: ResizeType,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            iou: 0.45,
            resize_type: ResizeType::Resize(FilterType::Nearest),
        }
    }
}
