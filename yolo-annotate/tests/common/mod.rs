#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, Rgb, RgbImage};
use yolo_annotate::{
    ClassLabels, DecodeError, Detection, DetectionSet, Detector, EncodeError, FrameWriter, Frames,
    InferenceError, VideoDecoder, VideoEncoder,
};

pub fn coco_labels() -> ClassLabels {
    [(0, "person"), (1, "bicycle"), (2, "car"), (16, "dog")]
        .into_iter()
        .collect()
}

pub fn detection(class_id: usize, confidence: f32) -> Detection {
    Detection {
        x1: 2.0,
        y1: 2.0,
        x2: 12.0,
        y2: 12.0,
        class_id,
        confidence,
    }
}

pub fn solid_frame(width: u32, height: u32, shade: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]))
}

/// Returns the same candidate boxes for every image, filtered by the
/// requested confidence. Fails once `fail_after` calls have succeeded.
pub struct ScriptedDetector {
    candidates: DetectionSet,
    labels: ClassLabels,
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl ScriptedDetector {
    pub fn new(candidates: DetectionSet) -> Self {
        Self {
            candidates,
            labels: coco_labels(),
            calls: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for ScriptedDetector {
    fn infer(&self, image: &DynamicImage, confidence: f32) -> Result<DetectionSet, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(InferenceError::Backend(format!(
                "cannot run on a {}x{} input",
                image.width(),
                image.height()
            )));
        }
        let mut kept: DetectionSet = self
            .candidates
            .iter()
            .filter(|d| d.confidence >= confidence)
            .cloned()
            .collect();
        kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(kept)
    }

    fn labels(&self) -> &ClassLabels {
        &self.labels
    }
}

/// Keeps "videos" in memory, keyed by path. Encoding also creates a marker
/// file at the path so tests can check what reached the disk.
#[derive(Default)]
pub struct MemoryCodec {
    videos: RefCell<HashMap<PathBuf, Vec<Result<RgbImage, String>>>>,
    rates: RefCell<HashMap<PathBuf, f64>>,
}

impl MemoryCodec {
    pub fn insert(&self, path: &Path, frames: Vec<RgbImage>) {
        self.videos
            .borrow_mut()
            .insert(path.to_path_buf(), frames.into_iter().map(Ok).collect());
    }

    /// A video whose frame `broken_at` cannot be read
    pub fn insert_broken(&self, path: &Path, frames: Vec<RgbImage>, broken_at: usize) {
        let mut entries: Vec<Result<RgbImage, String>> = frames.into_iter().map(Ok).collect();
        entries.insert(broken_at, Err("corrupt packet".to_string()));
        self.videos.borrow_mut().insert(path.to_path_buf(), entries);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.videos.borrow().contains_key(path)
    }

    pub fn frames(&self, path: &Path) -> Vec<RgbImage> {
        self.videos
            .borrow()
            .get(path)
            .map(|frames| frames.iter().filter_map(|f| f.clone().ok()).collect())
            .unwrap_or_default()
    }

    pub fn fps(&self, path: &Path) -> Option<f64> {
        self.rates.borrow().get(path).copied()
    }
}

impl VideoDecoder for MemoryCodec {
    fn decode<'a>(&'a self, path: &Path) -> Result<Frames<'a>, DecodeError> {
        let frames = self
            .videos
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| DecodeError::OpenVideo {
                path: path.to_path_buf(),
                reason: "no such video".to_string(),
            })?;
        Ok(Box::new(frames.into_iter().enumerate().map(|(index, frame)| {
            frame.map_err(|reason| DecodeError::Frame {
                index: index as u64,
                reason,
            })
        })))
    }
}

struct MemoryWriter<'a> {
    codec: &'a MemoryCodec,
    path: PathBuf,
    fps: f64,
    file: File,
    frames: Vec<RgbImage>,
}

impl VideoEncoder for MemoryCodec {
    fn create<'a>(
        &'a self,
        path: &Path,
        fps: f64,
        _size: (u32, u32),
    ) -> Result<Box<dyn FrameWriter + 'a>, EncodeError> {
        Ok(Box::new(MemoryWriter {
            codec: self,
            path: path.to_path_buf(),
            fps,
            file: File::create(path)?,
            frames: Vec::new(),
        }))
    }
}

impl FrameWriter for MemoryWriter<'_> {
    fn write(&mut self, frame: &RgbImage) -> Result<(), EncodeError> {
        self.file.write_all(&[0])?;
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), EncodeError> {
        self.file.flush()?;
        let frames = std::mem::take(&mut self.frames);
        self.codec.insert(&self.path, frames);
        self.codec.rates.borrow_mut().insert(self.path.clone(), self.fps);
        Ok(())
    }
}
