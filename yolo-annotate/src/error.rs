use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassesParseError {
    #[error("End of string reached early")]
    EarlyEnd,
    #[error("Invalid number")]
    InvalidNumber(#[from] ParseIntError),
}

/// The detector could not be brought up. Nothing can be served without it.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Model weights not found at {}", .0.display())]
    MissingWeights(PathBuf),
    #[error("Internal error in the ort library: {0}")]
    Ort(#[from] ort::OrtError),
    #[error("Classes metadata not found")]
    ClassesMissing,
    #[error("Error parsing classes: {0}")]
    ClassesParse(#[from] ClassesParseError),
    #[error("Invalid model: {0}")]
    InvalidModel(&'static str),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Internal error in the ort library: {0}")]
    Ort(#[from] ort::OrtError),
    #[error("Image has no pixels")]
    EmptyImage,
    #[error("Invalid output format")]
    InvalidFormat,
    #[error("{0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Cannot read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Cannot open video {}: {reason}", path.display())]
    OpenVideo { path: PathBuf, reason: String },
    #[error("Failed to read frame {index}: {reason}")]
    Frame { index: u64, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Cannot open video writer for {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },
    #[error("Frame {index} is {found:?} but the video is {expected:?}")]
    FrameSize {
        index: u64,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("Failed to write frame {index}: {reason}")]
    Write { index: u64, reason: String },
    #[error("Failed to finalize video: {0}")]
    Finish(String),
    #[error("Cannot save image: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything a pipeline request can fail with
#[derive(Error, Debug)]
pub enum Error {
    #[error("Model could not be loaded: {0}")]
    ModelLoad(#[from] ModelLoadError),
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Encode failed: {0}")]
    Encode(#[from] EncodeError),
}

impl Error {
    /// Only a failed model load stops the process; every other error ends
    /// just the request that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ModelLoad(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
