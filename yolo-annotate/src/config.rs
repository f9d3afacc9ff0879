use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use serde::Deserialize;
use thiserror::Error;

use crate::media::OutputLayout;
use crate::{InferenceConfig, ResizeType, DEFAULT_CONFIDENCE, OUTPUT_FPS};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Process-wide settings. Every field has a default, so a settings file
/// only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// ONNX export of the detector
    pub model_path: PathBuf,
    /// Confidence threshold used when a request does not pick one
    pub confidence: f32,
    /// Same-class overlap above which the weaker box is dropped
    pub iou: f32,
    /// Pad images up to the model stride instead of resizing them
    pub pad: bool,
    /// Frame rate of encoded videos
    pub fps: f64,
    pub output_image_dir: PathBuf,
    pub output_video_dir: PathBuf,
    /// Font for box captions; boxes are drawn without captions when unset
    pub label_font: Option<PathBuf>,
    pub line_width: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("Model/yolov8n.onnx"),
            confidence: DEFAULT_CONFIDENCE,
            iou: 0.45,
            pad: false,
            fps: OUTPUT_FPS,
            output_image_dir: PathBuf::from("Output/annotated_images/"),
            output_video_dir: PathBuf::from("Output/annotated_videos/"),
            label_font: None,
            line_width: 2,
        }
    }
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::Invalid(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.iou) {
            return Err(ConfigError::Invalid(format!(
                "iou must be within [0, 1], got {}",
                self.iou
            )));
        }
        if !(self.fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        Ok(())
    }

    pub fn inference(&self) -> InferenceConfig {
        InferenceConfig {
            iou: self.iou,
            resize_type: if self.pad {
                ResizeType::Pad
            } else {
                ResizeType::Resize(FilterType::Nearest)
            },
        }
    }

    pub fn output_layout(&self) -> OutputLayout {
        OutputLayout::new(&self.output_image_dir, &self.output_video_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let settings = Settings::default();
        assert_eq!(settings.confidence, 0.4);
        assert_eq!(settings.fps, 24.0);
        assert_eq!(
            settings.output_layout(),
            OutputLayout::new("Output/annotated_images/", "Output/annotated_videos/")
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            model_path = "weights/yolov8s.onnx"
            confidence = 0.25
            pad = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.model_path, PathBuf::from("weights/yolov8s.onnx"));
        assert_eq!(settings.confidence, 0.25);
        assert_eq!(settings.inference().resize_type, ResizeType::Pad);
        assert_eq!(settings.fps, 24.0);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            Settings::from_toml_str("confidence = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("fps = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            Settings::from_toml_str("confidance = 0.5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "iou = 0.6\nline_width = 3\n").unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.iou, 0.6);
        assert_eq!(settings.line_width, 3);
        assert!(matches!(
            Settings::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
