use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use image::{imageops, DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayView, Axis, CowArray, IxDyn};
use ort::{Environment, SessionBuilder, Value};

use crate::detector::{ClassLabels, Detector};
use crate::error::{InferenceError, ModelLoadError};
use crate::{Detection, DetectionSet, InferenceConfig, ResizeType};

/// Dynamic-size models need both sides to be a multiple of this
const STRIDE: u32 = 32;

fn round_up(value: u32, round: u32) -> u32 {
    (value + round - 1) / round * round
}

/// Adds black padding to the right and bottom of an image so that its
/// dimensions are a multiple of `round`
fn round_image(image: &DynamicImage, round: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let mut new_image = DynamicImage::new_rgb8(round_up(width, round), round_up(height, round));
    imageops::overlay(&mut new_image, image, 0, 0);
    new_image
}

/// Greedy per-class non maximum suppression. Keeps the most confident box
/// of every overlapping group and returns the survivors highest first.
fn non_max_suppression(mut detections: DetectionSet, iou: f32) -> DetectionSet {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let mut kept: DetectionSet = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Maps boxes found on the model input back onto the original image
fn undo_resize(
    detections: DetectionSet,
    original: (u32, u32),
    model_input: (u32, u32),
    padded: bool,
) -> DetectionSet {
    let (x_scale, y_scale) = if padded {
        (1.0, 1.0)
    } else {
        (
            original.0 as f32 / model_input.0 as f32,
            original.1 as f32 / model_input.1 as f32,
        )
    };
    let (max_x, max_y) = (original.0 as f32, original.1 as f32);
    detections
        .into_iter()
        .map(|d| Detection {
            x1: (d.x1 * x_scale).clamp(0.0, max_x),
            y1: (d.y1 * y_scale).clamp(0.0, max_y),
            x2: (d.x2 * x_scale).clamp(0.0, max_x),
            y2: (d.y2 * y_scale).clamp(0.0, max_y),
            ..d
        })
        .collect()
}

/// Turns the raw model output into boxes at or above `confidence`.
/// Class indices are kept as they are, even past the end of the labels.
/// # Arguments
/// * `output` - A 3D array with the shape [1, (4 + num_classes), num_boxes]
fn process_output(
    output: ArrayView<f32, IxDyn>,
    confidence: f32,
) -> Result<DetectionSet, InferenceError> {
    if output.ndim() != 3 || output.shape()[0] != 1 || output.shape()[1] <= 4 {
        return Err(InferenceError::InvalidFormat);
    }
    let predictions = output.slice(s![0, .., ..]);
    let mut detections = Vec::new();
    for column in predictions.axis_iter(Axis(1)) {
        // The column format is [x_center, y_center, w, h, class_0_prob, class_1_prob, ...]
        let column: Vec<f32> = column.iter().copied().collect();
        let (class_id, prob) = column
            .iter()
            .copied()
            .skip(4)
            .enumerate()
            .reduce(|best, class| if class.1 > best.1 { class } else { best })
            .ok_or(InferenceError::InvalidFormat)?;
        if prob.is_nan() || prob < confidence {
            continue;
        }
        let (xc, yc, w, h) = (column[0], column[1], column[2], column[3]);
        detections.push(Detection {
            x1: xc - w / 2.0,
            y1: yc - h / 2.0,
            x2: xc + w / 2.0,
            y2: yc + h / 2.0,
            class_id,
            confidence: prob,
        });
    }
    Ok(detections)
}

/// Represents a YOLOv8 model exported to ONNX
pub struct YOLOV8 {
    session: ort::Session,
    labels: ClassLabels,
    /// Fixed (width, height) of the model input, `None` for dynamic models
    image_size: Option<(u32, u32)>,
    config: InferenceConfig,
}

impl YOLOV8 {
    /// Initializes a YOLOv8 model from an ONNX model file
    pub fn new(
        environment: &Arc<Environment>,
        model_path: impl AsRef<Path>,
        config: InferenceConfig,
    ) -> Result<Self, ModelLoadError> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(ModelLoadError::MissingWeights(model_path.to_path_buf()));
        }

        let session = SessionBuilder::new(environment)?.with_model_from_file(model_path)?;

        let names = session
            .metadata()
            .map_err(|_| ModelLoadError::ClassesMissing)?
            .custom("names")
            .map_err(|_| ModelLoadError::ClassesMissing)?
            .ok_or(ModelLoadError::ClassesMissing)?;
        let labels = ClassLabels::parse_yolov8_names(&names)?;

        let input_dims: Vec<Option<usize>> = session
            .inputs
            .get(0)
            .ok_or(ModelLoadError::InvalidModel("model has no inputs"))?
            .dimensions()
            .collect();
        if input_dims.len() != 4 {
            return Err(ModelLoadError::InvalidModel("expected an NCHW image input"));
        }
        let image_size = match (input_dims[2], input_dims[3]) {
            (Some(height), Some(width)) => Some((width as u32, height as u32)),
            _ => None,
        };

        if session.outputs.is_empty() {
            return Err(ModelLoadError::InvalidModel("model has no outputs"));
        }

        log::info!(
            "loaded {} ({} classes, input {})",
            model_path.display(),
            labels.len(),
            match image_size {
                Some((w, h)) => format!("{w}x{h}"),
                None => "dynamic".to_string(),
            }
        );
        log::debug!("class names: {:?}", labels);

        Ok(YOLOV8 {
            session,
            labels,
            image_size,
            config,
        })
    }

    /// Creates a private ort environment and loads the model into it
    pub fn load(
        model_path: impl AsRef<Path>,
        config: InferenceConfig,
    ) -> Result<Self, ModelLoadError> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("yolo-annotate")
                .build()?,
        );
        Self::new(&environment, model_path, config)
    }

    fn preprocess(&self, image: &DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        match (self.image_size, self.config.resize_type) {
            (Some((w, h)), ResizeType::Resize(filter_type)) => image.resize_exact(w, h, filter_type),
            (Some((w, h)), ResizeType::Pad) => {
                image.resize_exact(w, h, imageops::FilterType::Nearest)
            }
            (None, _) if width % STRIDE == 0 && height % STRIDE == 0 => image.clone(),
            (None, ResizeType::Pad) => round_image(image, STRIDE),
            (None, ResizeType::Resize(filter_type)) => image.resize_exact(
                round_up(width, STRIDE),
                round_up(height, STRIDE),
                filter_type,
            ),
        }
    }

    fn process_input<'a>(&self, image: &DynamicImage) -> CowArray<'a, f32, IxDyn> {
        let (width, height) = image.dimensions();
        let mut input = Array::<f32, _>::zeros((1, 3, height as usize, width as usize)).into_dyn();
        for (x, y, rgb) in image.to_rgb8().enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input[[0, 0, y, x]] = rgb[0] as f32 / 255.0;
            input[[0, 1, y, x]] = rgb[1] as f32 / 255.0;
            input[[0, 2, y, x]] = rgb[2] as f32 / 255.0;
        }
        CowArray::from(input)
    }
}

impl Detector for YOLOV8 {
    fn infer(&self, image: &DynamicImage, confidence: f32) -> Result<DetectionSet, InferenceError> {
        let original_size = image.dimensions();
        if original_size.0 == 0 || original_size.1 == 0 {
            return Err(InferenceError::EmptyImage);
        }
        let resized = self.preprocess(image);
        let input = self.process_input(&resized);

        let input_tensor = Value::from_array(self.session.allocator(), &input)?;
        let outputs = self.session.run(vec![input_tensor])?;
        let tensor = outputs
            .get(0)
            .ok_or(InferenceError::InvalidFormat)?
            .try_extract::<f32>()?;
        let detections = process_output(tensor.view().view(), confidence)?;
        let detections = non_max_suppression(detections, self.config.iou);

        let padded = self.image_size.is_none() && self.config.resize_type == ResizeType::Pad;
        Ok(undo_resize(
            detections,
            original_size,
            resized.dimensions(),
            padded,
        ))
    }

    fn labels(&self) -> &ClassLabels {
        &self.labels
    }
}
