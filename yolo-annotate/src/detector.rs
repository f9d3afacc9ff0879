use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use image::DynamicImage;

use crate::error::{ClassesParseError, InferenceError};
use crate::DetectionSet;

/// A loaded object detector.
///
/// Implementations must not mutate themselves in `infer`, so one loaded
/// model can serve every request in the process.
pub trait Detector {
    /// Runs the model on one image and returns the detections whose
    /// confidence is at least `confidence`, highest first
    fn infer(&self, image: &DynamicImage, confidence: f32) -> Result<DetectionSet, InferenceError>;

    /// Class index to label lookup for the detections this model produces
    fn labels(&self) -> &ClassLabels;
}

/// Maps the class indices a model outputs to human readable labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLabels {
    names: HashMap<usize, String>,
}

impl ClassLabels {
    pub fn new(names: HashMap<usize, String>) -> Self {
        Self { names }
    }

    /// Converts the names metadata from the model.
    /// The names metadata looks like: `{0: 'person', 1: 'bicycle', 2: 'car'}`
    pub fn parse_yolov8_names(input: &str) -> Result<Self, ClassesParseError> {
        let mut names = HashMap::new();
        let input = input.trim().trim_start_matches('{').trim_end_matches('}');
        if input.trim().is_empty() {
            return Ok(Self { names });
        }
        for class in input.split(", ") {
            let mut class = class.splitn(2, ": ");
            let index = class
                .next()
                .ok_or(ClassesParseError::EarlyEnd)?
                .trim()
                .parse::<usize>()?;
            let name = class
                .next()
                .ok_or(ClassesParseError::EarlyEnd)?
                .trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .to_string();
            names.insert(index, name);
        }
        Ok(Self { names })
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    /// Label for `class_id`. An index the model metadata does not name is
    /// still a detection: it is labelled `class_<id>` rather than dropped
    /// or treated as an error.
    pub fn resolve(&self, class_id: usize) -> String {
        match self.get(class_id) {
            Some(name) => name.to_string(),
            None => format!("class_{class_id}"),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(usize, S)> for ClassLabels {
    fn from_iter<I: IntoIterator<Item = (usize, S)>>(iter: I) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|(index, name)| (index, name.into()))
                .collect(),
        }
    }
}

/// Shared, read-only handle to a loaded detector.
///
/// Cloning is cheap and every clone refers to the same model.
pub struct DetectorHandle<D> {
    inner: Arc<D>,
}

impl<D> DetectorHandle<D> {
    pub fn new(detector: D) -> Self {
        Self {
            inner: Arc::new(detector),
        }
    }

    /// True when both handles refer to the same loaded model
    pub fn same_model(&self, other: &DetectorHandle<D>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<D> Clone for DetectorHandle<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> Deref for DetectorHandle<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.inner
    }
}

/// Lazily loads a detector on first use.
///
/// The lock is held for the whole load, so callers racing on first use
/// wait for one load instead of each starting their own. A failed load
/// leaves the cell empty.
pub struct DetectorCell<D> {
    slot: Mutex<Option<DetectorHandle<D>>>,
}

impl<D> DetectorCell<D> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_load<E, F>(&self, load: F) -> Result<DetectorHandle<D>, E>
    where
        F: FnOnce() -> Result<D, E>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = DetectorHandle::new(load()?);
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// The loaded detector, if a load has already succeeded
    pub fn get(&self) -> Option<DetectorHandle<D>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<D> Default for DetectorCell<D> {
    fn default() -> Self {
        Self::new()
    }
}
