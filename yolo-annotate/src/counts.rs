use std::collections::BTreeMap;
use std::fmt;

use crate::detector::ClassLabels;
use crate::Detection;

/// Number of detections per class label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCount {
    counts: BTreeMap<String, usize>,
}

impl ClassCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts every detection under the label `labels` resolves its class to
    pub fn tally(detections: &[Detection], labels: &ClassLabels) -> Self {
        let mut counts = Self::new();
        for detection in detections {
            counts.add(labels.resolve(detection.class_id));
        }
        counts
    }

    pub fn add(&mut self, label: impl Into<String>) {
        *self.counts.entry(label.into()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &ClassCount) {
        for (label, count) in &other.counts {
            *self.counts.entry(label.clone()).or_insert(0) += count;
        }
    }

    pub fn get(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    /// Sum over all labels, equal to the number of detections folded in
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Number of distinct labels
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Labels in alphabetical order with their counts
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(label, count)| (label.as_str(), *count))
    }
}

impl<S: Into<String>> FromIterator<(S, usize)> for ClassCount {
    fn from_iter<I: IntoIterator<Item = (S, usize)>>(iter: I) -> Self {
        let mut counts = Self::new();
        for (label, count) in iter {
            *counts.counts.entry(label.into()).or_insert(0) += count;
        }
        counts
    }
}

/// Two column table, one row per label
impl fmt::Display for ClassCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .keys()
            .map(|label| label.chars().count())
            .max()
            .unwrap_or(0)
            .max("Class".len());
        writeln!(f, "{:<width$}  Count", "Class")?;
        for (label, count) in self.iter() {
            writeln!(f, "{label:<width$}  {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_id: usize) -> Detection {
        Detection {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
            class_id,
            confidence: 0.9,
        }
    }

    #[test]
    fn tally_resolves_labels() {
        let labels: ClassLabels = [(0, "person"), (2, "car")].into_iter().collect();
        let counts = ClassCount::tally(
            &[detection(0), detection(2), detection(0), detection(5)],
            &labels,
        );
        assert_eq!(counts.get("person"), 2);
        assert_eq!(counts.get("car"), 1);
        assert_eq!(counts.get("class_5"), 1);
        assert_eq!(counts.get("dog"), 0);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn empty_tally() {
        let counts = ClassCount::tally(&[], &ClassLabels::default());
        assert!(counts.is_empty());
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn merge_adds_per_label() {
        let mut a: ClassCount = [("person", 2), ("car", 1)].into_iter().collect();
        let b: ClassCount = [("person", 1), ("dog", 3)].into_iter().collect();
        a.merge(&b);
        assert_eq!(a, [("car", 1), ("dog", 3), ("person", 3)].into_iter().collect());
    }

    #[test]
    fn renders_table() {
        let counts: ClassCount = [("person", 2), ("traffic light", 1)].into_iter().collect();
        assert_eq!(
            counts.to_string(),
            "Class          Count\nperson         2\ntraffic light  1\n"
        );
    }
}
