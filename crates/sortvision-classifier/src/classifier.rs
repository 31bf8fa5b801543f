//! Classifier trait and common types

use image::DynamicImage;
use sortvision_core::{Error, LabelSet, Result};

/// Label reported for predictions marked uncertain
pub const UNKNOWN_LABEL: &str = "unknown";

/// Trait for all image classifiers
///
/// Implementations are shared across request handlers and must be safe to
/// call concurrently through `&self`.
pub trait ImageClassifier: Send + Sync {
    /// Classify one decoded image
    fn classify(&self, image: &DynamicImage) -> Result<Prediction>;

    /// Get the classifier name
    fn name(&self) -> &str;

    /// Output label space, in index order
    fn labels(&self) -> &LabelSet;
}

/// Result of classifying one image
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Output index of the winning class
    pub index: usize,

    /// Label set entry at `index`
    pub label: String,

    /// Probability of the winning class (0.0-1.0)
    pub confidence: f32,

    /// Softmax distribution over all classes
    pub probabilities: Vec<f32>,

    /// Set when the low-confidence policy flags this prediction
    pub uncertain: bool,

    /// Latency in microseconds
    pub latency_us: u64,
}

impl Prediction {
    /// Pick the most probable class from a probability vector
    ///
    /// Ties resolve to the lowest index.
    pub fn from_probabilities(probabilities: Vec<f32>, labels: &LabelSet) -> Result<Self> {
        if probabilities.len() != labels.len() {
            return Err(Error::inference(format!(
                "model produced {} scores for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(Error::inference("model produced non-finite probabilities"));
        }

        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        let label = labels
            .get(index)
            .ok_or_else(|| Error::inference(format!("no label for output index {}", index)))?
            .to_string();

        Ok(Self {
            index,
            label,
            confidence,
            probabilities,
            uncertain: false,
            latency_us: 0,
        })
    }

    /// Label to show to users: the class, or `unknown` when uncertain
    pub fn display_label(&self) -> &str {
        if self.uncertain {
            UNKNOWN_LABEL
        } else {
            &self.label
        }
    }

    /// The `k` most probable classes, best first
    pub fn top_k<'a>(&self, labels: &'a LabelSet, k: usize) -> Vec<(&'a str, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.probabilities.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(k)
            .filter_map(|(i, p)| labels.get(i).map(|l| (l, p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_selects_label() {
        let labels = LabelSet::default();
        let prediction =
            Prediction::from_probabilities(vec![0.05, 0.1, 0.6, 0.1, 0.1, 0.05], &labels).unwrap();

        assert_eq!(prediction.index, 2);
        assert_eq!(prediction.label, "metal");
        assert!((prediction.confidence - 0.6).abs() < f32::EPSILON);
        assert!(!prediction.uncertain);
        assert_eq!(prediction.display_label(), "metal");
    }

    #[test]
    fn test_ties_pick_lowest_index() {
        let labels = LabelSet::new(["a", "b", "c"]).unwrap();
        let prediction = Prediction::from_probabilities(vec![0.25, 0.375, 0.375], &labels).unwrap();
        assert_eq!(prediction.label, "b");
    }

    #[test]
    fn test_length_mismatch() {
        let labels = LabelSet::default();
        assert!(Prediction::from_probabilities(vec![0.5, 0.5], &labels).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let labels = LabelSet::new(["a", "b"]).unwrap();
        assert!(Prediction::from_probabilities(vec![f32::NAN, 0.5], &labels).is_err());
    }

    #[test]
    fn test_uncertain_display() {
        let labels = LabelSet::new(["a", "b"]).unwrap();
        let mut prediction = Prediction::from_probabilities(vec![0.45, 0.55], &labels).unwrap();
        assert_eq!(prediction.display_label(), "b");

        prediction.uncertain = true;
        assert_eq!(prediction.display_label(), UNKNOWN_LABEL);
        assert_eq!(prediction.label, "b");
    }

    #[test]
    fn test_top_k() {
        let labels = LabelSet::default();
        let prediction =
            Prediction::from_probabilities(vec![0.1, 0.3, 0.05, 0.4, 0.1, 0.05], &labels).unwrap();

        let top = prediction.top_k(&labels, 3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].0, "paper");
        assert_eq!(top[1].0, "glass");
        assert_eq!(top[2].0, "cardboard");
    }
}
