// External ML category scorer boundary
//
// The pipeline can carry a pluggable text-to-label scorer. Its absence is
// a no-op: records simply keep null ML fields. Nothing here trains or
// loads a model; this is the seam, not the implementation.

use serde::{Deserialize, Serialize};

use crate::schema::Confidence;

/// Prediction returned by an external category scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub category: Option<String>,
    /// Probability in [0, 1]
    pub probability: f64,
    pub confidence: Confidence,
}

impl CategoryPrediction {
    /// Build a prediction from a label and probability, deriving the
    /// discrete confidence label from the standard thresholds.
    pub fn from_probability(category: Option<String>, probability: f64) -> Self {
        CategoryPrediction {
            category,
            probability,
            confidence: confidence_label(probability),
        }
    }
}

/// Map a probability to its discrete confidence label:
/// ≥ 0.8 high, ≥ 0.6 medium, below low.
pub fn confidence_label(probability: f64) -> Confidence {
    if probability >= 0.8 {
        Confidence::High
    } else if probability >= 0.6 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Black-box text-to-label scorer invoked with concatenated text features
/// from the normalized record. `None` means the scorer abstains; the
/// record then carries null ML fields.
pub trait CategoryScorer: Send + Sync {
    fn predict(&self, text: &str) -> Option<CategoryPrediction>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_thresholds() {
        assert_eq!(confidence_label(0.95), Confidence::High);
        assert_eq!(confidence_label(0.8), Confidence::High);
        assert_eq!(confidence_label(0.7), Confidence::Medium);
        assert_eq!(confidence_label(0.6), Confidence::Medium);
        assert_eq!(confidence_label(0.3), Confidence::Low);
    }

    #[test]
    fn test_prediction_from_probability() {
        let p = CategoryPrediction::from_probability(Some("Transport".to_string()), 0.85);
        assert_eq!(p.confidence, Confidence::High);
        assert_eq!(p.category.as_deref(), Some("Transport"));
    }
}
