use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Entities
// =============================================================================

/// A user-defined search over a target coordinate range.
///
/// Hydrated form: alongside the stored columns it carries the aggregate
/// activity state derived from the search's classifications and classifiers.
/// `updated` is the effective activity timestamp — the max of the row's own
/// `updated` and the latest classification/classifier `updated`. Projector
/// activity is deliberately not folded in, matching the upstream behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Search {
    pub id: i64,
    pub target_from: i64,
    pub target_to: i64,
    /// Opaque configuration, stored as normalized (key-sorted) JSON.
    pub config: serde_json::Value,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Number of classifications recorded under this search.
    pub classifications: u64,
    /// Number of classifications with a positive label.
    pub classifications_positive: u64,
    /// Number of classifiers trained for this search.
    pub classifiers: u64,
}

/// A user-supplied label for one candidate window within a search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub search_id: i64,
    pub window_id: i64,
    /// The user's label. Kept as the raw integer flag the callers exchange
    /// (positive, negative, or unsure), not interpreted here.
    pub is_positive: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// A numbered, append-only snapshot of a trained model for a search.
///
/// `classifier_id` counts up from 0 per search. The snapshot of predictions
/// is set at creation; the model blob and the convergence metrics are filled
/// in later as training proceeds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    pub search_id: i64,
    pub classifier_id: i64,
    pub serialized_classifications: Vec<u8>,
    pub model: Option<Vec<u8>>,
    pub unpredictability_all: Option<f64>,
    pub unpredictability_labels: Option<f64>,
    pub prediction_proba_change_all: Option<f64>,
    pub prediction_proba_change_labels: Option<f64>,
    pub convergence_all: Option<f64>,
    pub convergence_labels: Option<f64>,
    pub divergence_all: Option<f64>,
    pub divergence_labels: Option<f64>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Partial update for a classifier. Only `Some` fields are written; the
/// field set is closed, so there is no way to address an unknown column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierUpdate {
    pub model: Option<Vec<u8>>,
    pub unpredictability_all: Option<f64>,
    pub unpredictability_labels: Option<f64>,
    pub prediction_proba_change_all: Option<f64>,
    pub prediction_proba_change_labels: Option<f64>,
    pub convergence_all: Option<f64>,
    pub convergence_labels: Option<f64>,
    pub divergence_all: Option<f64>,
    pub divergence_labels: Option<f64>,
}

impl ClassifierUpdate {
    /// True when no field is supplied. Such an update writes nothing but
    /// still counts as touching the row.
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.unpredictability_all.is_none()
            && self.unpredictability_labels.is_none()
            && self.prediction_proba_change_all.is_none()
            && self.prediction_proba_change_labels.is_none()
            && self.convergence_all.is_none()
            && self.convergence_labels.is_none()
            && self.divergence_all.is_none()
            && self.divergence_labels.is_none()
    }
}

/// Per-classifier convergence metrics for charting training progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierProgress {
    pub classifier_id: i64,
    pub unpredictability_all: Option<f64>,
    pub unpredictability_labels: Option<f64>,
    pub prediction_proba_change_all: Option<f64>,
    pub prediction_proba_change_labels: Option<f64>,
    pub convergence_all: Option<f64>,
    pub convergence_labels: Option<f64>,
    pub divergence_all: Option<f64>,
    pub divergence_labels: Option<f64>,
    pub serialized_classifications: Vec<u8>,
}

/// A numbered, append-only snapshot of a dimensionality-reduction artifact
/// for a search. Same id allocation scheme as [`Classifier`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projector {
    pub search_id: i64,
    pub projector_id: i64,
    pub projector: Vec<u8>,
    pub projection: Vec<u8>,
    pub classifications: Vec<u8>,
    pub settings: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Partial update for a projector.
///
/// An absent field is skipped, and so is an empty one: a zero-length blob or
/// empty settings string can only be established at creation, never written
/// through an update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectorUpdate {
    pub projector: Option<Vec<u8>>,
    pub projection: Option<Vec<u8>>,
    pub classifications: Option<Vec<u8>>,
    pub settings: Option<String>,
}

impl ProjectorUpdate {
    /// True when every field is absent or empty, i.e. the update writes
    /// nothing.
    pub fn is_empty(&self) -> bool {
        !self.projector.as_ref().is_some_and(|v| !v.is_empty())
            && !self.projection.as_ref().is_some_and(|v| !v.is_empty())
            && !self.classifications.as_ref().is_some_and(|v| !v.is_empty())
            && !self.settings.as_ref().is_some_and(|s| !s.is_empty())
    }
}
