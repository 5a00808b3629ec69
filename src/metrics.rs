use std::cmp::Ordering;

use thiserror::Error;
use tracing::{info, warn};

use crate::models::{ConfusionMatrix, MetricsResult, RocPoint};

#[derive(Error, Debug, PartialEq)]
pub enum MetricsError {
    #[error("label and prediction lengths differ: {expected} vs {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("label {0} is not binary")]
    NonBinaryLabel(u8),

    #[error("score at position {0} is not finite")]
    NonFiniteScore(usize),
}

pub trait MetricsBackend: Send + Sync {
    fn name(&self) -> &str;
    fn compute(
        &self,
        y_true: &[u8],
        y_pred: &[u8],
        y_scores: Option<&[f64]>,
    ) -> Result<MetricsResult, MetricsError>;
}

pub fn confusion_matrix(y_true: &[u8], y_pred: &[u8]) -> ConfusionMatrix {
    let mut cm = ConfusionMatrix::default();
    for (&truth, &pred) in y_true.iter().zip(y_pred) {
        match (truth == 1, pred == 1) {
            (true, true) => cm.true_positives += 1,
            (false, true) => cm.false_positives += 1,
            (false, false) => cm.true_negatives += 1,
            (true, false) => cm.false_negatives += 1,
        }
    }
    cm
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// (precision, recall, f1), each 0 when undefined.
pub fn precision_recall_f1(cm: &ConfusionMatrix) -> (f64, f64, f64) {
    let precision = ratio(cm.true_positives, cm.true_positives + cm.false_positives);
    let recall = ratio(cm.true_positives, cm.true_positives + cm.false_negatives);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

fn class_counts(y_true: &[u8]) -> (usize, usize) {
    let positives = y_true.iter().filter(|&&y| y == 1).count();
    (positives, y_true.len() - positives)
}

/// Share of positive/negative pairs where the positive scores higher; ties
/// earn half credit. 0.5 when only one class is present.
pub fn pairwise_auc_scores(y_true: &[u8], y_scores: &[f64]) -> f64 {
    let mut correct = 0.0;
    let mut total = 0usize;
    for i in 0..y_true.len() {
        for j in (i + 1)..y_true.len() {
            if (y_true[i] == 1) == (y_true[j] == 1) {
                continue;
            }
            total += 1;
            let (pos, neg) = if y_true[i] == 1 { (i, j) } else { (j, i) };
            if y_scores[pos] > y_scores[neg] {
                correct += 1.0;
            } else if y_scores[pos] == y_scores[neg] {
                correct += 0.5;
            }
        }
    }
    if total == 0 {
        0.5
    } else {
        correct / total as f64
    }
}

/// Pairwise estimator over binary predictions; a tied pair counts as
/// correctly ordered.
pub fn pairwise_auc_binary(y_true: &[u8], y_pred: &[u8]) -> f64 {
    let mut correct = 0usize;
    let mut total = 0usize;
    for i in 0..y_true.len() {
        for j in (i + 1)..y_true.len() {
            if (y_true[i] == 1) == (y_true[j] == 1) {
                continue;
            }
            total += 1;
            let (pos, neg) = if y_true[i] == 1 { (i, j) } else { (j, i) };
            if y_pred[pos] >= y_pred[neg] {
                correct += 1;
            }
        }
    }
    if total == 0 {
        0.5
    } else {
        correct as f64 / total as f64
    }
}

fn assemble(cm: ConfusionMatrix, auc_roc: f64) -> MetricsResult {
    let (precision, recall, f1_score) = precision_recall_f1(&cm);
    MetricsResult {
        precision,
        recall,
        f1_score,
        auc_roc,
        confusion: cm,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PairwiseMetrics;

impl PairwiseMetrics {
    pub fn evaluate(&self, y_true: &[u8], y_pred: &[u8], y_scores: Option<&[f64]>) -> MetricsResult {
        let n = y_true.len().min(y_pred.len());
        let (y_true, y_pred) = (&y_true[..n], &y_pred[..n]);
        let cm = confusion_matrix(y_true, y_pred);
        let auc = match y_scores {
            Some(scores) if scores.len() == n => pairwise_auc_scores(y_true, scores),
            _ => pairwise_auc_binary(y_true, y_pred),
        };
        assemble(cm, auc)
    }
}

impl MetricsBackend for PairwiseMetrics {
    fn name(&self) -> &str {
        "pairwise"
    }

    fn compute(
        &self,
        y_true: &[u8],
        y_pred: &[u8],
        y_scores: Option<&[f64]>,
    ) -> Result<MetricsResult, MetricsError> {
        Ok(self.evaluate(y_true, y_pred, y_scores))
    }
}

/// Mann-Whitney AUC from average ranks; exact ties share their rank so the
/// result equals the pairwise estimator.
pub fn rank_auc(y_true: &[u8], y_scores: &[f64]) -> f64 {
    let n = y_true.len();
    let (positives, negatives) = class_counts(y_true);
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| {
        y_scores[i]
            .partial_cmp(&y_scores[j])
            .unwrap_or(Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && y_scores[idx[j]] == y_scores[idx[i]] {
            j += 1;
        }
        let avg_rank = (i + j - 1) as f64 / 2.0 + 1.0;
        for &k in &idx[i..j] {
            ranks[k] = avg_rank;
        }
        i = j;
    }

    let sum_ranks_pos: f64 = (0..n).filter(|&k| y_true[k] == 1).map(|k| ranks[k]).sum();
    let (p, q) = (positives as f64, negatives as f64);
    (sum_ranks_pos - p * (p + 1.0) / 2.0) / (p * q)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RankMetrics;

impl MetricsBackend for RankMetrics {
    fn name(&self) -> &str {
        "rank"
    }

    fn compute(
        &self,
        y_true: &[u8],
        y_pred: &[u8],
        y_scores: Option<&[f64]>,
    ) -> Result<MetricsResult, MetricsError> {
        if y_pred.len() != y_true.len() {
            return Err(MetricsError::LengthMismatch {
                expected: y_true.len(),
                found: y_pred.len(),
            });
        }
        if let Some(&label) = y_true.iter().chain(y_pred).find(|&&y| y > 1) {
            return Err(MetricsError::NonBinaryLabel(label));
        }

        let cm = confusion_matrix(y_true, y_pred);
        let auc = match y_scores {
            Some(scores) if scores.len() == y_true.len() => {
                if let Some(pos) = scores.iter().position(|s| !s.is_finite()) {
                    return Err(MetricsError::NonFiniteScore(pos));
                }
                rank_auc(y_true, scores)
            }
            _ => {
                let (positives, negatives) = class_counts(y_true);
                if positives == 0 || negatives == 0 {
                    0.5
                } else {
                    // Only (pos predicted 0, neg predicted 1) pairs are misordered.
                    let misordered = cm.false_negatives * cm.false_positives;
                    1.0 - misordered as f64 / (positives * negatives) as f64
                }
            }
        };
        Ok(assemble(cm, auc))
    }
}

pub struct MetricsEngine {
    preferred: Option<Box<dyn MetricsBackend>>,
    manual: PairwiseMetrics,
}

impl MetricsEngine {
    pub fn manual() -> Self {
        Self {
            preferred: None,
            manual: PairwiseMetrics,
        }
    }

    pub fn with_backend(backend: Box<dyn MetricsBackend>) -> Self {
        Self {
            preferred: Some(backend),
            manual: PairwiseMetrics,
        }
    }

    /// Empty input yields zeros and an AUC of 0.5, never an error.
    pub fn compute(&self, y_true: &[u8], y_pred: &[u8], y_scores: Option<&[f64]>) -> MetricsResult {
        if y_true.is_empty() || y_pred.is_empty() {
            return MetricsResult::default();
        }

        if let Some(backend) = &self.preferred {
            match backend.compute(y_true, y_pred, y_scores) {
                Ok(result) => {
                    info!("AUC-ROC ({}): {:.4}", backend.name(), result.auc_roc);
                    return result;
                }
                Err(e) => warn!("{} metrics failed, using pairwise: {}", backend.name(), e),
            }
        }

        let result = self.manual.evaluate(y_true, y_pred, y_scores);
        info!("AUC-ROC ({}): {:.4}", self.manual.name(), result.auc_roc);
        result
    }
}

/// Empirical ROC curve from (0, 0) to (1, 1), one point per distinct score.
/// Empty when only one class is present.
pub fn roc_curve(y_true: &[u8], y_scores: &[f64]) -> Vec<RocPoint> {
    let (positives, negatives) = class_counts(y_true);
    if positives == 0 || negatives == 0 || y_scores.len() != y_true.len() {
        return Vec::new();
    }

    let mut pairs: Vec<(f64, u8)> = y_scores.iter().copied().zip(y_true.iter().copied()).collect();
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut points = vec![RocPoint { fpr: 0.0, tpr: 0.0 }];
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < pairs.len() {
        let score = pairs[i].0;
        while i < pairs.len() && pairs[i].0 == score {
            if pairs[i].1 == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        points.push(RocPoint {
            fpr: fp as f64 / negatives as f64,
            tpr: tp as f64 / positives as f64,
        });
    }
    points
}
