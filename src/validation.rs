use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::metrics::{roc_curve, MetricsEngine};
use crate::models::{MetricsResult, RocPoint, StudentRecord, ValidationMethod};
use crate::risk::{classify, limit_change, project_student, risk_penalty};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSamples {
    pub method: ValidationMethod,
    pub y_true: Vec<u8>,
    pub y_pred: Vec<u8>,
    pub y_scores: Vec<f64>,
}

impl ValidationSamples {
    fn new(method: ValidationMethod) -> Self {
        Self {
            method,
            y_true: Vec::new(),
            y_pred: Vec::new(),
            y_scores: Vec::new(),
        }
    }

    fn push(&mut self, truth: u8, pred: u8, score: f64) {
        self.y_true.push(truth);
        self.y_pred.push(pred);
        self.y_scores.push(score);
    }

    pub fn len(&self) -> usize {
        self.y_true.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_true.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub method: ValidationMethod,
    pub samples: usize,
    pub metrics: MetricsResult,
    pub roc: Vec<RocPoint>,
}

fn usable(grade: f64) -> bool {
    grade.is_finite() && grade != 0.0
}

/// Bimester 3 predicted from bimesters 1 and 2: continue the last change,
/// limit it around bimester 2, subtract penalties and clamp.
pub fn predict_third_bimester(student: &StudentRecord, config: &ModelConfig) -> f64 {
    let g1 = config.clamp_grade(student.grades[0]);
    let g2 = config.clamp_grade(student.grades[1]);
    let projection = limit_change(g2 + (g2 - g1), g2, config);
    config.clamp_grade(projection - risk_penalty(&student.flags, &config.penalty_weights))
}

pub fn temporal_samples(students: &[StudentRecord], config: &ModelConfig) -> ValidationSamples {
    let mut samples = ValidationSamples::new(ValidationMethod::Temporal);
    for student in students.iter().filter(|s| s.grades.iter().all(|&g| usable(g))) {
        let truth = classify(student.grades[2], config);
        let predicted = predict_third_bimester(student, config);
        samples.push(truth.value(), classify(predicted, config).value(), predicted);
    }
    samples
}

/// Stored projections against actual bimester 3. Students not yet scored
/// are projected on the fly.
pub fn standard_samples(students: &[StudentRecord], config: &ModelConfig) -> ValidationSamples {
    let mut samples = ValidationSamples::new(ValidationMethod::Estandar);
    for student in students {
        let projection = student
            .projection
            .unwrap_or_else(|| project_student(student, config));
        let truth = classify(student.grades[2], config);
        samples.push(truth.value(), projection.outcome.value(), projection.grade);
    }
    samples
}

pub fn collect_samples(students: &[StudentRecord], config: &ModelConfig) -> ValidationSamples {
    let samples = temporal_samples(students, config);
    if !samples.is_empty() {
        info!("temporal validation: {} students with complete grades", samples.len());
        return samples;
    }
    warn!("not enough data for temporal validation, using standard validation");
    standard_samples(students, config)
}

/// Temporal when any student has all three grades, else stored projections
/// against bimester 3.
pub fn validate(
    students: &[StudentRecord],
    config: &ModelConfig,
    engine: &MetricsEngine,
) -> ValidationReport {
    let samples = collect_samples(students, config);
    let metrics = engine.compute(&samples.y_true, &samples.y_pred, Some(&samples.y_scores));
    info!(
        "validation ({:?}) precision {:.4}, recall {:.4}",
        samples.method, metrics.precision, metrics.recall
    );

    ValidationReport {
        method: samples.method,
        samples: samples.len(),
        roc: roc_curve(&samples.y_true, &samples.y_scores),
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, RiskFlag};
    use crate::risk::score_students;
    use approx::assert_abs_diff_eq;

    fn student(id: &str, grades: [f64; 3]) -> StudentRecord {
        let mut record = StudentRecord::new(id, 5.0);
        record.grades = grades;
        record
    }

    #[test]
    fn two_point_prediction_continues_the_trend() {
        let config = ModelConfig::default();
        assert_abs_diff_eq!(
            predict_third_bimester(&student("1", [10.0, 12.0, 0.0]), &config),
            14.0,
            epsilon = 1e-9
        );
        // +8 is limited to +4 around bimester 2
        assert_abs_diff_eq!(
            predict_third_bimester(&student("1", [5.0, 13.0, 0.0]), &config),
            17.0,
            epsilon = 1e-9
        );

        let mut flagged = student("1", [16.0, 16.0, 16.0]);
        flagged.flags.attendance = RiskFlag::AtRisk;
        flagged.flags.sentiment = RiskFlag::AtRisk;
        assert_abs_diff_eq!(predict_third_bimester(&flagged, &config), 14.0, epsilon = 1e-9);

        let sinking = student("1", [8.0, 5.0, 0.0]);
        assert_eq!(predict_third_bimester(&sinking, &config), 5.0);
    }

    #[test]
    fn temporal_path_uses_students_with_all_grades() {
        let config = ModelConfig::default();
        let students = vec![
            student("1", [13.0, 16.0, 16.0]),
            student("2", [13.0, 11.0, 13.0]),
            student("3", [16.0, 0.0, 19.0]),
        ];
        let samples = collect_samples(&students, &config);
        assert_eq!(samples.method, ValidationMethod::Temporal);
        assert_eq!(samples.y_true, vec![1, 1]);
        assert_eq!(samples.y_pred, vec![1, 0]);
        assert_abs_diff_eq!(samples.y_scores[0], 19.0, epsilon = 1e-9);
        assert_abs_diff_eq!(samples.y_scores[1], 9.0, epsilon = 1e-9);
    }

    #[test]
    fn falls_back_to_stored_projections() {
        let config = ModelConfig::default();
        let mut students = vec![student("1", [0.0, 16.0, 16.0]), student("2", [0.0, 5.0, 5.0])];
        score_students(&mut students, &config);

        let samples = collect_samples(&students, &config);
        assert_eq!(samples.method, ValidationMethod::Estandar);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.y_true, vec![1, 0]);
        let stored: Vec<u8> = students
            .iter()
            .map(|s| s.projection.map_or(Outcome::Fail, |p| p.outcome).value())
            .collect();
        assert_eq!(samples.y_pred, stored);
    }

    #[test]
    fn validation_report_counts_every_sample() {
        let config = ModelConfig::default();
        let students = vec![
            student("1", [16.0, 16.0, 16.0]),
            student("2", [13.0, 11.0, 9.0]),
            student("3", [10.0, 12.0, 11.0]),
            student("4", [19.0, 13.0, 13.0]),
        ];
        let report = validate(&students, &config, &MetricsEngine::manual());
        assert_eq!(report.method, ValidationMethod::Temporal);
        assert_eq!(report.samples, 4);
        assert_eq!(report.metrics.confusion.total(), 4);
        assert!(report.metrics.auc_roc >= 0.0 && report.metrics.auc_roc <= 1.0);
        assert_eq!(report.roc.last().map(|p| (p.fpr, p.tpr)), Some((1.0, 1.0)));
    }

    #[test]
    fn no_students_yields_neutral_metrics() {
        let config = ModelConfig::default();
        let report = validate(&[], &config, &MetricsEngine::manual());
        assert_eq!(report.samples, 0);
        assert_eq!(report.metrics, MetricsResult::default());
        assert!(report.roc.is_empty());
    }
}
