use crate::config::{ModelConfig, PenaltyWeights};
use crate::models::{Outcome, Projection, RiskFlags, StudentRecord};

/// Z-score beyond which a grade is treated as an outlier.
const OUTLIER_Z: f64 = 2.0;

const NEXT_PERIOD: f64 = 4.0;

/// Mean and population standard deviation. A zero deviation is reported as
/// `1.0` so z-scores stay finite.
pub fn mean_and_deviation(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let deviation = variance.sqrt();
    (mean, if deviation > 0.0 { deviation } else { 1.0 })
}

pub fn has_outlier(values: &[f64]) -> bool {
    let (mean, deviation) = mean_and_deviation(values);
    values
        .iter()
        .any(|v| ((v - mean) / deviation).abs() > OUTLIER_Z)
}

/// Ordinary least squares over `(x, y)` points; `None` when x has no spread.
pub fn least_squares(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_x2: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if points.is_empty() || denominator == 0.0 {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

/// Extrapolation that skips the middle bimester.
pub fn outlier_projection(grades: [f64; 3]) -> f64 {
    grades[2] + (grades[2] - grades[0]) / 2.0
}

pub fn limit_change(projection: f64, anchor: f64, config: &ModelConfig) -> f64 {
    let delta = config.max_projection_delta;
    projection.min(anchor + delta).max(anchor - delta)
}

pub fn risk_penalty(flags: &RiskFlags, weights: &PenaltyWeights) -> f64 {
    flags.attendance.penalty(weights.attendance)
        + flags.incidents.penalty(weights.incidents)
        + flags.sentiment.penalty(weights.sentiment)
        + flags.family.penalty(weights.family)
}

/// Fourth-period trend before penalties: regression over bimesters 1-3
/// (or the outlier fallback), limited to the allowed change from bimester 3.
pub fn trend_projection(grades: [f64; 3], config: &ModelConfig) -> f64 {
    let clamped = grades.map(|g| config.clamp_grade(g));

    let projection = if has_outlier(&clamped) {
        outlier_projection(clamped)
    } else {
        let points = [(1.0, clamped[0]), (2.0, clamped[1]), (3.0, clamped[2])];
        match least_squares(&points) {
            Some((slope, intercept)) => slope * NEXT_PERIOD + intercept,
            None => clamped[2],
        }
    };

    limit_change(projection, clamped[2], config)
}

pub fn project_grade(grades: [f64; 3], flags: &RiskFlags, config: &ModelConfig) -> f64 {
    let trend = trend_projection(grades, config);
    config.clamp_grade(trend - risk_penalty(flags, &config.penalty_weights))
}

pub fn classify(grade: f64, config: &ModelConfig) -> Outcome {
    if grade >= config.pass_threshold {
        Outcome::Pass
    } else {
        Outcome::Fail
    }
}

pub fn project_student(student: &StudentRecord, config: &ModelConfig) -> Projection {
    let grade = project_grade(student.grades, &student.flags, config);
    Projection {
        grade,
        outcome: classify(grade, config),
    }
}

/// Fills in every student's projection and returns how many are projected
/// to fail.
pub fn score_students(students: &mut [StudentRecord], config: &ModelConfig) -> usize {
    let mut failing = 0;
    for student in students.iter_mut() {
        let projection = project_student(student, config);
        if projection.outcome == Outcome::Fail {
            failing += 1;
        }
        student.projection = Some(projection);
    }
    failing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskFlag;
    use approx::assert_abs_diff_eq;

    fn at_risk(attendance: bool, incidents: bool, sentiment: bool, family: bool) -> RiskFlags {
        RiskFlags {
            attendance: RiskFlag::from_risk(attendance),
            incidents: RiskFlag::from_risk(incidents),
            sentiment: RiskFlag::from_risk(sentiment),
            family: RiskFlag::from_risk(family),
        }
    }

    #[test]
    fn flat_grades_project_flat_and_pass() {
        let config = ModelConfig::default();
        let grade = project_grade([16.0, 16.0, 16.0], &RiskFlags::default(), &config);
        assert_abs_diff_eq!(grade, 16.0, epsilon = 1e-9);
        assert_eq!(classify(grade, &config), Outcome::Pass);
    }

    #[test]
    fn linear_trend_is_extrapolated() {
        let config = ModelConfig::default();
        let grade = project_grade([10.0, 12.0, 14.0], &RiskFlags::default(), &config);
        assert_abs_diff_eq!(grade, 16.0, epsilon = 1e-9);

        let grade = project_grade([5.0, 5.0, 13.0], &RiskFlags::default(), &config);
        assert_abs_diff_eq!(grade, 47.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn closed_form_matches_general_fit() {
        let grades = [7.0, 15.0, 11.0];
        let (slope, intercept) =
            least_squares(&[(1.0, grades[0]), (2.0, grades[1]), (3.0, grades[2])]).unwrap();

        let n = 3.0;
        let sum_y: f64 = grades.iter().sum();
        let sum_xy = grades[0] + grades[1] * 2.0 + grades[2] * 3.0;
        let m = (n * sum_xy - 6.0 * sum_y) / (n * 14.0 - 36.0);
        let b = (sum_y - m * 6.0) / n;

        assert_abs_diff_eq!(slope, m, epsilon = 1e-12);
        assert_abs_diff_eq!(intercept, b, epsilon = 1e-12);
    }

    #[test]
    fn change_is_limited_around_last_bimester() {
        let config = ModelConfig::default();
        // slope 6 would reach 22.33
        assert_abs_diff_eq!(trend_projection([5.0, 9.0, 17.0], &config), 21.0, epsilon = 1e-9);
        assert_abs_diff_eq!(trend_projection([20.0, 16.0, 8.0], &config), 4.0, epsilon = 1e-9);
        assert_eq!(project_grade([20.0, 16.0, 8.0], &RiskFlags::default(), &config), 5.0);
    }

    #[test]
    fn penalties_subtract_configured_weights() {
        let config = ModelConfig::default();
        let flags = at_risk(true, false, false, true);
        assert_eq!(risk_penalty(&flags, &config.penalty_weights), 2.0);
        let grade = project_grade([16.0, 16.0, 16.0], &flags, &config);
        assert_abs_diff_eq!(grade, 14.0, epsilon = 1e-9);

        let everything = at_risk(true, true, true, true);
        let grade = project_grade([8.0, 8.0, 8.0], &everything, &config);
        assert_eq!(grade, 5.0);
        assert_eq!(classify(grade, &config), Outcome::Fail);
    }

    #[test]
    fn out_of_scale_grades_are_clamped_first() {
        let config = ModelConfig::default();
        let grade = project_grade([25.0, 25.0, 25.0], &RiskFlags::default(), &config);
        assert_eq!(grade, 20.0);
        let grade = project_grade([0.0, 0.0, 0.0], &RiskFlags::default(), &config);
        assert_eq!(grade, 5.0);
    }

    #[test]
    fn outlier_detection_uses_population_z_scores() {
        // Three points can never exceed |z| = sqrt(2).
        assert!(!has_outlier(&[5.0, 5.0, 20.0]));
        assert!(has_outlier(&[10.0, 10.0, 10.0, 10.0, 10.0, 30.0]));
        assert!(!has_outlier(&[12.0, 12.0, 12.0]));
        assert_eq!(outlier_projection([10.0, 3.0, 14.0]), 16.0);
    }

    #[test]
    fn projection_stays_in_scale_and_within_delta() {
        let config = ModelConfig::default();
        let flags = at_risk(true, true, false, false);
        let steps = [5.0, 8.0, 11.0, 13.0, 16.0, 19.0, 20.0];
        for &g1 in &steps {
            for &g2 in &steps {
                for &g3 in &steps {
                    let trend = trend_projection([g1, g2, g3], &config);
                    assert!((trend - g3).abs() <= config.max_projection_delta + 1e-9);

                    let grade = project_grade([g1, g2, g3], &flags, &config);
                    assert!(grade >= 5.0 && grade <= 20.0);
                }
            }
        }
    }

    #[test]
    fn scoring_fills_projections() {
        let config = ModelConfig::default();
        let mut students = vec![StudentRecord::new("1", 16.0), StudentRecord::new("2", 5.0)];
        let failing = score_students(&mut students, &config);
        assert_eq!(failing, 1);
        assert_eq!(students[0].projection.unwrap().outcome, Outcome::Pass);
        assert_eq!(students[1].projection.unwrap().outcome, Outcome::Fail);
    }
}
