use std::fmt::Write;

use chrono::Utc;

use crate::config::{ModelConfig, MODEL_VERSION};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    AnalysisResult, FactorCount, Outcome, RiskFactorBreakdown, RiskFlag, StudentRecord,
    StudentResult, SummaryMetrics,
};
use crate::risk;
use crate::validation::ValidationReport;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn count_flags(students: &[StudentRecord], flag: impl Fn(&StudentRecord) -> RiskFlag) -> FactorCount {
    let con_riesgo = students.iter().filter(|s| flag(*s).is_at_risk()).count();
    FactorCount {
        sin_riesgo: students.len() - con_riesgo,
        con_riesgo,
    }
}

pub fn summarize_risk_factors(students: &[StudentRecord]) -> RiskFactorBreakdown {
    RiskFactorBreakdown {
        asistencia: count_flags(students, |s| s.flags.attendance),
        incidencias: count_flags(students, |s| s.flags.incidents),
        sentimiento: count_flags(students, |s| s.flags.sentiment),
        situacion_familiar: count_flags(students, |s| s.flags.family),
    }
}

/// Students are ordered by (section, name).
pub fn assemble_result(
    mut students: Vec<StudentRecord>,
    validation: ValidationReport,
    config: &ModelConfig,
) -> PipelineResult<AnalysisResult> {
    if students.is_empty() {
        return Err(PipelineError::NoStudents);
    }

    students.sort_by(|a, b| (&a.section, &a.name).cmp(&(&b.section, &b.name)));

    let total = students.len();
    let mut results = Vec::with_capacity(total);
    let mut passing = 0usize;
    let mut projected_sum = 0.0;

    for student in &students {
        let projection = student
            .projection
            .unwrap_or_else(|| risk::project_student(student, config));
        if projection.outcome == Outcome::Pass {
            passing += 1;
        }
        projected_sum += projection.grade;

        results.push(StudentResult {
            id: student.id.clone(),
            name: student.name.clone(),
            gender: student.gender.clone(),
            section: student.section.clone(),
            grade_level: student.grade_level.clone(),
            grade_1: student.grades[0],
            grade_2: student.grades[1],
            grade_3: student.grades[2],
            attendance: student.flags.attendance,
            incidents: student.flags.incidents,
            sentiment: student.flags.sentiment,
            family: student.flags.family,
            projected_grade: round2(projection.grade),
            outcome: projection.outcome,
            status: projection.outcome.label().to_string(),
        });
    }

    let failing = total - passing;
    let factors = summarize_risk_factors(&students);

    Ok(AnalysisResult {
        success: true,
        version: MODEL_VERSION.to_string(),
        fecha_analisis: Utc::now(),
        total_estudiantes: total,
        metricas: SummaryMetrics {
            aprueba: passing,
            desaprueba: failing,
            porcentaje_aprueba: passing as f64 / total as f64 * 100.0,
            porcentaje_desaprueba: failing as f64 / total as f64 * 100.0,
            promedio_nota_proyectada: projected_sum / total as f64,
            validation: validation.metrics,
            metodo_validacion: validation.method,
            muestras_validacion: validation.samples,
            curva_roc: validation.roc,
        },
        factores_riesgo: factors,
        resultados: results,
    })
}

fn factor_line(output: &mut String, label: &str, count: &FactorCount) {
    let _ = writeln!(
        output,
        "- {}: {} at risk, {} without risk",
        label, count.con_riesgo, count.sin_riesgo
    );
}

pub fn build_report(result: &AnalysisResult, limit: usize) -> String {
    let metrics = &result.metricas;
    let validation = &metrics.validation;
    let mut output = String::new();

    let _ = writeln!(output, "# Student Early Warning Report");
    let _ = writeln!(
        output,
        "Generated {} with model {} for {} students",
        result.fecha_analisis.format("%Y-%m-%d %H:%M UTC"),
        result.version,
        result.total_estudiantes
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Projected Outcomes");
    let _ = writeln!(
        output,
        "- Pass: {} ({:.1}%)",
        metrics.aprueba, metrics.porcentaje_aprueba
    );
    let _ = writeln!(
        output,
        "- Fail: {} ({:.1}%)",
        metrics.desaprueba, metrics.porcentaje_desaprueba
    );
    let _ = writeln!(
        output,
        "- Mean projected grade: {:.2}",
        metrics.promedio_nota_proyectada
    );

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Validation ({:?}, {} samples)",
        metrics.metodo_validacion, metrics.muestras_validacion
    );
    let _ = writeln!(
        output,
        "- Precision {:.3}, recall {:.3}, F1 {:.3}, AUC-ROC {:.3}",
        validation.precision, validation.recall, validation.f1_score, validation.auc_roc
    );
    let cm = &validation.confusion;
    let _ = writeln!(
        output,
        "- Confusion matrix over {} samples: TP {}, FP {}, TN {}, FN {}",
        cm.total(),
        cm.true_positives,
        cm.false_positives,
        cm.true_negatives,
        cm.false_negatives
    );

    let factors = &result.factores_riesgo;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Factors");
    factor_line(&mut output, "Attendance", &factors.asistencia);
    factor_line(&mut output, "Incidents", &factors.incidencias);
    factor_line(&mut output, "Sentiment", &factors.sentimiento);
    factor_line(&mut output, "Family situation", &factors.situacion_familiar);

    let mut at_risk: Vec<&StudentResult> = result
        .resultados
        .iter()
        .filter(|s| s.outcome == Outcome::Fail)
        .collect();
    at_risk.sort_by(|a, b| a.projected_grade.total_cmp(&b.projected_grade));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Projected to Fail");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students are projected to fail.");
    } else {
        for student in at_risk.iter().take(limit) {
            let _ = writeln!(
                output,
                "- {} ({}, section {}) projected {:.2} from {:.0}/{:.0}/{:.0}",
                student.name,
                student.id,
                student.section,
                student.projected_grade,
                student.grade_1,
                student.grade_2,
                student.grade_3
            );
        }
        if at_risk.len() > limit {
            let _ = writeln!(output, "- ... and {} more", at_risk.len() - limit);
        }
    }

    output
}
