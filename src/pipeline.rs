use tracing::info;

use crate::aggregate::{
    aggregate_attendance, aggregate_bimester, aggregate_incidents, aggregate_roster,
    aggregate_survey,
};
use crate::config::ModelConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::merge::{merge_sources, SourceFragments};
use crate::metrics::MetricsEngine;
use crate::models::AnalysisResult;
use crate::report::assemble_result;
use crate::risk::score_students;
use crate::sentiment::SentimentClassifier;
use crate::sources::{Source, SourceSnapshot};
use crate::validation::validate;

pub fn build_fragments(
    snapshot: &SourceSnapshot,
    config: &ModelConfig,
    classifier: &SentimentClassifier,
) -> SourceFragments {
    let bimester_sources = [Source::Bimester1, Source::Bimester2, Source::Bimester3];
    let bimesters = bimester_sources
        .map(|source| aggregate_bimester(snapshot.records(source), source, config));

    SourceFragments {
        attendance: aggregate_attendance(&snapshot.attendance, config),
        roster: aggregate_roster(&snapshot.roster),
        bimesters,
        incidents: aggregate_incidents(&snapshot.incidents),
        survey: aggregate_survey(&snapshot.survey, classifier).entries,
    }
}

/// Aggregate, merge, project, validate and assemble. Fails with
/// `NoStudents` when integration leaves nobody to score.
pub fn run_analysis(
    snapshot: &SourceSnapshot,
    config: &ModelConfig,
    classifier: &SentimentClassifier,
    metrics: &MetricsEngine,
) -> PipelineResult<AnalysisResult> {
    for source in Source::ALL {
        info!("{}: {} documents", source, snapshot.records(source).len());
    }
    info!("sentiment model: {}", classifier.model_name());

    let fragments = build_fragments(snapshot, config, classifier);
    let mut students = merge_sources(&fragments, config).students;
    if students.is_empty() {
        return Err(PipelineError::NoStudents);
    }

    let failing = score_students(&mut students, config);
    info!(
        "projected {} students, {} expected to fail",
        students.len(),
        failing
    );

    let validation = validate(&students, config, metrics);
    assemble_result(students, validation, config)
}
