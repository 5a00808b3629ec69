use thiserror::Error;

/// Failures that abort an analysis run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no students were found to analyse after integrating all sources")]
    NoStudents,

    #[error("failed to retrieve collection '{source_name}': {message}")]
    Retrieval {
        source_name: String,
        message: String,
    },

    #[error("invalid source data: {0}")]
    Source(String),

    #[error("invalid model configuration: {0}")]
    Config(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
