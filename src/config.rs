use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};

pub const MODEL_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PenaltyWeights {
    pub attendance: f64,
    pub incidents: f64,
    pub sentiment: f64,
    pub family: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            attendance: 1.0,
            incidents: 1.0,
            sentiment: 1.0,
            family: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Qualitative symbol -> numeric grade. Keys are stored upper-cased and
    /// an override replaces the whole table.
    pub grade_map: HashMap<String, f64>,
    /// Grade assumed when a bimester grade is absent or unrecognised.
    pub missing_grade: f64,
    pub pass_threshold: f64,
    /// Absence percentage at or above which attendance is a risk.
    pub critical_absence_pct: f64,
    pub penalty_weights: PenaltyWeights,
    /// Largest change allowed between the last known grade and the projection.
    pub max_projection_delta: f64,
    /// Inclusive (min, max) bounds of the grading scale.
    pub grade_scale: (f64, f64),
}

impl Default for ModelConfig {
    fn default() -> Self {
        let grade_map = [("C", 5.0), ("B", 13.0), ("A", 16.0), ("AD", 19.0)]
            .into_iter()
            .map(|(symbol, grade)| (symbol.to_string(), grade))
            .collect();

        Self {
            grade_map,
            missing_grade: 5.0,
            pass_threshold: 12.0,
            critical_absence_pct: 30.0,
            penalty_weights: PenaltyWeights::default(),
            max_projection_delta: 4.0,
            grade_scale: (5.0, 20.0),
        }
    }
}

impl ModelConfig {
    /// Reads a TOML override file; absent keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model config {}", path.display()))?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> PipelineResult<Self> {
        let mut config: ModelConfig =
            toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.grade_map = config
            .grade_map
            .into_iter()
            .map(|(symbol, grade)| (symbol.trim().to_uppercase(), grade))
            .collect();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let (min, max) = self.grade_scale;
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(PipelineError::Config(format!(
                "grade scale [{min}, {max}] is not a valid range"
            )));
        }
        if !(self.max_projection_delta >= 0.0) {
            return Err(PipelineError::Config(
                "max_projection_delta must be non-negative".to_string(),
            ));
        }
        let weights = &self.penalty_weights;
        if [
            weights.attendance,
            weights.incidents,
            weights.sentiment,
            weights.family,
        ]
        .iter()
        .any(|w| !(*w >= 0.0))
        {
            return Err(PipelineError::Config(
                "penalty weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn clamp_grade(&self, grade: f64) -> f64 {
        let (min, max) = self.grade_scale;
        grade.max(min).min(max)
    }
}
