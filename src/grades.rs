use serde_json::Value;

use crate::config::ModelConfig;
use crate::normalize::{is_truthy, value_text};

pub fn convert_symbol(config: &ModelConfig, symbol: &str) -> Option<f64> {
    let key = symbol.trim().to_uppercase();
    if key.is_empty() {
        return None;
    }
    config.grade_map.get(&key).copied()
}

/// Converts a raw field value; falsy or unrecognised values yield `None`.
pub fn convert_grade(config: &ModelConfig, value: &Value) -> Option<f64> {
    if !is_truthy(value) {
        return None;
    }
    value_text(value).and_then(|text| convert_symbol(config, &text))
}

pub fn grade_or_default(config: &ModelConfig, value: Option<&Value>) -> f64 {
    value
        .and_then(|v| convert_grade(config, v))
        .unwrap_or(config.missing_grade)
}
