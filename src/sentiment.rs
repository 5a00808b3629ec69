use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::RiskFlag;

const NO_COMMENT_PHRASES: &[&str] = &[
    "nada",
    ".",
    "",
    "ninguno",
    "ninguna",
    "n/a",
    "sin comentarios",
    "sin comentario",
    "no hay",
    "ningún",
    "ninguna observación",
];

/// Weighted x2.
const STRONG_NEGATIVE: &[&str] = &[
    "no me gusta", "no me gustó", "odio", "odiar", "terrible", "horrible",
    "aburrido", "aburrida", "aburran", "aburren", "monótona", "monótono",
    "triste", "tristeza", "enojado", "enojada", "preocupado", "preocupada",
    "cansado", "cansada", "estresado", "estresada", "molesto", "molesta",
    "frustrado", "frustrada", "desanimado", "desanimada", "preocupante",
    "injusto", "injusta", "maltrato", "violencia", "peleas", "pelea",
    "conflicto", "conflictos", "agresión", "agresiones", "miedo", "temor",
    "ansiedad", "nervioso", "nerviosa", "inseguro", "insegura", "solo", "sola",
    "solitario", "abandonado", "abandonada", "discriminar",
    "discriminación", "bullying", "acoso", "burla", "burlas", "desfasados",
    "desfasadas", "desactualizado", "desactualizada",
];

const NEGATIVE: &[&str] = &[
    "mal", "malo", "mala", "problema", "problemas", "difícil", "dificil",
    "preocupación",
];

const POSITIVE: &[&str] = &[
    "bien", "bueno", "buena", "excelente", "genial", "me gusta", "me gustó",
    "feliz", "contento", "contenta", "satisfecho", "satisfecha", "agradecido",
    "agradecida", "perfecto", "perfecta", "maravilloso", "maravillosa",
    "mejor", "mejora", "mejorado", "mejorada", "progreso", "avance", "avances",
    "apoyo", "ayuda", "compañerismo", "amistad", "respeto", "tranquilo", "tranquila",
    "motivado", "motivada", "entusiasmado", "entusiasmada", "orgulloso", "orgullosa",
    "alegre", "alegría", "divertido", "divertida", "emocionado", "emocionada",
    "esperanza", "optimista", "confianza", "seguro", "segura", "cómodo", "cómoda",
];

#[derive(Error, Debug)]
pub enum SentimentError {
    #[error("sentiment request failed: {0}")]
    Request(String),

    #[error("sentiment service error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("failed to parse sentiment response: {0}")]
    Parse(String),

    #[error("invalid lexicon pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    #[serde(rename = "POS")]
    Positive,
    #[serde(rename = "NEU")]
    Neutral,
    #[serde(rename = "NEG")]
    Negative,
}

impl Polarity {
    pub fn flag(self) -> RiskFlag {
        RiskFlag::from_risk(self == Polarity::Negative)
    }
}

pub trait SentimentModel: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, text: &str) -> Result<Polarity, SentimentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LexiconScore {
    /// Strong-negative occurrences, already doubled.
    pub strong_negative: usize,
    pub negative: usize,
    pub positive: usize,
}

impl LexiconScore {
    pub fn total_negative(&self) -> usize {
        self.strong_negative + self.negative
    }

    /// Cascade order matters: strong negatives are judged before the plain
    /// negative/positive comparison.
    pub fn flag(&self) -> RiskFlag {
        let neg = self.total_negative();
        let pos = self.positive;

        if self.strong_negative > 0 {
            if pos == 0 || neg > pos {
                return RiskFlag::AtRisk;
            }
            if self.strong_negative as f64 / 2.0 > pos as f64 {
                return RiskFlag::AtRisk;
            }
        }
        RiskFlag::from_risk(neg > pos)
    }
}

fn compile(phrases: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    phrases
        .iter()
        .map(|phrase| Regex::new(&format!(r"\b{}\b", regex::escape(phrase))))
        .collect()
}

fn count_matches(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().map(|p| p.find_iter(text).count()).sum()
}

pub struct RuleBasedSentiment {
    strong_negative: Vec<Regex>,
    negative: Vec<Regex>,
    positive: Vec<Regex>,
}

impl RuleBasedSentiment {
    pub fn new() -> Result<Self, SentimentError> {
        Ok(Self {
            strong_negative: compile(STRONG_NEGATIVE)?,
            negative: compile(NEGATIVE)?,
            positive: compile(POSITIVE)?,
        })
    }

    pub fn score(&self, text: &str) -> LexiconScore {
        let lower = text.trim().to_lowercase();
        LexiconScore {
            strong_negative: count_matches(&self.strong_negative, &lower) * 2,
            negative: count_matches(&self.negative, &lower),
            positive: count_matches(&self.positive, &lower),
        }
    }
}

impl SentimentModel for RuleBasedSentiment {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn classify(&self, text: &str) -> Result<Polarity, SentimentError> {
        let score = self.score(text);
        let polarity = if score.flag().is_at_risk() {
            Polarity::Negative
        } else if score.positive > 0 {
            Polarity::Positive
        } else {
            Polarity::Neutral
        };
        if score.total_negative() > 0 {
            debug!(
                "lexicon scored text ({} neg, {} pos) as {:?}",
                score.total_negative(),
                score.positive,
                polarity
            );
        }
        Ok(polarity)
    }
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    output: Polarity,
}

/// Expects `POST {base}/predict {"text": ..}` -> `{"output": "POS"|"NEU"|"NEG"}`
/// and a `GET {base}/health` check.
pub struct HttpSentimentModel {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpSentimentModel {
    pub fn connect(base_url: &str, timeout: Duration) -> Result<Self, SentimentError> {
        let agent = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = agent
            .get(&format!("{base_url}/health"))
            .call()
            .map_err(|e| SentimentError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.into_body().read_to_string().unwrap_or_default();
            return Err(SentimentError::Status { status, message });
        }

        Ok(Self { base_url, agent })
    }
}

impl SentimentModel for HttpSentimentModel {
    fn name(&self) -> &str {
        "http"
    }

    fn classify(&self, text: &str) -> Result<Polarity, SentimentError> {
        let response = self
            .agent
            .post(&format!("{}/predict", self.base_url))
            .header("Content-Type", "application/json")
            .send_json(&PredictRequest { text })
            .map_err(|e| SentimentError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.into_body().read_to_string().unwrap_or_default();
            return Err(SentimentError::Status { status, message });
        }

        let body: PredictResponse = response
            .into_body()
            .read_json()
            .map_err(|e| SentimentError::Parse(e.to_string()))?;
        Ok(body.output)
    }
}

pub struct SentimentClassifier {
    rules: RuleBasedSentiment,
    advanced: Option<Box<dyn SentimentModel>>,
}

impl SentimentClassifier {
    pub fn rule_based() -> Result<Self, SentimentError> {
        Ok(Self {
            rules: RuleBasedSentiment::new()?,
            advanced: None,
        })
    }

    pub fn with_model(mut self, model: Box<dyn SentimentModel>) -> Self {
        self.advanced = Some(model);
        self
    }

    /// Lexicon classifier, upgraded to the HTTP service when `url` is set and
    /// the service answers its health check.
    pub fn from_service(url: Option<&str>, timeout: Duration) -> Result<Self, SentimentError> {
        let classifier = Self::rule_based()?;
        let Some(url) = url else {
            info!("using lexicon sentiment classifier");
            return Ok(classifier);
        };

        let model = HttpSentimentModel::connect(url, timeout)
            .map(|model| Box::new(model) as Box<dyn SentimentModel>);
        Ok(classifier.with_model_or_lexicon(url, model))
    }

    fn with_model_or_lexicon(
        self,
        url: &str,
        model: Result<Box<dyn SentimentModel>, SentimentError>,
    ) -> Self {
        match model {
            Ok(model) => {
                info!("using sentiment service at {}", url);
                self.with_model(model)
            }
            Err(e) => {
                warn!(
                    "sentiment service at {} unavailable ({}); using lexicon classifier",
                    url, e
                );
                self
            }
        }
    }

    pub fn model_name(&self) -> &str {
        self.advanced
            .as_deref()
            .map(|m| m.name())
            .unwrap_or_else(|| self.rules.name())
    }

    /// Total: every input yields a flag. Blank text and "no comment"
    /// answers are no risk.
    pub fn flag(&self, text: Option<&str>) -> RiskFlag {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return RiskFlag::NoRisk;
        };
        let lower = text.to_lowercase();
        if NO_COMMENT_PHRASES.contains(&lower.as_str()) {
            return RiskFlag::NoRisk;
        }

        if let Some(model) = &self.advanced {
            match model.classify(text) {
                Ok(polarity) => return polarity.flag(),
                Err(e) => warn!("{} sentiment model failed, using lexicon: {}", model.name(), e),
            }
        }

        self.rules.score(text).flag()
    }
}
