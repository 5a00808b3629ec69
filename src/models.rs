use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// A loosely typed source document: field name -> JSON value, in source order.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Binary risk indicator. Serialises as `0` (at risk) or `1` (no risk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RiskFlag {
    AtRisk,
    #[default]
    NoRisk,
}

impl RiskFlag {
    pub fn from_risk(at_risk: bool) -> Self {
        if at_risk {
            RiskFlag::AtRisk
        } else {
            RiskFlag::NoRisk
        }
    }

    pub fn value(self) -> u8 {
        match self {
            RiskFlag::AtRisk => 0,
            RiskFlag::NoRisk => 1,
        }
    }

    pub fn is_at_risk(self) -> bool {
        self == RiskFlag::AtRisk
    }

    /// `(1 - flag) * weight`
    pub fn penalty(self, weight: f64) -> f64 {
        f64::from(1 - self.value()) * weight
    }
}

impl Serialize for RiskFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.value())
    }
}

/// Pass/fail classification of a grade. Serialises as `1` (pass) or `0` (fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Fail,
    Pass,
}

impl Outcome {
    pub fn value(self) -> u8 {
        match self {
            Outcome::Fail => 0,
            Outcome::Pass => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Pass => "[OK] APRUEBA",
            Outcome::Fail => "[X] DESAPRUEBA",
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RiskFlags {
    pub attendance: RiskFlag,
    pub incidents: RiskFlag,
    pub sentiment: RiskFlag,
    pub family: RiskFlag,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub grade: f64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub section: String,
    pub grade_level: String,
    pub gender: String,
    pub grades: [f64; 3],
    pub flags: RiskFlags,
    pub projection: Option<Projection>,
}

impl StudentRecord {
    pub fn new(id: impl Into<String>, default_grade: f64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            section: String::new(),
            grade_level: String::new(),
            gender: String::new(),
            grades: [default_grade; 3],
            flags: RiskFlags::default(),
            projection: None,
        }
    }
}

// Per-source fragments produced by the aggregators.

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEntry {
    pub id: String,
    pub name: String,
    pub section: String,
    pub grade_level: String,
    pub presences: u32,
    pub absences: u32,
    pub flag: RiskFlag,
}

impl AttendanceEntry {
    pub fn absence_pct(&self) -> f64 {
        let total = self.presences + self.absences;
        if total == 0 {
            0.0
        } else {
            f64::from(self.absences) / f64::from(total) * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub gender: String,
    pub score: i32,
    pub flag: RiskFlag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BimesterEntry {
    pub id: String,
    pub name: String,
    pub grade: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentEntry {
    pub name: String,
    pub flag: RiskFlag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyEntry {
    pub id: String,
    pub flag: RiskFlag,
}

// Validation output.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConfusionMatrix {
    #[serde(rename = "verdaderos_positivos")]
    pub true_positives: usize,
    #[serde(rename = "falsos_positivos")]
    pub false_positives: usize,
    #[serde(rename = "verdaderos_negativos")]
    pub true_negatives: usize,
    #[serde(rename = "falsos_negativos")]
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsResult {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub auc_roc: f64,
    #[serde(rename = "matriz_confusion")]
    pub confusion: ConfusionMatrix,
}

impl Default for MetricsResult {
    fn default() -> Self {
        Self {
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
            auc_roc: 0.5,
            confusion: ConfusionMatrix::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RocPoint {
    pub fpr: f64,
    pub tpr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    /// Bimesters 1-2 predict the known bimester 3.
    Temporal,
    /// Fourth-period projections scored against bimester 3.
    Estandar,
}

// Assembled result.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FactorCount {
    pub sin_riesgo: usize,
    pub con_riesgo: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RiskFactorBreakdown {
    pub asistencia: FactorCount,
    pub incidencias: FactorCount,
    pub sentimiento: FactorCount,
    pub situacion_familiar: FactorCount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub aprueba: usize,
    pub desaprueba: usize,
    pub porcentaje_aprueba: f64,
    pub porcentaje_desaprueba: f64,
    pub promedio_nota_proyectada: f64,
    #[serde(flatten)]
    pub validation: MetricsResult,
    pub metodo_validacion: ValidationMethod,
    pub muestras_validacion: usize,
    pub curva_roc: Vec<RocPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResult {
    #[serde(rename = "DNI")]
    pub id: String,
    #[serde(rename = "Apellidos_Nombres")]
    pub name: String,
    #[serde(rename = "Genero")]
    pub gender: String,
    #[serde(rename = "Seccion")]
    pub section: String,
    #[serde(rename = "Grado")]
    pub grade_level: String,
    #[serde(rename = "NotaBim1")]
    pub grade_1: f64,
    #[serde(rename = "NotaBim2")]
    pub grade_2: f64,
    #[serde(rename = "NotaBim3")]
    pub grade_3: f64,
    #[serde(rename = "Analisis_Asistencia")]
    pub attendance: RiskFlag,
    #[serde(rename = "Analisis_Incidencias")]
    pub incidents: RiskFlag,
    #[serde(rename = "Analisis_Sentimiento_Estudiante")]
    pub sentiment: RiskFlag,
    #[serde(rename = "Analisis_Situacion_Familiar")]
    pub family: RiskFlag,
    #[serde(rename = "Nota_Proyectada_B4")]
    pub projected_grade: f64,
    #[serde(rename = "Prediccion_Final_Binaria")]
    pub outcome: Outcome,
    #[serde(rename = "Estado")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub version: String,
    pub fecha_analisis: DateTime<Utc>,
    pub total_estudiantes: usize,
    pub metricas: SummaryMetrics,
    pub factores_riesgo: RiskFactorBreakdown,
    pub resultados: Vec<StudentResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
}

impl FailureResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_serialize_as_binary_integers() {
        let flags = [RiskFlag::AtRisk, RiskFlag::NoRisk];
        assert_eq!(serde_json::to_string(&flags).unwrap(), "[0,1]");
        assert_eq!(serde_json::to_string(&Outcome::Pass).unwrap(), "1");
    }

    #[test]
    fn penalty_only_applies_to_risk() {
        assert_eq!(RiskFlag::AtRisk.penalty(1.5), 1.5);
        assert_eq!(RiskFlag::NoRisk.penalty(1.5), 0.0);
    }

    #[test]
    fn absence_percentage_handles_empty_attendance() {
        let entry = AttendanceEntry {
            id: "1".to_string(),
            name: String::new(),
            section: String::new(),
            grade_level: String::new(),
            presences: 0,
            absences: 0,
            flag: RiskFlag::NoRisk,
        };
        assert_eq!(entry.absence_pct(), 0.0);
    }

    #[test]
    fn metrics_default_is_the_empty_input_result() {
        let metrics = MetricsResult::default();
        assert_eq!(metrics.auc_roc, 0.5);
        assert_eq!(metrics.confusion.total(), 0);
        let value = serde_json::to_value(metrics).unwrap();
        assert_eq!(value["matriz_confusion"]["falsos_negativos"], 0);
    }
}
