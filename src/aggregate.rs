use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::grades::grade_or_default;
use crate::models::{
    AttendanceEntry, BimesterEntry, IncidentEntry, RawRecord, RiskFlag, RosterEntry, SurveyEntry,
};
use crate::normalize::{
    display_name, field_text, first_text, first_truthy, is_truthy, student_id, value_text,
    GRADE_LEVEL_ALIASES, SECTION_ALIASES, SURVEY_TEXT_ALIASES,
};
use crate::sentiment::SentimentClassifier;
use crate::sources::Source;

/// Attendance fields that are not school days.
const ATTENDANCE_FIXED_FIELDS: &[&str] = &[
    "DNI",
    "dni",
    "Nº",
    "Apellidos_Nombres",
    "APELLIDOS_Y_NOMBRES",
    "ALUMNOS/AS",
    "SECCIÓN",
    "GRADO",
    "Seccion",
    "Grado",
    "_id",
];

const GRADE_FIELD: &str = "PROMEDIO_APRENDIZAJE_AUTONOMO";
const INCIDENT_NAME_FIELD: &str = "Nombre y Apellido";
const INCIDENT_SEVERITY_FIELD: &str = "Tipo de Falta";
const MILD_SEVERITY: &str = "leve";

/// Minimum roster score for a stable family situation.
const FAMILY_STABLE_SCORE: i32 = 4;

/// Sums daily attendance codes per (identifier, name): `1` is present,
/// `0` and `2` are absent, anything else is ignored.
pub fn aggregate_attendance(docs: &[RawRecord], config: &ModelConfig) -> Vec<AttendanceEntry> {
    let mut entries: Vec<AttendanceEntry> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for doc in docs {
        let Some(id) = student_id(doc) else {
            continue;
        };
        let name = display_name(doc);

        let mut presences = 0u32;
        let mut absences = 0u32;
        for (field, value) in doc {
            if ATTENDANCE_FIXED_FIELDS.contains(&field.as_str()) {
                continue;
            }
            match value.as_f64() {
                Some(code) if code == 1.0 => presences += 1,
                Some(code) if code == 0.0 || code == 2.0 => absences += 1,
                _ => {}
            }
        }

        let slot = match index.entry((id.clone(), name.clone())) {
            Entry::Occupied(slot) => *slot.get(),
            Entry::Vacant(slot) => {
                entries.push(AttendanceEntry {
                    id,
                    name,
                    section: first_text(doc, SECTION_ALIASES).unwrap_or_default(),
                    grade_level: first_text(doc, GRADE_LEVEL_ALIASES).unwrap_or_default(),
                    presences: 0,
                    absences: 0,
                    flag: RiskFlag::NoRisk,
                });
                *slot.insert(entries.len() - 1)
            }
        };
        entries[slot].presences += presences;
        entries[slot].absences += absences;
    }

    for entry in &mut entries {
        entry.flag = RiskFlag::from_risk(entry.absence_pct() >= config.critical_absence_pct);
    }

    info!("attendance aggregated: {} records", entries.len());
    entries
}

fn answered_yes(doc: &RawRecord, field: &str) -> bool {
    field_text(doc, field)
        .map(|text| text.to_uppercase() == "SI")
        .unwrap_or(false)
}

pub fn family_score(doc: &RawRecord) -> i32 {
    let father_alive = if answered_yes(doc, "padre_vive") { 1 } else { -1 };
    let mother_alive = if answered_yes(doc, "madre_vive") { 1 } else { -1 };
    let works = if answered_yes(doc, "trabaja_estudiante") { -1 } else { 1 };
    let disability = match doc.get("tipo_discapacidad") {
        Some(value) if is_truthy(value) && field_text(doc, "tipo_discapacidad").is_some() => -2,
        _ => 1,
    };
    let enrollment = match field_text(doc, "situacion_matricula")
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("P") => 1,
        Some("PG") => -1,
        _ => 0,
    };

    father_alive + mother_alive + works + disability + enrollment
}

pub fn aggregate_roster(docs: &[RawRecord]) -> Vec<RosterEntry> {
    let entries: Vec<RosterEntry> = docs
        .iter()
        .filter_map(|doc| {
            let id = student_id(doc)?;
            let score = family_score(doc);
            Some(RosterEntry {
                id,
                name: display_name(doc),
                gender: field_text(doc, "sexo").unwrap_or_default(),
                score,
                flag: RiskFlag::from_risk(score < FAMILY_STABLE_SCORE),
            })
        })
        .collect();

    info!("roster aggregated: {} records", entries.len());
    entries
}

pub fn aggregate_bimester(
    docs: &[RawRecord],
    source: Source,
    config: &ModelConfig,
) -> Vec<BimesterEntry> {
    let entries: Vec<BimesterEntry> = docs
        .iter()
        .filter_map(|doc| {
            let id = student_id(doc)?;
            Some(BimesterEntry {
                id,
                name: display_name(doc),
                grade: grade_or_default(config, doc.get(GRADE_FIELD)),
            })
        })
        .collect();

    info!(
        "bimester {} aggregated from {}: {} records",
        source.bimester().unwrap_or_default(),
        source,
        entries.len()
    );
    entries
}

/// Groups incidents by student name. Any non-mild incident marks the
/// student at risk, and later mild incidents never clear it.
pub fn aggregate_incidents(docs: &[RawRecord]) -> Vec<IncidentEntry> {
    let mut entries: Vec<IncidentEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for doc in docs {
        let name = field_text(doc, INCIDENT_NAME_FIELD).unwrap_or_else(|| display_name(doc));
        if name.is_empty() {
            continue;
        }
        let mild = field_text(doc, INCIDENT_SEVERITY_FIELD)
            .map(|severity| severity.to_lowercase() == MILD_SEVERITY)
            .unwrap_or(false);

        match index.get(&name) {
            Some(&slot) => {
                if !mild {
                    entries[slot].flag = RiskFlag::AtRisk;
                }
            }
            None => {
                index.insert(name.clone(), entries.len());
                entries.push(IncidentEntry {
                    name,
                    flag: RiskFlag::from_risk(!mild),
                });
            }
        }
    }

    info!("incidents aggregated: {} students", entries.len());
    entries
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurveyAggregate {
    pub entries: Vec<SurveyEntry>,
    pub positive: usize,
    pub negative: usize,
    pub empty: usize,
}

/// First response per identifier wins; later ones are ignored.
pub fn aggregate_survey(docs: &[RawRecord], classifier: &SentimentClassifier) -> SurveyAggregate {
    let mut aggregate = SurveyAggregate::default();
    let mut seen: HashSet<String> = HashSet::new();

    for doc in docs {
        let Some(id) = student_id(doc) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }

        let text = first_truthy(doc, SURVEY_TEXT_ALIASES)
            .and_then(value_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let flag = match text.as_deref() {
            None => {
                aggregate.empty += 1;
                RiskFlag::NoRisk
            }
            Some(text) => classifier.flag(Some(text)),
        };
        if flag.is_at_risk() {
            aggregate.negative += 1;
            debug!("negative survey text for {}", id);
        } else {
            aggregate.positive += 1;
        }
        aggregate.entries.push(SurveyEntry { id, flag });
    }

    info!(
        "survey aggregated from {} responses: {} positive, {} negative, {} empty",
        docs.len(),
        aggregate.positive,
        aggregate.negative,
        aggregate.empty
    );
    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn attendance_below_threshold_is_no_risk() {
        let mut doc = record(json!({"DNI": "100", "Apellidos_Nombres": "ROJAS Ana", "SECCIÓN": "A", "GRADO": 3}));
        for day in 0..20 {
            doc.insert(format!("D{day:02}"), json!(1));
        }
        for day in 20..25 {
            doc.insert(format!("D{day:02}"), json!(0));
        }

        let entries = aggregate_attendance(&[doc], &ModelConfig::default());
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!((entry.presences, entry.absences), (20, 5));
        assert_eq!(entry.absence_pct(), 20.0);
        assert_eq!(entry.flag, RiskFlag::NoRisk);
        assert_eq!(entry.section, "A");
        assert_eq!(entry.grade_level, "3");
    }

    #[test]
    fn attendance_sums_across_documents_and_flags_at_threshold() {
        let docs = vec![
            record(json!({"DNI": "7", "Apellidos_Nombres": "LUNA Leo", "L": 1, "M": 2, "X": "T"})),
            record(json!({"DNI": "7", "Apellidos_Nombres": "LUNA Leo", "J": 1, "V": 1, "S": 0})),
            record(json!({"Apellidos_Nombres": "sin dni", "L": 0})),
        ];
        let entries = aggregate_attendance(&docs, &ModelConfig::default());
        assert_eq!(entries.len(), 1);
        // 3 present, 2 absent -> 40%
        assert_eq!((entries[0].presences, entries[0].absences), (3, 2));
        assert_eq!(entries[0].flag, RiskFlag::AtRisk);
    }

    #[test]
    fn family_score_uses_fixed_points() {
        let stable = record(json!({
            "DNI": "1", "padre_vive": "SI", "madre_vive": "si",
            "trabaja_estudiante": "NO", "tipo_discapacidad": "", "situacion_matricula": "P",
        }));
        assert_eq!(family_score(&stable), 5);

        let fragile = record(json!({
            "DNI": "2", "padre_vive": "NO", "madre_vive": "SI",
            "trabaja_estudiante": "SI", "tipo_discapacidad": "Visual", "situacion_matricula": "PG",
        }));
        assert_eq!(family_score(&fragile), -4);

        let entries = aggregate_roster(&[stable, fragile]);
        assert_eq!(entries[0].flag, RiskFlag::NoRisk);
        assert_eq!(entries[1].flag, RiskFlag::AtRisk);
    }

    #[test]
    fn roster_threshold_is_inclusive() {
        // 1 + 1 + 1 + 1 + 0 = 4
        let doc = record(json!({"DNI": "3", "padre_vive": "SI", "madre_vive": "SI", "sexo": "M"}));
        let entries = aggregate_roster(&[doc]);
        assert_eq!(entries[0].score, 4);
        assert_eq!(entries[0].flag, RiskFlag::NoRisk);
        assert_eq!(entries[0].gender, "M");
    }

    #[test]
    fn bimester_grades_default_when_unconvertible() {
        let docs = vec![
            record(json!({"DNI": "1", "PROMEDIO_APRENDIZAJE_AUTONOMO": "AD"})),
            record(json!({"DNI": "2", "PROMEDIO_APRENDIZAJE_AUTONOMO": ""})),
            record(json!({"DNI": "3"})),
            record(json!({"DNI": "", "PROMEDIO_APRENDIZAJE_AUTONOMO": "A"})),
        ];
        let entries = aggregate_bimester(&docs, Source::Bimester1, &ModelConfig::default());
        let grades: Vec<f64> = entries.iter().map(|e| e.grade).collect();
        assert_eq!(grades, vec![19.0, 5.0, 5.0]);
    }

    #[test]
    fn incidents_downgrade_but_never_upgrade() {
        let docs = vec![
            record(json!({"Nombre y Apellido": "ROJAS Ana", "Tipo de Falta": "Leve"})),
            record(json!({"Nombre y Apellido": "ROJAS Ana", "Tipo de Falta": "Grave"})),
            record(json!({"Nombre y Apellido": "ROJAS Ana", "Tipo de Falta": "leve"})),
            record(json!({"Nombre y Apellido": "LUNA Leo", "Tipo de Falta": "leve"})),
            record(json!({"Apellidos_Nombres": "PAZ Eva", "Tipo de Falta": "Muy grave"})),
            record(json!({"Tipo de Falta": "Grave"})),
        ];
        let entries = aggregate_incidents(&docs);
        assert_eq!(
            entries,
            vec![
                IncidentEntry { name: "ROJAS Ana".to_string(), flag: RiskFlag::AtRisk },
                IncidentEntry { name: "LUNA Leo".to_string(), flag: RiskFlag::NoRisk },
                IncidentEntry { name: "PAZ Eva".to_string(), flag: RiskFlag::AtRisk },
            ]
        );
    }

    #[test]
    fn survey_first_response_wins() {
        let classifier = SentimentClassifier::rule_based().unwrap();
        let docs = vec![
            record(json!({"DNI": "1", "sugerencia_sentimientos": "me siento triste y con miedo"})),
            record(json!({"DNI": "1", "sugerencia_sentimientos": "todo excelente"})),
            record(json!({"DNI": "2", "comentario": "me gusta el colegio"})),
            record(json!({"DNI": "3", "texto": "  "})),
        ];
        let aggregate = aggregate_survey(&docs, &classifier);
        assert_eq!(
            aggregate.entries,
            vec![
                SurveyEntry { id: "1".to_string(), flag: RiskFlag::AtRisk },
                SurveyEntry { id: "2".to_string(), flag: RiskFlag::NoRisk },
                SurveyEntry { id: "3".to_string(), flag: RiskFlag::NoRisk },
            ]
        );
        assert_eq!((aggregate.positive, aggregate.negative, aggregate.empty), (2, 1, 1));
    }

    #[test]
    fn blank_survey_text_shadows_later_fields() {
        let classifier = SentimentClassifier::rule_based().unwrap();
        let docs = vec![
            record(json!({"DNI": "1", "sugerencia_sentimientos": "   ", "comentario": "estoy triste"})),
            record(json!({"DNI": "2", "sugerencia_sentimientos": "", "comentario": "estoy triste"})),
        ];
        let aggregate = aggregate_survey(&docs, &classifier);
        assert_eq!(aggregate.entries[0].flag, RiskFlag::NoRisk);
        // an empty string is falsy, so the next field is read
        assert_eq!(aggregate.entries[1].flag, RiskFlag::AtRisk);
        assert_eq!(aggregate.empty, 1);
    }
}
