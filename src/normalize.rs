use serde_json::Value;

use crate::models::RawRecord;

pub const ID_ALIASES: &[&str] = &["DNI", "Nº", "dni"];

pub const NAME_ALIASES: &[&str] = &[
    "Apellidos_Nombres",
    "APELLIDOS_Y_NOMBRES",
    "ALUMNOS/AS",
    "Nombre y Apellido",
    "nombre_completo",
    "Apellidos Nombres",
    "NOMBRE_COMPLETO",
];

pub const SECTION_ALIASES: &[&str] = &["SECCIÓN", "Seccion"];
pub const GRADE_LEVEL_ALIASES: &[&str] = &["GRADO", "Grado"];

/// Survey free-text fields, most specific first.
pub const SURVEY_TEXT_ALIASES: &[&str] = &[
    "sugerencia_sentimientos",
    "sugerencia_sentimiento",
    "sentimiento",
    "sugerencia",
    "comentario",
    "texto",
];

const NAME_SCAN_KEYWORDS: &[&str] = &["apellido", "nombre"];

pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Python-style truthiness: null, false, 0 and "" are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub fn field_text(doc: &RawRecord, field: &str) -> Option<String> {
    doc.get(field)
        .and_then(value_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn first_text(doc: &RawRecord, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| field_text(doc, alias))
}

/// Value of the first alias that is truthy. A whitespace-only string is
/// truthy, so it still shadows later aliases.
pub fn first_truthy<'a>(doc: &'a RawRecord, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|alias| doc.get(*alias).filter(|value| is_truthy(value)))
}

pub fn student_id(doc: &RawRecord) -> Option<String> {
    let raw = ID_ALIASES
        .iter()
        .find_map(|alias| doc.get(*alias).filter(|v| !v.is_null()))?;
    value_text(raw)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn is_identifier_field(key: &str) -> bool {
    key.eq_ignore_ascii_case("DNI") || key == "Nº" || key == "_id"
}

/// Display name, falling back to any field whose name mentions a surname or
/// name. Empty when nothing matches.
pub fn display_name(doc: &RawRecord) -> String {
    if let Some(name) = first_text(doc, NAME_ALIASES) {
        return name;
    }

    doc.iter()
        .filter(|(key, _)| !is_identifier_field(key))
        .filter(|(key, _)| {
            let lower = key.to_lowercase();
            NAME_SCAN_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .find_map(|(_, value)| {
            value_text(value)
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
        })
        .unwrap_or_default()
}
