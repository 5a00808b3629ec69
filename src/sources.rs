use std::fmt;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::models::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Attendance,
    Roster,
    Bimester1,
    Bimester2,
    Bimester3,
    Incidents,
    Survey,
}

impl Source {
    pub const ALL: [Source; 7] = [
        Source::Attendance,
        Source::Roster,
        Source::Bimester1,
        Source::Bimester2,
        Source::Bimester3,
        Source::Incidents,
        Source::Survey,
    ];

    pub fn collection(self) -> &'static str {
        match self {
            Source::Attendance => "asistencia",
            Source::Roster => "nomina",
            Source::Bimester1 => "primer_bimestre",
            Source::Bimester2 => "segundo_bimestre",
            Source::Bimester3 => "tercer_bimestre",
            Source::Incidents => "incidente",
            Source::Survey => "encuesta",
        }
    }

    pub fn from_collection(name: &str) -> Option<Source> {
        Source::ALL.into_iter().find(|s| s.collection() == name)
    }

    pub fn bimester(self) -> Option<usize> {
        match self {
            Source::Bimester1 => Some(1),
            Source::Bimester2 => Some(2),
            Source::Bimester3 => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSnapshot {
    pub attendance: Vec<RawRecord>,
    pub roster: Vec<RawRecord>,
    pub bimesters: [Vec<RawRecord>; 3],
    pub incidents: Vec<RawRecord>,
    pub survey: Vec<RawRecord>,
}

impl SourceSnapshot {
    pub fn records(&self, source: Source) -> &[RawRecord] {
        match source {
            Source::Attendance => &self.attendance,
            Source::Roster => &self.roster,
            Source::Bimester1 => &self.bimesters[0],
            Source::Bimester2 => &self.bimesters[1],
            Source::Bimester3 => &self.bimesters[2],
            Source::Incidents => &self.incidents,
            Source::Survey => &self.survey,
        }
    }

    pub fn set(&mut self, source: Source, records: Vec<RawRecord>) {
        match source {
            Source::Attendance => self.attendance = records,
            Source::Roster => self.roster = records,
            Source::Bimester1 => self.bimesters[0] = records,
            Source::Bimester2 => self.bimesters[1] = records,
            Source::Bimester3 => self.bimesters[2] = records,
            Source::Incidents => self.incidents = records,
            Source::Survey => self.survey = records,
        }
    }

    /// Reads `<dir>/<collection>.json` (an array of objects) or
    /// `<dir>/<collection>.csv`. Missing collections are empty.
    pub fn load_dir(dir: &Path) -> PipelineResult<Self> {
        let mut snapshot = SourceSnapshot::default();
        for source in Source::ALL {
            let json_path = dir.join(format!("{}.json", source.collection()));
            let csv_path = dir.join(format!("{}.csv", source.collection()));
            let records = if json_path.exists() {
                read_json_records(&json_path)?
            } else if csv_path.exists() {
                read_csv_records(&csv_path)?
            } else {
                debug!("no file for collection {} in {}", source, dir.display());
                Vec::new()
            };
            snapshot.set(source, records);
        }
        Ok(snapshot)
    }
}

pub fn read_json_records(path: &Path) -> PipelineResult<Vec<RawRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Source(format!("{}: {}", path.display(), e)))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| PipelineError::Source(format!("{}: {}", path.display(), e)))?;

    let Value::Array(items) = value else {
        return Err(PipelineError::Source(format!(
            "{}: expected a JSON array of documents",
            path.display()
        )));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(map) => Ok(map),
            _ => Err(PipelineError::Source(format!(
                "{}: entry {} is not an object",
                path.display(),
                idx
            ))),
        })
        .collect()
}

pub fn read_csv_records(path: &Path) -> PipelineResult<Vec<RawRecord>> {
    let reader = csv::Reader::from_path(path)
        .map_err(|e| PipelineError::Source(format!("{}: {}", path.display(), e)))?;
    csv_records(reader).map_err(|e| PipelineError::Source(format!("{}: {}", path.display(), e)))
}

pub fn csv_records<R: std::io::Read>(mut reader: csv::Reader<R>) -> csv::Result<Vec<RawRecord>> {
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let doc: RawRecord = headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| (header.trim().to_string(), infer_cell(cell)))
            .collect();
        records.push(doc);
    }
    Ok(records)
}

/// Empty -> null, canonical integers and decimals -> numbers, else string.
/// Identifiers with leading zeros stay strings.
pub fn infer_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        if n.to_string() == trimmed {
            return Value::from(n);
        }
        return Value::String(trimmed.to_string());
    }
    let leading_zero = trimmed.starts_with('0') && !trimmed.starts_with("0.");
    if !leading_zero && trimmed.contains('.') {
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Value::from(f);
            }
        }
    }
    Value::String(trimmed.to_string())
}
