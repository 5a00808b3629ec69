use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::RawRecord;
use crate::sources::{csv_records, Source, SourceSnapshot};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts one document; `false` when the collection already holds its
/// `source_key`.
async fn insert_document(
    pool: &PgPool,
    dataset: &str,
    source: Source,
    source_key: &str,
    body: &RawRecord,
) -> anyhow::Result<bool> {
    let body = serde_json::to_string(body)?;
    let result = sqlx::query(
        r#"
        INSERT INTO early_warning.source_documents
        (id, dataset, collection, source_key, body)
        VALUES ($1, $2, $3, $4, CAST($5 AS JSON))
        ON CONFLICT (dataset, collection, source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(dataset)
    .bind(source.collection())
    .bind(source_key)
    .bind(body)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool, dataset: &str) -> anyhow::Result<usize> {
    let snapshot = seed_snapshot();
    let mut inserted = 0usize;

    for source in Source::ALL {
        for (idx, doc) in snapshot.records(source).iter().enumerate() {
            let source_key = format!("seed:{:03}", idx + 1);
            if insert_document(pool, dataset, source, &source_key, doc).await? {
                inserted += 1;
            }
        }
    }

    Ok(inserted)
}

/// Pairs each row with its `source_key`: the row's own `source_key` column
/// when set, otherwise a SHA-256 of the row content. Identical rows in one
/// file get an occurrence suffix so none of them is lost.
pub fn keyed_rows(records: Vec<RawRecord>) -> serde_json::Result<Vec<(String, RawRecord)>> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut keyed = Vec::with_capacity(records.len());

    for mut doc in records {
        let source_key = match doc.remove("source_key") {
            Some(Value::String(key)) if !key.is_empty() => key,
            Some(Value::Number(key)) => key.to_string(),
            _ => {
                let digest = Sha256::digest(serde_json::to_string(&doc)?.as_bytes());
                let hash = format!("import:{:x}", digest);
                let seen = occurrences.entry(hash.clone()).or_insert(0);
                *seen += 1;
                if *seen == 1 {
                    hash
                } else {
                    format!("{hash}:{seen}")
                }
            }
        };
        keyed.push((source_key, doc));
    }

    Ok(keyed)
}

/// Loads a CSV file into one collection. Re-importing the same rows
/// inserts nothing new.
pub async fn import_csv(
    pool: &PgPool,
    dataset: &str,
    source: Source,
    csv_path: &Path,
) -> anyhow::Result<usize> {
    let reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let records = csv_records(reader)?;

    let mut inserted = 0usize;
    for (source_key, doc) in keyed_rows(records)? {
        if insert_document(pool, dataset, source, &source_key, &doc).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn fetch_collection(
    pool: &PgPool,
    dataset: &str,
    source: Source,
) -> Result<Vec<RawRecord>, String> {
    let rows = sqlx::query(
        r#"
        SELECT body::text AS body
        FROM early_warning.source_documents
        WHERE dataset = $1 AND collection = $2
        ORDER BY seq
        "#,
    )
    .bind(dataset)
    .bind(source.collection())
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let body: String = row.try_get("body").map_err(|e| e.to_string())?;
        let doc: RawRecord = serde_json::from_str(&body).map_err(|e| e.to_string())?;
        records.push(doc);
    }
    Ok(records)
}

pub async fn fetch_snapshot(pool: &PgPool, dataset: &str) -> PipelineResult<SourceSnapshot> {
    let mut snapshot = SourceSnapshot::default();
    for source in Source::ALL {
        let records = fetch_collection(pool, dataset, source)
            .await
            .map_err(|message| PipelineError::Retrieval {
                source_name: source.collection().to_string(),
                message,
            })?;
        snapshot.set(source, records);
    }
    Ok(snapshot)
}

fn document(value: Value) -> Option<RawRecord> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn documents(values: Vec<Value>) -> Vec<RawRecord> {
    values.into_iter().filter_map(document).collect()
}

pub fn seed_snapshot() -> SourceSnapshot {
    let students = [
        ("71234501", "QUISPE MAMANI, Ana Lucía", "A", "F"),
        ("71234502", "HUAMAN ROJAS, Luis Alberto", "A", "M"),
        ("71234503", "CONDORI TICONA, María Elena", "A", "F"),
        ("71234504", "FLORES PAREDES, José Carlos", "B", "M"),
        ("71234505", "MENDOZA CHÁVEZ, Rosa Isabel", "B", "F"),
    ];
    // 1 present, 0 absent, 2 absent with justification
    let attendance_days: [[u8; 10]; 5] = [
        [1, 1, 1, 1, 1, 1, 1, 1, 0, 1],
        [1, 0, 0, 1, 2, 0, 1, 0, 1, 1],
        [1, 1, 1, 1, 1, 1, 1, 1, 1, 1],
        [1, 1, 0, 1, 1, 1, 1, 2, 1, 1],
        [0, 0, 1, 0, 1, 2, 0, 1, 1, 1],
    ];
    let grades = [
        ["A", "AD", "A"],
        ["B", "C", "C"],
        ["AD", "AD", "AD"],
        ["B", "B", "A"],
        ["A", "B", "C"],
    ];

    let mut snapshot = SourceSnapshot::default();

    snapshot.attendance = students
        .iter()
        .zip(attendance_days.iter())
        .filter_map(|((dni, name, section, _), days)| {
            let mut doc = document(json!({
                "DNI": dni,
                "Apellidos_Nombres": name,
                "SECCIÓN": section,
                "GRADO": "3",
            }))?;
            for (day, code) in days.iter().enumerate() {
                doc.insert(format!("{:02}/03", day + 3), json!(code));
            }
            Some(doc)
        })
        .collect();

    snapshot.roster = documents(vec![
        json!({"DNI": students[0].0, "APELLIDOS_Y_NOMBRES": students[0].1, "sexo": "F",
               "padre_vive": "SI", "madre_vive": "SI", "trabaja_estudiante": "NO",
               "tipo_discapacidad": null, "situacion_matricula": "P"}),
        json!({"DNI": students[1].0, "APELLIDOS_Y_NOMBRES": students[1].1, "sexo": "M",
               "padre_vive": "NO", "madre_vive": "SI", "trabaja_estudiante": "SI",
               "tipo_discapacidad": null, "situacion_matricula": "PG"}),
        json!({"DNI": students[2].0, "APELLIDOS_Y_NOMBRES": students[2].1, "sexo": "F",
               "padre_vive": "SI", "madre_vive": "SI", "trabaja_estudiante": "NO",
               "tipo_discapacidad": "", "situacion_matricula": "P"}),
        json!({"DNI": students[3].0, "APELLIDOS_Y_NOMBRES": students[3].1, "sexo": "M",
               "padre_vive": "SI", "madre_vive": "NO", "trabaja_estudiante": "NO",
               "tipo_discapacidad": "Visual", "situacion_matricula": "P"}),
        json!({"DNI": students[4].0, "APELLIDOS_Y_NOMBRES": students[4].1, "sexo": "F",
               "padre_vive": "SI", "madre_vive": "SI", "trabaja_estudiante": "SI",
               "tipo_discapacidad": null, "situacion_matricula": "R"}),
    ]);

    for (period, bimester) in snapshot.bimesters.iter_mut().enumerate() {
        *bimester = students
            .iter()
            .zip(grades.iter())
            .filter_map(|((dni, name, _, _), symbols)| {
                document(json!({
                    "DNI": dni,
                    "ALUMNOS/AS": name,
                    "PROMEDIO_APRENDIZAJE_AUTONOMO": symbols[period],
                }))
            })
            .collect();
    }

    snapshot.incidents = documents(vec![
        json!({"Nombre y Apellido": students[1].1, "Tipo de Falta": "Leve",
               "Descripción": "Llegó tarde a clase"}),
        json!({"Nombre y Apellido": students[1].1, "Tipo de Falta": "Grave",
               "Descripción": "Pelea en el recreo"}),
        json!({"Nombre y Apellido": students[3].1, "Tipo de Falta": "Leve",
               "Descripción": "Uso de celular en clase"}),
    ]);

    snapshot.survey = documents(vec![
        json!({"DNI": students[0].0, "sugerencia_sentimientos": "Me gusta el colegio, los profesores me ayudan"}),
        json!({"DNI": students[1].0, "sugerencia_sentimientos": "Me siento triste y con miedo en el recreo"}),
        json!({"DNI": students[2].0, "sugerencia_sentimientos": "Nada"}),
        json!({"DNI": students[4].0, "sugerencia_sentimientos": "Las clases son aburridas y estoy cansada"}),
    ]);

    snapshot
}
