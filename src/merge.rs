use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::models::{
    AttendanceEntry, BimesterEntry, IncidentEntry, RosterEntry, StudentRecord, SurveyEntry,
};

#[derive(Debug, Clone, Default)]
pub struct SourceFragments {
    pub attendance: Vec<AttendanceEntry>,
    pub roster: Vec<RosterEntry>,
    pub bimesters: [Vec<BimesterEntry>; 3],
    pub incidents: Vec<IncidentEntry>,
    pub survey: Vec<SurveyEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub students: Vec<StudentRecord>,
    /// Students that got the default sentiment flag.
    pub without_survey: usize,
    /// Incident groups whose name matched no known student.
    pub unmatched_incidents: usize,
}

struct StudentTable<'a> {
    config: &'a ModelConfig,
    rows: Vec<StudentRecord>,
    index: HashMap<String, usize>,
}

impl<'a> StudentTable<'a> {
    fn new(config: &'a ModelConfig) -> Self {
        Self {
            config,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn get_or_insert(&mut self, id: &str, name: &str) -> &mut StudentRecord {
        let slot = match self.index.get(id) {
            Some(&slot) => slot,
            None => {
                let mut record = StudentRecord::new(id, self.config.missing_grade);
                record.name = name.to_string();
                self.rows.push(record);
                self.index.insert(id.to_string(), self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        &mut self.rows[slot]
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut StudentRecord> {
        let slot = *self.index.get(id)?;
        self.rows.get_mut(slot)
    }

    /// Name -> identifier; later students win on duplicate names.
    fn name_index(&self) -> HashMap<String, String> {
        self.rows
            .iter()
            .map(|row| (row.name.clone(), row.id.clone()))
            .collect()
    }
}

fn overlay(target: &mut String, value: &str) {
    if !value.is_empty() {
        *target = value.to_string();
    }
}

/// Seeds from the roster, then overlays attendance, the three bimesters,
/// incidents (matched by name) and survey sentiment. Missing sources keep
/// the defaults: grades at `missing_grade`, every flag at no-risk.
pub fn merge_sources(fragments: &SourceFragments, config: &ModelConfig) -> MergeOutcome {
    let mut table = StudentTable::new(config);

    for entry in &fragments.roster {
        let record = table.get_or_insert(&entry.id, &entry.name);
        *record = StudentRecord::new(entry.id.clone(), config.missing_grade);
        record.name = entry.name.clone();
        record.gender = entry.gender.clone();
        record.flags.family = entry.flag;
    }

    for entry in &fragments.attendance {
        let record = table.get_or_insert(&entry.id, &entry.name);
        overlay(&mut record.name, &entry.name);
        overlay(&mut record.section, &entry.section);
        overlay(&mut record.grade_level, &entry.grade_level);
        record.flags.attendance = entry.flag;
    }

    for (idx, entries) in fragments.bimesters.iter().enumerate() {
        for entry in entries {
            let record = table.get_or_insert(&entry.id, &entry.name);
            overlay(&mut record.name, &entry.name);
            record.grades[idx] = entry.grade;
        }
    }

    let names = table.name_index();
    let mut unmatched_incidents = 0;
    for entry in &fragments.incidents {
        match names.get(&entry.name).and_then(|id| table.get_mut(id)) {
            Some(record) => record.flags.incidents = entry.flag,
            None => unmatched_incidents += 1,
        }
    }

    let mut surveyed: HashSet<&str> = HashSet::new();
    for entry in &fragments.survey {
        if let Some(record) = table.get_mut(&entry.id) {
            record.flags.sentiment = entry.flag;
            surveyed.insert(entry.id.as_str());
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let students: Vec<StudentRecord> = table
        .rows
        .into_iter()
        .filter(|row| !row.id.trim().is_empty())
        .filter(|row| seen.insert(row.id.clone()))
        .collect();
    let without_survey = students.len().saturating_sub(surveyed.len());

    if unmatched_incidents > 0 {
        warn!(
            "{} incident groups did not match any student name and were dropped",
            unmatched_incidents
        );
    }
    if without_survey > 0 {
        warn!(
            "{} students without survey data (defaulted to no risk)",
            without_survey
        );
    }
    info!("integrated table: {} unique students", students.len());

    MergeOutcome {
        students,
        without_survey,
        unmatched_incidents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskFlag;

    fn roster(id: &str, name: &str, flag: RiskFlag) -> RosterEntry {
        RosterEntry {
            id: id.to_string(),
            name: name.to_string(),
            gender: "F".to_string(),
            score: 0,
            flag,
        }
    }

    fn bimester(id: &str, grade: f64) -> BimesterEntry {
        BimesterEntry {
            id: id.to_string(),
            name: String::new(),
            grade,
        }
    }

    fn fragments() -> SourceFragments {
        SourceFragments {
            roster: vec![
                roster("1", "ROJAS Ana", RiskFlag::NoRisk),
                roster("2", "LUNA Leo", RiskFlag::AtRisk),
            ],
            attendance: vec![AttendanceEntry {
                id: "3".to_string(),
                name: "PAZ Eva".to_string(),
                section: "B".to_string(),
                grade_level: "2".to_string(),
                presences: 1,
                absences: 9,
                flag: RiskFlag::AtRisk,
            }],
            bimesters: [
                vec![bimester("1", 16.0), bimester("2", 13.0)],
                vec![bimester("1", 19.0)],
                vec![bimester("1", 16.0), bimester("4", 13.0)],
            ],
            incidents: vec![
                IncidentEntry {
                    name: "LUNA Leo".to_string(),
                    flag: RiskFlag::AtRisk,
                },
                IncidentEntry {
                    name: "Desconocido".to_string(),
                    flag: RiskFlag::AtRisk,
                },
            ],
            survey: vec![
                SurveyEntry {
                    id: "1".to_string(),
                    flag: RiskFlag::AtRisk,
                },
                SurveyEntry {
                    id: "99".to_string(),
                    flag: RiskFlag::AtRisk,
                },
            ],
        }
    }

    #[test]
    fn merges_every_source_with_defaults() {
        let config = ModelConfig::default();
        let outcome = merge_sources(&fragments(), &config);
        let ids: Vec<&str> = outcome.students.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);

        let ana = &outcome.students[0];
        assert_eq!(ana.grades, [16.0, 19.0, 16.0]);
        assert_eq!(ana.flags.sentiment, RiskFlag::AtRisk);
        assert_eq!(ana.name, "ROJAS Ana");
        assert_eq!(ana.gender, "F");

        let leo = &outcome.students[1];
        assert_eq!(leo.grades, [13.0, 5.0, 5.0]);
        assert_eq!(leo.flags.family, RiskFlag::AtRisk);
        assert_eq!(leo.flags.incidents, RiskFlag::AtRisk);
        assert_eq!(leo.flags.attendance, RiskFlag::NoRisk);

        let eva = &outcome.students[2];
        assert_eq!(eva.section, "B");
        assert_eq!(eva.flags.attendance, RiskFlag::AtRisk);
        assert_eq!(eva.flags.family, RiskFlag::NoRisk);

        assert_eq!(outcome.unmatched_incidents, 1);
        assert_eq!(outcome.without_survey, 3);
    }

    #[test]
    fn empty_names_do_not_clobber_known_names() {
        let config = ModelConfig::default();
        let outcome = merge_sources(&fragments(), &config);
        let unnamed = &outcome.students[3];
        assert_eq!(unnamed.name, "");
        assert_eq!(unnamed.grades, [5.0, 5.0, 13.0]);
    }

    #[test]
    fn merging_is_repeatable() {
        let config = ModelConfig::default();
        let input = fragments();
        let first = merge_sources(&input, &config);
        let second = merge_sources(&input, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn incidents_for_unknown_names_are_dropped() {
        let config = ModelConfig::default();
        let input = SourceFragments {
            incidents: vec![IncidentEntry {
                name: "Nadie".to_string(),
                flag: RiskFlag::AtRisk,
            }],
            ..Default::default()
        };
        let outcome = merge_sources(&input, &config);
        assert!(outcome.students.is_empty());
        assert_eq!(outcome.unmatched_incidents, 1);
    }
}
