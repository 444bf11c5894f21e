// ✅ Data Quality Engine - checks on the raw source tables
//
// Runs before reconciliation and never blocks it: the report says what the
// joins are about to drop, ignore or reject.

use crate::loader::{SourceKind, SourceTables};
use crate::model::{IndicatorRecord, PopulationRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

// ============================================================================
// ISSUES & REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical, // The pipeline will fail or produce wrong numbers
    Warning,  // Rows will be ignored
    Info,     // Expected loss, e.g. aggregate rows
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub source: SourceKind,
    pub rule: String,
    pub message: String,
    /// Number of rows (or keys) affected
    pub count: usize,
    /// A few offending names, for display
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub issues: Vec<QualityIssue>,
    pub rows_checked: usize,
}

impl QualityReport {
    pub fn has_critical_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows checked: {} critical, {} warnings, {} info",
            self.rows_checked,
            self.count(Severity::Critical),
            self.count(Severity::Warning),
            self.count(Severity::Info)
        )
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct DataQualityEngine {
    /// How many example names to keep per issue
    pub max_examples: usize,
}

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine { max_examples: 5 }
    }

    pub fn check(&self, tables: &SourceTables) -> QualityReport {
        let mut issues = Vec::new();

        self.check_continent_keys(tables, &mut issues);

        let known: HashSet<&str> = tables
            .country_continent
            .iter()
            .map(|c| c.country.as_str())
            .collect();

        for (kind, records) in [
            (SourceKind::DeathRate, &tables.death_rate),
            (SourceKind::BirthRate, &tables.birth_rate),
        ] {
            self.check_indicator(kind, records, &known, &mut issues);
        }

        for (kind, records) in [
            (SourceKind::PopulationFemale, &tables.population_female),
            (SourceKind::PopulationMale, &tables.population_male),
        ] {
            self.check_population(kind, records, &known, &mut issues);
        }

        issues.sort_by_key(|i| i.severity);

        let rows_checked = SourceKind::all()
            .iter()
            .map(|kind| tables.row_count(*kind))
            .sum();

        QualityReport {
            issues,
            rows_checked,
        }
    }

    // ========================================================================
    // RULES
    // ========================================================================

    fn check_continent_keys(&self, tables: &SourceTables, issues: &mut Vec<QualityIssue>) {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for entry in &tables.country_continent {
            *seen.entry(entry.country.as_str()).or_insert(0) += 1;
        }
        let duplicated: BTreeSet<&str> = seen
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(name, _)| name)
            .collect();

        if !duplicated.is_empty() {
            issues.push(self.issue(
                Severity::Critical,
                SourceKind::CountryContinent,
                "country_unique",
                "country listed more than once; reconciliation will refuse to run",
                duplicated.len(),
                duplicated,
            ));
        }

        let blank = tables
            .country_continent
            .iter()
            .filter(|c| c.continent.trim().is_empty())
            .map(|c| c.country.as_str())
            .collect::<BTreeSet<_>>();
        if !blank.is_empty() {
            issues.push(self.issue(
                Severity::Warning,
                SourceKind::CountryContinent,
                "continent_not_empty",
                "country has an empty continent",
                blank.len(),
                blank,
            ));
        }
    }

    fn check_indicator(
        &self,
        kind: SourceKind,
        records: &[IndicatorRecord],
        known: &HashSet<&str>,
        issues: &mut Vec<QualityIssue>,
    ) {
        let duplicates = duplicate_keys(records.iter().map(|r| (r.country.as_str(), r.year)));
        if !duplicates.is_empty() {
            issues.push(self.issue(
                Severity::Warning,
                kind,
                "country_year_unique",
                "repeated (country, year); only the first value is used",
                duplicates.len(),
                duplicates,
            ));
        }

        let invalid: BTreeSet<&str> = records
            .iter()
            .filter(|r| !r.value.is_finite() || r.value < 0.0)
            .map(|r| r.country.as_str())
            .collect();
        if !invalid.is_empty() {
            issues.push(self.issue(
                Severity::Critical,
                kind,
                "rate_non_negative",
                "rate is negative or not a finite number",
                invalid.len(),
                invalid,
            ));
        }

        let unknown = unknown_names(records.iter().map(|r| r.country.as_str()), known);
        if !unknown.is_empty() {
            issues.push(self.issue(
                Severity::Info,
                kind,
                "country_known",
                "indicator rows for names outside the continent table are never joined",
                unknown.len(),
                unknown,
            ));
        }
    }

    fn check_population(
        &self,
        kind: SourceKind,
        records: &[PopulationRecord],
        known: &HashSet<&str>,
        issues: &mut Vec<QualityIssue>,
    ) {
        let duplicates = duplicate_keys(records.iter().map(|r| (r.country.as_str(), r.year)));
        if !duplicates.is_empty() {
            issues.push(self.issue(
                Severity::Warning,
                kind,
                "country_year_unique",
                "repeated (country, year); values will be summed in aggregates",
                duplicates.len(),
                duplicates,
            ));
        }

        let invalid: BTreeSet<&str> = records
            .iter()
            .filter(|r| !r.value.is_finite() || r.value < 0.0)
            .map(|r| r.country.as_str())
            .collect();
        if !invalid.is_empty() {
            issues.push(self.issue(
                Severity::Critical,
                kind,
                "population_non_negative",
                "population is negative or not a finite number",
                invalid.len(),
                invalid,
            ));
        }

        let unknown = unknown_names(records.iter().map(|r| r.country.as_str()), known);
        if !unknown.is_empty() {
            issues.push(self.issue(
                Severity::Info,
                kind,
                "country_known",
                "names outside the continent table (aggregates such as World) will be dropped",
                unknown.len(),
                unknown,
            ));
        }
    }

    fn issue<'a>(
        &self,
        severity: Severity,
        source: SourceKind,
        rule: &str,
        message: &str,
        count: usize,
        names: impl IntoIterator<Item = &'a str>,
    ) -> QualityIssue {
        QualityIssue {
            severity,
            source,
            rule: rule.to_string(),
            message: message.to_string(),
            count,
            examples: names
                .into_iter()
                .take(self.max_examples)
                .map(str::to_string)
                .collect(),
        }
    }
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Country names that appear under a repeated (country, year) key.
fn duplicate_keys<'a>(keys: impl Iterator<Item = (&'a str, i32)>) -> BTreeSet<&'a str> {
    let mut seen = HashSet::new();
    let mut duplicated = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            duplicated.insert(key.0);
        }
    }
    duplicated
}

fn unknown_names<'a>(names: impl Iterator<Item = &'a str>, known: &HashSet<&str>) -> BTreeSet<&'a str> {
    names.filter(|name| !known.contains(name)).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CountryContinent;

    fn clean_tables() -> SourceTables {
        SourceTables {
            country_continent: vec![
                CountryContinent {
                    country: "Poland".to_string(),
                    continent: "Europe".to_string(),
                },
                CountryContinent {
                    country: "Kenya".to_string(),
                    continent: "Africa".to_string(),
                },
            ],
            death_rate: vec![IndicatorRecord {
                country: "Poland".to_string(),
                year: 2000,
                value: 9.6,
            }],
            birth_rate: vec![IndicatorRecord {
                country: "Kenya".to_string(),
                year: 2000,
                value: 38.0,
            }],
            population_female: vec![PopulationRecord {
                country: "Poland".to_string(),
                year: 2000,
                value: 19_800_000.0,
            }],
            population_male: vec![PopulationRecord {
                country: "Poland".to_string(),
                year: 2000,
                value: 18_600_000.0,
            }],
        }
    }

    #[test]
    fn test_clean_tables_have_no_issues() {
        let report = DataQualityEngine::new().check(&clean_tables());

        println!("Report: {}", report.summary());

        assert!(report.issues.is_empty());
        assert_eq!(report.rows_checked, 6);
        assert!(!report.has_critical_issues());
    }

    #[test]
    fn test_duplicate_continent_entry_is_critical() {
        let mut tables = clean_tables();
        tables.country_continent.push(CountryContinent {
            country: "Poland".to_string(),
            continent: "Asia".to_string(),
        });

        let report = DataQualityEngine::new().check(&tables);

        assert!(report.has_critical_issues());
        let issue = &report.issues[0];
        assert_eq!(issue.rule, "country_unique");
        assert_eq!(issue.examples, vec!["Poland".to_string()]);
    }

    #[test]
    fn test_aggregates_reported_as_info() {
        let mut tables = clean_tables();
        tables.population_female.push(PopulationRecord {
            country: "World".to_string(),
            year: 2000,
            value: 3.0e9,
        });

        let report = DataQualityEngine::new().check(&tables);

        assert_eq!(report.count(Severity::Info), 1);
        let issue = report
            .issues
            .iter()
            .find(|i| i.source == SourceKind::PopulationFemale)
            .unwrap();
        assert_eq!(issue.rule, "country_known");
        assert_eq!(issue.examples, vec!["World".to_string()]);
    }

    #[test]
    fn test_duplicate_indicator_key_and_negative_rate() {
        let mut tables = clean_tables();
        tables.death_rate.push(IndicatorRecord {
            country: "Poland".to_string(),
            year: 2000,
            value: -1.0,
        });

        let report = DataQualityEngine::new().check(&tables);

        assert_eq!(report.count(Severity::Critical), 1);
        assert_eq!(report.count(Severity::Warning), 1);
        // Critical issues sort first
        assert_eq!(report.issues[0].severity, Severity::Critical);
        assert!(report
            .issues
            .iter()
            .any(|i| i.rule == "country_year_unique" && i.source == SourceKind::DeathRate));
    }

    #[test]
    fn test_examples_are_capped() {
        let mut tables = clean_tables();
        for i in 0..10 {
            tables.birth_rate.push(IndicatorRecord {
                country: format!("Region {}", i),
                year: 2000,
                value: 10.0,
            });
        }

        let engine = DataQualityEngine { max_examples: 3 };
        let report = engine.check(&tables);
        let issue = report.issues.iter().find(|i| i.rule == "country_known").unwrap();

        assert_eq!(issue.count, 10);
        assert_eq!(issue.examples.len(), 3);
    }
}
