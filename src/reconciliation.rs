// ⚖️ Reconciliation Engine - one denormalized table keyed by (Country, Year, Gender)
//
// Order of operations:
//   1. restrict population sheets to countries in the continent table
//   2. tag rows with Gender (and optionally derive Total = Female + Male)
//   3. union Female + Male (+ Total)
//   4. inner-join Continent
//   5. left-join Birth Rate / Death Rate by (Country, Year)
//   6. derive Continent_Gender
//
// Aggregate pseudo-countries ("World", income groups) disappear in step 1.
// That loss is counted and logged, never silent.

use crate::error::{PipelineError, Result};
use crate::model::{
    continent_gender, CountryContinent, Gender, IndicatorRecord, PopulationRecord, ReconciledRow,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

// ============================================================================
// OPTIONS & REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOptions {
    /// Also emit Gender::Total rows (Female + Male per country-year)
    pub include_total: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub population_rows_in: usize,
    pub dropped_unknown_country_rows: usize,
    pub dropped_countries: Vec<String>,
    pub total_rows_derived: usize,
    pub rows_without_birth_rate: usize,
    pub rows_without_death_rate: usize,
    pub duplicate_birth_rate_keys: usize,
    pub duplicate_death_rate_keys: usize,
    pub reconciled_rows: usize,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} rows from {} population rows ({} dropped across {} unknown names, {} totals derived); missing birth rate: {}, missing death rate: {}",
            self.reconciled_rows,
            self.population_rows_in,
            self.dropped_unknown_country_rows,
            self.dropped_countries.len(),
            self.total_rows_derived,
            self.rows_without_birth_rate,
            self.rows_without_death_rate
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub rows: Vec<ReconciledRow>,
    pub report: ReconciliationReport,
}

// ============================================================================
// JOIN INDEXES
// ============================================================================

/// Country -> continent. Any repeated country name is ambiguous and fatal.
pub fn continent_index(country_continent: &[CountryContinent]) -> Result<HashMap<&str, &str>> {
    let mut index: HashMap<&str, &str> = HashMap::with_capacity(country_continent.len());

    for entry in country_continent {
        if let Some(existing) = index.insert(entry.country.as_str(), entry.continent.as_str()) {
            return Err(PipelineError::JoinKeyCollision {
                country: entry.country.clone(),
                continents: vec![existing.to_string(), entry.continent.clone()],
            });
        }
    }

    Ok(index)
}

/// (Country, Year) -> value, first occurrence wins. Returns the index and
/// the number of duplicate keys ignored.
fn indicator_index(records: &[IndicatorRecord]) -> (HashMap<(&str, i32), f64>, usize) {
    let mut index = HashMap::with_capacity(records.len());
    let mut duplicates = 0;

    for record in records {
        let key = (record.country.as_str(), record.year);
        if index.contains_key(&key) {
            duplicates += 1;
        } else {
            index.insert(key, record.value);
        }
    }

    (index, duplicates)
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler {
    pub options: ReconciliationOptions,
}

impl Reconciler {
    pub fn new() -> Self {
        Reconciler {
            options: ReconciliationOptions::default(),
        }
    }

    pub fn with_options(options: ReconciliationOptions) -> Self {
        Reconciler { options }
    }

    pub fn reconcile(
        &self,
        country_continent: &[CountryContinent],
        death_rate: &[IndicatorRecord],
        birth_rate: &[IndicatorRecord],
        population_female: &[PopulationRecord],
        population_male: &[PopulationRecord],
    ) -> Result<Reconciliation> {
        let continents = continent_index(country_continent)?;
        let population_rows_in = population_female.len() + population_male.len();

        // Step 1: known countries only
        let mut dropped_countries = BTreeSet::new();
        let mut restrict = |records: &[PopulationRecord]| -> Vec<PopulationRecord> {
            records
                .iter()
                .filter(|r| {
                    let known = continents.contains_key(r.country.as_str());
                    if !known {
                        dropped_countries.insert(r.country.clone());
                    }
                    known
                })
                .cloned()
                .collect()
        };
        let female = restrict(population_female);
        let male = restrict(population_male);

        let kept = female.len() + male.len();
        let dropped_unknown_country_rows = population_rows_in - kept;

        if dropped_unknown_country_rows > 0 {
            warn!(
                dropped_rows = dropped_unknown_country_rows,
                dropped_names = dropped_countries.len(),
                "population rows without a continent entry were dropped"
            );
            debug!(names = ?dropped_countries, "dropped population names");
        }

        if kept == 0 {
            return Err(PipelineError::EmptyResult {
                stage: "restricting population to known countries".to_string(),
            });
        }

        // Steps 2-3: tag and union
        let mut population: Vec<(PopulationRecord, Gender)> = Vec::with_capacity(kept);
        population.extend(female.iter().cloned().map(|r| (r, Gender::Female)));
        population.extend(male.iter().cloned().map(|r| (r, Gender::Male)));

        let totals = if self.options.include_total {
            derive_totals(&female, &male)
        } else {
            Vec::new()
        };
        let total_rows_derived = totals.len();
        population.extend(totals.into_iter().map(|r| (r, Gender::Total)));

        // Steps 4-6: continent, indicators, display key
        let (births, duplicate_birth_rate_keys) = indicator_index(birth_rate);
        let (deaths, duplicate_death_rate_keys) = indicator_index(death_rate);

        if duplicate_birth_rate_keys + duplicate_death_rate_keys > 0 {
            warn!(
                birth = duplicate_birth_rate_keys,
                death = duplicate_death_rate_keys,
                "duplicate indicator rows ignored (first occurrence kept)"
            );
        }

        let mut rows = Vec::with_capacity(population.len());
        let mut rows_without_birth_rate = 0;
        let mut rows_without_death_rate = 0;

        for (record, gender) in population {
            let continent = match continents.get(record.country.as_str()) {
                Some(c) => c.to_string(),
                None => continue,
            };

            let key = (record.country.as_str(), record.year);
            let birth = births.get(&key).copied();
            let death = deaths.get(&key).copied();
            if birth.is_none() {
                rows_without_birth_rate += 1;
            }
            if death.is_none() {
                rows_without_death_rate += 1;
            }

            rows.push(ReconciledRow {
                continent_gender: continent_gender(&continent, gender),
                country: record.country,
                year: record.year,
                gender,
                continent,
                value: record.value,
                birth_rate: birth,
                death_rate: death,
            });
        }

        let report = ReconciliationReport {
            population_rows_in,
            dropped_unknown_country_rows,
            dropped_countries: dropped_countries.into_iter().collect(),
            total_rows_derived,
            rows_without_birth_rate,
            rows_without_death_rate,
            duplicate_birth_rate_keys,
            duplicate_death_rate_keys,
            reconciled_rows: rows.len(),
            reconciled_at: Utc::now(),
        };

        info!("{}", report.summary());

        Ok(Reconciliation { rows, report })
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Female + Male per (Country, Year), only where both sexes are present.
/// Output follows the order in which keys first appear in the female table.
fn derive_totals(female: &[PopulationRecord], male: &[PopulationRecord]) -> Vec<PopulationRecord> {
    let mut male_sums: HashMap<(&str, i32), f64> = HashMap::new();
    for r in male {
        *male_sums.entry((r.country.as_str(), r.year)).or_insert(0.0) += r.value;
    }

    let mut order: Vec<(&str, i32)> = Vec::new();
    let mut female_sums: HashMap<(&str, i32), f64> = HashMap::new();
    for r in female {
        let key = (r.country.as_str(), r.year);
        let sum = female_sums.entry(key).or_insert_with(|| {
            order.push(key);
            0.0
        });
        *sum += r.value;
    }

    order
        .into_iter()
        .filter_map(|key| {
            let m = male_sums.get(&key)?;
            let f = female_sums.get(&key)?;
            Some(PopulationRecord {
                country: key.0.to_string(),
                year: key.1,
                value: f + m,
            })
        })
        .collect()
}

/// Reconcile with default options, rows only.
pub fn reconcile(
    country_continent: &[CountryContinent],
    death_rate: &[IndicatorRecord],
    birth_rate: &[IndicatorRecord],
    population_female: &[PopulationRecord],
    population_male: &[PopulationRecord],
) -> Result<Vec<ReconciledRow>> {
    Reconciler::new()
        .reconcile(
            country_continent,
            death_rate,
            birth_rate,
            population_female,
            population_male,
        )
        .map(|r| r.rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(country: &str, continent: &str) -> CountryContinent {
        CountryContinent {
            country: country.to_string(),
            continent: continent.to_string(),
        }
    }

    fn pop(country: &str, year: i32, value: f64) -> PopulationRecord {
        PopulationRecord {
            country: country.to_string(),
            year,
            value,
        }
    }

    fn ind(country: &str, year: i32, value: f64) -> IndicatorRecord {
        IndicatorRecord {
            country: country.to_string(),
            year,
            value,
        }
    }

    #[test]
    fn test_two_country_scenario() {
        let countries = vec![cc("A", "X"), cc("B", "Y")];
        let female = vec![pop("A", 2000, 10.0)];
        let male = vec![pop("A", 2000, 5.0)];
        let birth = vec![ind("A", 2000, 0.02)];
        let death: Vec<IndicatorRecord> = vec![];

        let rows = reconcile(&countries, &death, &birth, &female, &male).unwrap();

        assert_eq!(
            rows,
            vec![
                ReconciledRow {
                    country: "A".to_string(),
                    year: 2000,
                    gender: Gender::Female,
                    continent: "X".to_string(),
                    continent_gender: "X-Female".to_string(),
                    value: 10.0,
                    birth_rate: Some(0.02),
                    death_rate: None,
                },
                ReconciledRow {
                    country: "A".to_string(),
                    year: 2000,
                    gender: Gender::Male,
                    continent: "X".to_string(),
                    continent_gender: "X-Male".to_string(),
                    value: 5.0,
                    birth_rate: Some(0.02),
                    death_rate: None,
                },
            ]
        );
    }

    #[test]
    fn test_world_aggregate_is_dropped_and_reported() {
        let countries = vec![cc("Poland", "Europe")];
        let female = vec![pop("Poland", 2000, 19.8), pop("World", 2000, 3000.0)];
        let male = vec![pop("Poland", 2000, 18.6), pop("World", 2000, 3050.0)];

        let result = Reconciler::new()
            .reconcile(&countries, &[], &[], &female, &male)
            .unwrap();

        assert!(result.rows.iter().all(|r| r.country != "World"));
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.report.dropped_unknown_country_rows, 2);
        assert_eq!(result.report.dropped_countries, vec!["World".to_string()]);

        println!("✅ {}", result.report.summary());
    }

    #[test]
    fn test_every_continent_comes_from_reference_table() {
        let countries = vec![cc("Kenya", "Africa"), cc("Chile", "South America")];
        let female = vec![pop("Kenya", 2001, 1.0), pop("Chile", 2001, 2.0), pop("Atlantis", 2001, 3.0)];
        let male = vec![pop("Chile", 2001, 2.5)];

        let rows = reconcile(&countries, &[], &[], &female, &male).unwrap();
        let known: Vec<&str> = countries.iter().map(|c| c.continent.as_str()).collect();

        assert!(rows.iter().all(|r| known.contains(&r.continent.as_str())));
        assert!(rows
            .iter()
            .all(|r| r.continent_gender == format!("{}-{}", r.continent, r.gender)));
    }

    #[test]
    fn test_missing_indicators_stay_none_not_zero() {
        let countries = vec![cc("A", "X")];
        let female = vec![pop("A", 1999, 1.0), pop("A", 2000, 1.0)];
        let birth = vec![ind("A", 2000, 0.0)];
        let death = vec![ind("A", 1999, 0.01)];

        let result = Reconciler::new()
            .reconcile(&countries, &death, &birth, &female, &[])
            .unwrap();
        let rows = &result.rows;

        assert_eq!(rows[0].birth_rate, None);
        assert_eq!(rows[0].death_rate, Some(0.01));
        // A measured zero is kept as zero
        assert_eq!(rows[1].birth_rate, Some(0.0));
        assert_eq!(rows[1].death_rate, None);
        assert_eq!(result.report.rows_without_birth_rate, 1);
        assert_eq!(result.report.rows_without_death_rate, 1);
    }

    #[test]
    fn test_duplicate_country_is_join_key_collision() {
        let countries = vec![cc("Turkey", "Europe"), cc("Turkey", "Asia")];
        let female = vec![pop("Turkey", 2000, 1.0)];

        let err = reconcile(&countries, &[], &[], &female, &[]).unwrap_err();
        match err {
            PipelineError::JoinKeyCollision { country, continents } => {
                assert_eq!(country, "Turkey");
                assert_eq!(continents, vec!["Europe".to_string(), "Asia".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_total_name_mismatch_is_empty_result() {
        let countries = vec![cc("Poland", "Europe")];
        let female = vec![pop("POL", 2000, 1.0)];
        let male = vec![pop("POL", 2000, 1.0)];

        let err = reconcile(&countries, &[], &[], &female, &male).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyResult { .. }));
    }

    #[test]
    fn test_total_rows_derived_when_both_sexes_present() {
        let countries = vec![cc("A", "X")];
        let female = vec![pop("A", 2000, 10.0), pop("A", 2001, 11.0)];
        let male = vec![pop("A", 2000, 5.0)];
        let birth = vec![ind("A", 2000, 0.02)];

        let reconciler = Reconciler::with_options(ReconciliationOptions { include_total: true });
        let result = reconciler
            .reconcile(&countries, &[], &birth, &female, &male)
            .unwrap();

        let totals: Vec<&ReconciledRow> = result
            .rows
            .iter()
            .filter(|r| r.gender == Gender::Total)
            .collect();

        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].year, 2000);
        assert_eq!(totals[0].value, 15.0);
        assert_eq!(totals[0].continent_gender, "X-Total");
        assert_eq!(totals[0].birth_rate, Some(0.02));
        assert_eq!(result.report.total_rows_derived, 1);
    }

    #[test]
    fn test_duplicate_indicator_rows_do_not_fan_out() {
        let countries = vec![cc("A", "X")];
        let female = vec![pop("A", 2000, 10.0)];
        let birth = vec![ind("A", 2000, 0.02), ind("A", 2000, 0.03)];

        let result = Reconciler::new()
            .reconcile(&countries, &[], &birth, &female, &[])
            .unwrap();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].birth_rate, Some(0.02));
        assert_eq!(result.report.duplicate_birth_rate_keys, 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let countries = vec![cc("A", "X"), cc("B", "Y")];
        let female = vec![pop("A", 2000, 10.0), pop("B", 2000, 7.0)];
        let male = vec![pop("A", 2000, 5.0), pop("B", 2000, 6.0)];
        let birth = vec![ind("B", 2000, 0.01)];
        let death = vec![ind("A", 2000, 0.009)];

        let first = reconcile(&countries, &death, &birth, &female, &male).unwrap();
        let second = reconcile(&countries, &death, &birth, &female, &male).unwrap();

        assert_eq!(first, second);
    }
}
