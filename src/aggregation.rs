// 📊 Aggregator - chart-ready summaries over reconciled rows
// Pure functions: same rows + same filter = same output.

use crate::model::{continent_gender, Gender, ReconciledRow, YearRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const DEFAULT_TOP_N: usize = 15;

// ============================================================================
// FILTER
// ============================================================================

/// User-selected slice of the reconciled table. `None` means "all", except
/// that derived Total rows are only matched when Total is asked for, since
/// they already contain the Female and Male rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub gender: Option<Gender>,
    pub years: Option<YearRange>,
    pub continents: Option<Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn with_years(mut self, years: YearRange) -> Self {
        self.years = Some(years);
        self
    }

    pub fn with_continents<I, S>(mut self, continents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.continents = Some(continents.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, row: &ReconciledRow) -> bool {
        match self.gender {
            Some(gender) if row.gender != gender => return false,
            None if row.gender == Gender::Total => return false,
            _ => {}
        }
        if let Some(years) = self.years {
            if !years.contains(row.year) {
                return false;
            }
        }
        if let Some(continents) = &self.continents {
            if !continents.iter().any(|c| c == &row.continent) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// OUTPUT SHAPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinentYearSummary {
    #[serde(rename = "Continent")]
    pub continent: String,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "Continent_Gender")]
    pub continent_gender: String,
    #[serde(rename = "Value")]
    pub sum_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRanking {
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Value")]
    pub mean_value: f64,
}

// ============================================================================
// AGGREGATIONS
// ============================================================================

/// Sum of population per (Continent, Year, Gender).
pub fn by_continent_year(rows: &[ReconciledRow], filter: &Filter) -> Vec<ContinentYearSummary> {
    let mut groups: BTreeMap<(&str, i32, Gender), f64> = BTreeMap::new();

    for row in rows.iter().filter(|r| filter.matches(r)) {
        *groups
            .entry((row.continent.as_str(), row.year, row.gender))
            .or_insert(0.0) += row.value;
    }

    groups
        .into_iter()
        .map(|((continent, year, gender), sum_value)| ContinentYearSummary {
            continent: continent.to_string(),
            year,
            gender,
            continent_gender: continent_gender(continent, gender),
            sum_value,
        })
        .collect()
}

/// Countries ranked by mean yearly population.
///
/// Values are first summed per (Country, Year), so several genders in the
/// same year count once, then averaged over the years present. Sorted
/// descending; ties keep the order in which countries first appear.
pub fn top_countries(rows: &[ReconciledRow], filter: &Filter, n: usize) -> Vec<CountryRanking> {
    let mut order: Vec<&str> = Vec::new();
    let mut per_year: HashMap<&str, BTreeMap<i32, f64>> = HashMap::new();

    for row in rows.iter().filter(|r| filter.matches(r)) {
        let years = per_year.entry(row.country.as_str()).or_insert_with(|| {
            order.push(row.country.as_str());
            BTreeMap::new()
        });
        *years.entry(row.year).or_insert(0.0) += row.value;
    }

    let mut ranking: Vec<CountryRanking> = order
        .into_iter()
        .filter_map(|country| {
            let years = per_year.get(country)?;
            let mean_value = years.values().sum::<f64>() / years.len() as f64;
            Some(CountryRanking {
                country: country.to_string(),
                mean_value,
            })
        })
        .collect();

    // sort_by is stable, so equal means keep first-appearance order
    ranking.sort_by(|a, b| b.mean_value.total_cmp(&a.mean_value));
    ranking.truncate(n);
    ranking
}

/// Smallest and largest year present (slider limits).
pub fn year_bounds(rows: &[ReconciledRow]) -> Option<YearRange> {
    let min = rows.iter().map(|r| r.year).min()?;
    let max = rows.iter().map(|r| r.year).max()?;
    Some(YearRange::new(min, max))
}

/// Distinct continents, sorted.
pub fn continents(rows: &[ReconciledRow]) -> Vec<String> {
    rows.iter()
        .map(|r| r.continent.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(country: &str, continent: &str, year: i32, gender: Gender, value: f64) -> ReconciledRow {
        ReconciledRow {
            country: country.to_string(),
            year,
            gender,
            continent: continent.to_string(),
            continent_gender: continent_gender(continent, gender),
            value,
            birth_rate: None,
            death_rate: None,
        }
    }

    fn sample_rows() -> Vec<ReconciledRow> {
        vec![
            row("Poland", "Europe", 2000, Gender::Female, 19.8),
            row("Poland", "Europe", 2000, Gender::Male, 18.6),
            row("Poland", "Europe", 2001, Gender::Female, 19.7),
            row("Poland", "Europe", 2001, Gender::Male, 18.5),
            row("Germany", "Europe", 2000, Gender::Female, 42.0),
            row("Germany", "Europe", 2000, Gender::Male, 40.2),
            row("Kenya", "Africa", 2000, Gender::Female, 15.6),
            row("Kenya", "Africa", 2000, Gender::Male, 15.4),
            row("Kenya", "Africa", 2001, Gender::Female, 16.1),
        ]
    }

    #[test]
    fn test_by_continent_year_two_country_scenario() {
        let rows = vec![
            row("A", "X", 2000, Gender::Female, 10.0),
            row("A", "X", 2000, Gender::Male, 5.0),
        ];

        let summary = by_continent_year(&rows, &Filter::new());

        assert_eq!(
            summary,
            vec![
                ContinentYearSummary {
                    continent: "X".to_string(),
                    year: 2000,
                    gender: Gender::Female,
                    continent_gender: "X-Female".to_string(),
                    sum_value: 10.0,
                },
                ContinentYearSummary {
                    continent: "X".to_string(),
                    year: 2000,
                    gender: Gender::Male,
                    continent_gender: "X-Male".to_string(),
                    sum_value: 5.0,
                },
            ]
        );
    }

    #[test]
    fn test_by_continent_year_sums_countries() {
        let summary = by_continent_year(&sample_rows(), &Filter::new().with_gender(Gender::Female));

        let europe_2000 = summary
            .iter()
            .find(|s| s.continent == "Europe" && s.year == 2000)
            .unwrap();
        assert!((europe_2000.sum_value - 61.8).abs() < 1e-9);
        assert!(summary.iter().all(|s| s.gender == Gender::Female));
        assert!(summary
            .iter()
            .all(|s| s.continent_gender == format!("{}-{}", s.continent, s.gender)));
    }

    #[test]
    fn test_all_genders_skips_derived_totals() {
        let rows = vec![
            row("A", "X", 2000, Gender::Female, 10.0),
            row("A", "X", 2000, Gender::Male, 5.0),
            row("A", "X", 2000, Gender::Total, 15.0),
        ];

        let top = top_countries(&rows, &Filter::new(), 5);
        assert_eq!(top[0].mean_value, 15.0);

        let summary = by_continent_year(&rows, &Filter::new());
        assert_eq!(summary.len(), 2);
        assert!(summary.iter().all(|s| s.gender != Gender::Total));

        let totals = by_continent_year(&rows, &Filter::new().with_gender(Gender::Total));
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].sum_value, 15.0);
    }

    #[test]
    fn test_filter_by_years_and_continents() {
        let filter = Filter::new()
            .with_years(YearRange::new(2001, 2001))
            .with_continents(["Africa"]);

        let summary = by_continent_year(&sample_rows(), &filter);

        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].continent, "Africa");
        assert_eq!(summary[0].year, 2001);
        assert_eq!(summary[0].sum_value, 16.1);
    }

    #[test]
    fn test_empty_filter_result_is_not_an_error() {
        let filter = Filter::new().with_years(YearRange::new(1960, 1970));
        assert!(by_continent_year(&sample_rows(), &filter).is_empty());
        assert!(top_countries(&sample_rows(), &filter, DEFAULT_TOP_N).is_empty());
    }

    #[test]
    fn test_top_countries_sums_genders_then_averages_years() {
        let ranking = top_countries(&sample_rows(), &Filter::new(), DEFAULT_TOP_N);

        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[0].country, "Germany");
        assert!((ranking[0].mean_value - 82.2).abs() < 1e-9);
        // Poland: (38.4 + 38.2) / 2
        assert_eq!(ranking[1].country, "Poland");
        assert!((ranking[1].mean_value - 38.3).abs() < 1e-9);
        // Kenya: (31.0 + 16.1) / 2
        assert_eq!(ranking[2].country, "Kenya");
        assert!((ranking[2].mean_value - 23.55).abs() < 1e-9);
    }

    #[test]
    fn test_top_countries_sorted_and_truncated() {
        let ranking = top_countries(&sample_rows(), &Filter::new(), 2);

        assert_eq!(ranking.len(), 2);
        assert!(ranking
            .windows(2)
            .all(|w| w[0].mean_value >= w[1].mean_value));
    }

    #[test]
    fn test_top_countries_ties_keep_input_order() {
        let rows = vec![
            row("B", "X", 2000, Gender::Female, 5.0),
            row("A", "X", 2000, Gender::Female, 5.0),
            row("C", "X", 2000, Gender::Female, 9.0),
        ];

        let ranking = top_countries(&rows, &Filter::new(), 10);
        let names: Vec<&str> = ranking.iter().map(|r| r.country.as_str()).collect();

        assert_eq!(names, vec!["C", "B", "A"]);
    }

    #[test]
    fn test_aggregations_are_idempotent() {
        let rows = sample_rows();
        let filter = Filter::new().with_gender(Gender::Male);

        assert_eq!(by_continent_year(&rows, &filter), by_continent_year(&rows, &filter));
        assert_eq!(top_countries(&rows, &filter, 5), top_countries(&rows, &filter, 5));
    }

    #[test]
    fn test_year_bounds_and_continents() {
        let rows = sample_rows();

        assert_eq!(year_bounds(&rows), Some(YearRange::new(2000, 2001)));
        assert_eq!(year_bounds(&[]), None);
        assert_eq!(continents(&rows), vec!["Africa".to_string(), "Europe".to_string()]);
    }
}
