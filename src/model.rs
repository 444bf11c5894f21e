// 🧱 Data Model - typed rows flowing through the pipeline
// Source tables are loaded fresh per run; nothing here is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// GENDER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
    /// Derived: Female + Male for the same (Country, Year)
    Total,
}

impl Gender {
    pub fn name(&self) -> &'static str {
        match self {
            Gender::Female => "Female",
            Gender::Male => "Male",
            Gender::Total => "Total",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "female" | "f" => Ok(Gender::Female),
            "male" | "m" => Ok(Gender::Male),
            "total" | "t" => Ok(Gender::Total),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

// ============================================================================
// SOURCE RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryContinent {
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Continent")]
    pub continent: String,
}

/// Birth or death rate for one country-year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Value")]
    pub value: f64,
}

/// Population by sex as it comes off the sheet (no gender column yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Value")]
    pub value: f64,
}

// ============================================================================
// RECONCILED ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRow {
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "Continent")]
    pub continent: String,
    #[serde(rename = "Continent_Gender")]
    pub continent_gender: String,
    #[serde(rename = "Value")]
    pub value: f64,
    /// None = no birth-rate record for this (Country, Year)
    #[serde(rename = "Birth Rate")]
    pub birth_rate: Option<f64>,
    #[serde(rename = "Death Rate")]
    pub death_rate: Option<f64>,
}

/// Display key shared by reconciled rows and continent summaries.
pub fn continent_gender(continent: &str, gender: Gender) -> String {
    format!("{}-{}", continent, gender)
}

// ============================================================================
// YEAR RANGE
// ============================================================================

/// Inclusive range of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub from: i32,
    pub to: i32,
}

impl YearRange {
    pub fn new(from: i32, to: i32) -> Self {
        if from <= to {
            YearRange { from, to }
        } else {
            YearRange { from: to, to: from }
        }
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.from && year <= self.to
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}
