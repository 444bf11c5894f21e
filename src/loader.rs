// 📂 Source Loader
// Reads the five demographic sources (CSV or workbook) into typed tables.
//
// Headers vary between exports ("Country Name" vs "Country", "Atrybut" vs
// "Year"), so every logical column is resolved through a list of aliases.

use crate::config::{SourceSpec, SourcesConfig};
use crate::error::{PipelineError, Result};
use crate::model::{CountryContinent, IndicatorRecord, PopulationRecord};
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// SOURCE KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    CountryContinent,
    DeathRate,
    BirthRate,
    PopulationFemale,
    PopulationMale,
}

impl SourceKind {
    /// Name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::CountryContinent => "country_continent",
            SourceKind::DeathRate => "death_rate",
            SourceKind::BirthRate => "birth_rate",
            SourceKind::PopulationFemale => "population_female",
            SourceKind::PopulationMale => "population_male",
        }
    }

    pub fn all() -> [SourceKind; 5] {
        [
            SourceKind::CountryContinent,
            SourceKind::DeathRate,
            SourceKind::BirthRate,
            SourceKind::PopulationFemale,
            SourceKind::PopulationMale,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Workbook,
}

/// Pick a reader from the file extension.
pub fn detect_format(path: &Path) -> Result<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" | "txt" => Ok(FileFormat::Csv),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(FileFormat::Workbook),
        _ => Err(PipelineError::source_unavailable(
            "unknown",
            path,
            format!("unsupported file extension '{}'", ext),
        )),
    }
}

// ============================================================================
// COLUMN ALIASES
// ============================================================================

/// Accepted header spellings for each logical column. Matching is trimmed
/// and case-insensitive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnAliases {
    #[serde(default = "default_country_aliases")]
    pub country: Vec<String>,
    #[serde(default = "default_continent_aliases")]
    pub continent: Vec<String>,
    #[serde(default = "default_year_aliases")]
    pub year: Vec<String>,
    #[serde(default = "default_value_aliases")]
    pub value: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        ColumnAliases {
            country: default_country_aliases(),
            continent: default_continent_aliases(),
            year: default_year_aliases(),
            value: default_value_aliases(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_country_aliases() -> Vec<String> {
    strings(&["Country", "Country Name", "country_name", "Entity"])
}

fn default_continent_aliases() -> Vec<String> {
    strings(&["Continent", "Region"])
}

fn default_year_aliases() -> Vec<String> {
    strings(&["Year", "Atrybut", "Attribute"])
}

fn default_value_aliases() -> Vec<String> {
    strings(&["Value", "Wartość", "Wartosc"])
}

// ============================================================================
// RAW TABLE
// ============================================================================

/// Untyped sheet: header row plus string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub source_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Index of the first header matching any alias.
    pub fn column(&self, aliases: &[String], logical: &str) -> Result<usize> {
        for alias in aliases {
            let wanted = alias.trim().to_lowercase();
            if let Some(idx) = self
                .headers
                .iter()
                .position(|h| h.trim().to_lowercase() == wanted)
            {
                return Ok(idx);
            }
        }

        Err(PipelineError::SchemaMismatch {
            source_name: self.source_name.clone(),
            column: logical.to_string(),
            available: self.headers.clone(),
        })
    }

    /// Cell text, empty when the row is short.
    pub fn cell<'a>(&'a self, row: &'a [String], idx: usize) -> &'a str {
        row.get(idx).map(|s| s.trim()).unwrap_or("")
    }

    /// 1-based line number in the source file (header is line 1)
    pub fn line_number(row_idx: usize) -> usize {
        row_idx + 2
    }
}

// ============================================================================
// TABLE READERS
// ============================================================================

pub trait TableReader {
    fn read(&self, spec: &SourceSpec, source_name: &str) -> Result<RawTable>;
}

pub fn get_reader(format: FileFormat) -> Box<dyn TableReader> {
    match format {
        FileFormat::Csv => Box::new(CsvTableReader),
        FileFormat::Workbook => Box::new(WorkbookTableReader),
    }
}

pub struct CsvTableReader;

impl TableReader for CsvTableReader {
    fn read(&self, spec: &SourceSpec, source_name: &str) -> Result<RawTable> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&spec.path)
            .map_err(|e| PipelineError::source_unavailable(source_name, &spec.path, e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::source_unavailable(source_name, &spec.path, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                PipelineError::source_unavailable(
                    source_name,
                    &spec.path,
                    format!("line {}: {}", RawTable::line_number(line_num), e),
                )
            })?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(RawTable {
            source_name: source_name.to_string(),
            headers,
            rows,
        })
    }
}

pub struct WorkbookTableReader;

impl TableReader for WorkbookTableReader {
    fn read(&self, spec: &SourceSpec, source_name: &str) -> Result<RawTable> {
        let mut workbook = open_workbook_auto(&spec.path)
            .map_err(|e| PipelineError::source_unavailable(source_name, &spec.path, e))?;

        let sheet = match &spec.sheet {
            Some(name) => name.clone(),
            None => workbook.sheet_names().first().cloned().ok_or_else(|| {
                PipelineError::source_unavailable(source_name, &spec.path, "workbook has no sheets")
            })?,
        };

        let range = workbook.worksheet_range(&sheet).map_err(|e| {
            PipelineError::source_unavailable(
                source_name,
                &spec.path,
                format!("sheet '{}': {}", sheet, e),
            )
        })?;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|header| header.iter().map(cell_text).collect())
            .unwrap_or_default();
        let rows: Vec<Vec<String>> = rows.map(|row| row.iter().map(cell_text).collect()).collect();

        debug!(source = source_name, sheet = %sheet, rows = rows.len(), "read workbook sheet");

        Ok(RawTable {
            source_name: source_name.to_string(),
            headers,
            rows,
        })
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

/// Read any supported file into a raw table.
pub fn read_table(spec: &SourceSpec, kind: SourceKind) -> Result<RawTable> {
    if !spec.path.exists() {
        return Err(PipelineError::source_unavailable(
            kind.name(),
            &spec.path,
            "file not found",
        ));
    }

    let format = detect_format(&spec.path).map_err(|_| {
        PipelineError::source_unavailable(kind.name(), &spec.path, "unsupported file extension")
    })?;
    get_reader(format).read(spec, kind.name())
}

// ============================================================================
// CELL PARSING
// ============================================================================

/// Years arrive as "2000" from CSV or "2000.0"-style floats from workbooks.
pub fn parse_year(raw: &str) -> Option<i32> {
    let text = raw.trim();
    if let Ok(year) = text.parse::<i32>() {
        return Some(year);
    }

    let float = text.parse::<f64>().ok()?;
    if float.is_finite() && float.fract() == 0.0 && float.abs() <= i32::MAX as f64 {
        Some(float as i32)
    } else {
        None
    }
}

/// `Ok(None)` for blank cells, error for text that is not a number.
fn parse_value(table: &RawTable, row_idx: usize, column: &str, raw: &str) -> Result<Option<f64>> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|_| PipelineError::MalformedCell {
        source_name: table.source_name.clone(),
        line: RawTable::line_number(row_idx),
        column: column.to_string(),
        value: raw.to_string(),
    })
}

fn require_year(table: &RawTable, row_idx: usize, column: &str, raw: &str) -> Result<i32> {
    parse_year(raw).ok_or_else(|| PipelineError::MalformedCell {
        source_name: table.source_name.clone(),
        line: RawTable::line_number(row_idx),
        column: column.to_string(),
        value: raw.to_string(),
    })
}

// ============================================================================
// TYPED LOADERS
// ============================================================================

pub fn country_continents_from_table(
    table: &RawTable,
    aliases: &ColumnAliases,
) -> Result<Vec<CountryContinent>> {
    let country_idx = table.column(&aliases.country, "country")?;
    let continent_idx = table.column(&aliases.continent, "continent")?;

    let mut records = Vec::new();
    let mut blank_continents = 0usize;
    for row in &table.rows {
        let country = table.cell(row, country_idx);
        if country.is_empty() {
            continue;
        }
        let continent = table.cell(row, continent_idx);
        if continent.is_empty() {
            blank_continents += 1;
            continue;
        }
        records.push(CountryContinent {
            country: country.to_string(),
            continent: continent.to_string(),
        });
    }

    if blank_continents > 0 {
        warn!(
            source = %table.source_name,
            skipped = blank_continents,
            "skipped countries with a blank continent"
        );
    }
    Ok(records)
}

/// (country, year, value) triples shared by indicator and population sheets.
fn country_year_values(
    table: &RawTable,
    aliases: &ColumnAliases,
) -> Result<Vec<(String, i32, f64)>> {
    let country_idx = table.column(&aliases.country, "country")?;
    let year_idx = table.column(&aliases.year, "year")?;
    let value_idx = table.column(&aliases.value, "value")?;

    let year_header = table.headers[year_idx].clone();
    let value_header = table.headers[value_idx].clone();

    let mut out = Vec::with_capacity(table.rows.len());
    let mut blank_values = 0usize;

    for (row_idx, row) in table.rows.iter().enumerate() {
        let country = table.cell(row, country_idx);
        if country.is_empty() {
            continue;
        }
        let year = require_year(table, row_idx, &year_header, table.cell(row, year_idx))?;
        match parse_value(table, row_idx, &value_header, table.cell(row, value_idx))? {
            Some(value) => out.push((country.to_string(), year, value)),
            None => blank_values += 1,
        }
    }

    if blank_values > 0 {
        warn!(
            source = %table.source_name,
            skipped = blank_values,
            "skipped rows with blank values"
        );
    }
    Ok(out)
}

pub fn indicators_from_table(table: &RawTable, aliases: &ColumnAliases) -> Result<Vec<IndicatorRecord>> {
    Ok(country_year_values(table, aliases)?
        .into_iter()
        .map(|(country, year, value)| IndicatorRecord { country, year, value })
        .collect())
}

pub fn population_from_table(table: &RawTable, aliases: &ColumnAliases) -> Result<Vec<PopulationRecord>> {
    Ok(country_year_values(table, aliases)?
        .into_iter()
        .map(|(country, year, value)| PopulationRecord { country, year, value })
        .collect())
}

// ============================================================================
// SOURCE TABLES
// ============================================================================

/// The five inputs of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTables {
    pub country_continent: Vec<CountryContinent>,
    pub death_rate: Vec<IndicatorRecord>,
    pub birth_rate: Vec<IndicatorRecord>,
    pub population_female: Vec<PopulationRecord>,
    pub population_male: Vec<PopulationRecord>,
}

impl SourceTables {
    pub fn row_count(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::CountryContinent => self.country_continent.len(),
            SourceKind::DeathRate => self.death_rate.len(),
            SourceKind::BirthRate => self.birth_rate.len(),
            SourceKind::PopulationFemale => self.population_female.len(),
            SourceKind::PopulationMale => self.population_male.len(),
        }
    }
}

pub fn load_sources(sources: &SourcesConfig, aliases: &ColumnAliases) -> Result<SourceTables> {
    let table = read_table(&sources.country_continent, SourceKind::CountryContinent)?;
    let country_continent = country_continents_from_table(&table, aliases)?;

    let table = read_table(&sources.death_rate, SourceKind::DeathRate)?;
    let death_rate = indicators_from_table(&table, aliases)?;

    let table = read_table(&sources.birth_rate, SourceKind::BirthRate)?;
    let birth_rate = indicators_from_table(&table, aliases)?;

    let table = read_table(&sources.population_female, SourceKind::PopulationFemale)?;
    let population_female = population_from_table(&table, aliases)?;

    let table = read_table(&sources.population_male, SourceKind::PopulationMale)?;
    let population_male = population_from_table(&table, aliases)?;

    let tables = SourceTables {
        country_continent,
        death_rate,
        birth_rate,
        population_female,
        population_male,
    };

    for kind in SourceKind::all() {
        info!(source = kind.name(), rows = tables.row_count(kind), "loaded source");
    }

    Ok(tables)
}

// ============================================================================
// TESTS
// ============================================================================
