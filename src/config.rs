// ⚙️ Configuration - demography.toml
// Source locations, header aliases, boundary dataset and dashboard defaults.

use crate::error::{PipelineError, Result};
use crate::loader::ColumnAliases;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "demography.toml";
pub const CONFIG_ENV_VAR: &str = "DEMOGRAPHY_CONFIG";
pub const DEFAULT_BOUNDARY_URL: &str =
    "https://raw.githubusercontent.com/johan/world.geo.json/master/countries.geo.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sources: SourcesConfig,
    #[serde(default)]
    pub columns: ColumnAliases,
    #[serde(default)]
    pub boundary: BoundaryConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    pub country_continent: SourceSpec,
    pub death_rate: SourceSpec,
    pub birth_rate: SourceSpec,
    pub population_female: SourceSpec,
    pub population_male: SourceSpec,
}

/// One input file; `sheet` only matters for workbooks (first sheet otherwise).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub sheet: Option<String>,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SourceSpec {
            path: path.into(),
            sheet: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryConfig {
    /// Remote GeoJSON; ignored when `path` is set
    #[serde(default = "default_boundary_url")]
    pub url: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Source country name -> boundary feature name
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Two-column CSV (Source,Boundary) merged over `aliases`
    #[serde(default)]
    pub aliases_file: Option<PathBuf>,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        BoundaryConfig {
            url: default_boundary_url(),
            path: None,
            timeout_seconds: default_timeout_seconds(),
            aliases: BTreeMap::new(),
            aliases_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub include_total: bool,
    #[serde(default = "default_year_from")]
    pub default_year_from: Option<i32>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            include_total: false,
            default_year_from: default_year_from(),
            top_n: default_top_n(),
        }
    }
}

fn default_boundary_url() -> String {
    DEFAULT_BOUNDARY_URL.to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_year_from() -> Option<i32> {
    Some(2000)
}

fn default_top_n() -> usize {
    15
}

impl Config {
    /// Find the config file: explicit path, then `$DEMOGRAPHY_CONFIG`, then ./demography.toml
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Load and parse a config file. Relative paths inside it are resolved
    /// against the directory holding the file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base_dir)
    }

    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("invalid TOML: {}", e)))?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base_dir.join(&*p);
            }
        };

        resolve(&mut self.sources.country_continent.path);
        resolve(&mut self.sources.death_rate.path);
        resolve(&mut self.sources.birth_rate.path);
        resolve(&mut self.sources.population_female.path);
        resolve(&mut self.sources.population_male.path);

        if let Some(p) = self.boundary.path.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.boundary.aliases_file.as_mut() {
            resolve(p);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.dashboard.top_n == 0 {
            return Err(PipelineError::Config(
                "dashboard.top_n must be at least 1".to_string(),
            ));
        }
        if self.boundary.path.is_none() && self.boundary.url.trim().is_empty() {
            return Err(PipelineError::Config(
                "boundary needs either a url or a path".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[sources]
country_continent = { path = "countries_and_continents.csv" }
death_rate = { path = "death rate.xlsx", sheet = "death_rate" }
birth_rate = { path = "Birth rate.xlsx", sheet = "Birth_rate" }
population_female = { path = "/data/populacja_female.xlsx" }
population_male = { path = "populacja_male.xlsx" }

[boundary]
timeout_seconds = 10

[boundary.aliases]
"United States" = "United States of America"
"Czechia" = "Czech Republic"

[dashboard]
include_total = true
top_n = 10
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_toml_str(SAMPLE, Path::new("/srv/demo")).unwrap();

        assert_eq!(
            config.sources.country_continent.path,
            PathBuf::from("/srv/demo/countries_and_continents.csv")
        );
        assert_eq!(config.sources.death_rate.sheet.as_deref(), Some("death_rate"));
        assert_eq!(config.sources.population_male.sheet, None);
        // Absolute paths are left alone
        assert_eq!(
            config.sources.population_female.path,
            PathBuf::from("/data/populacja_female.xlsx")
        );

        assert_eq!(config.boundary.url, DEFAULT_BOUNDARY_URL);
        assert_eq!(config.boundary.timeout_seconds, 10);
        assert_eq!(
            config.boundary.aliases.get("United States").map(String::as_str),
            Some("United States of America")
        );

        assert!(config.dashboard.include_total);
        assert_eq!(config.dashboard.top_n, 10);
        assert_eq!(config.dashboard.default_year_from, Some(2000));
    }

    #[test]
    fn test_missing_sources_is_config_error() {
        let err = Config::from_toml_str("[dashboard]\ntop_n = 3\n", Path::new(".")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_zero_top_n_rejected() {
        let content = SAMPLE.replace("top_n = 10", "top_n = 0");
        let err = Config::from_toml_str(&content, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("top_n"));
    }

    #[test]
    fn test_from_file_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demography.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(
            config.sources.birth_rate.path,
            dir.path().join("Birth rate.xlsx")
        );
    }

    #[test]
    fn test_example_config_parses() {
        let content = include_str!("../demography.example.toml");
        let config = Config::from_toml_str(content, Path::new("/srv/demo")).unwrap();

        assert_eq!(config.boundary.aliases.len(), 5);
        assert_eq!(
            config.boundary.aliases.get("Serbia").map(String::as_str),
            Some("Republic of Serbia")
        );
        assert_eq!(config.columns, ColumnAliases::default());
        assert_eq!(config.sources.birth_rate.sheet.as_deref(), Some("Birth_rate"));
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let path = Config::locate(Some(Path::new("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }
}
