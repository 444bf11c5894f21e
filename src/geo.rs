// 🗺️ Geo-Joiner - attach per-country indicator means to boundary polygons
//
// The boundary dataset is static reference data: a BoundaryProvider fetches
// and parses it at most once, then hands out the cached copy.

use crate::config::BoundaryConfig;
use crate::error::{PipelineError, Result};
use crate::model::{ReconciledRow, YearRange};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// ALIAS TABLE
// ============================================================================

/// Source country name -> boundary feature name ("United States" ->
/// "United States of America"). Names without an entry pass through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasTable {
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AliasRow {
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Boundary")]
    boundary: String,
}

impl AliasTable {
    pub fn new() -> Self {
        AliasTable::default()
    }

    pub fn from_map(aliases: BTreeMap<String, String>) -> Self {
        AliasTable { aliases }
    }

    /// Two-column CSV with `Source,Boundary` headers.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| PipelineError::Config(format!("alias file '{}': {}", path.display(), e)))?;

        let mut table = AliasTable::new();
        for result in reader.deserialize() {
            let row: AliasRow = result
                .map_err(|e| PipelineError::Config(format!("alias file '{}': {}", path.display(), e)))?;
            table.insert(row.source.trim(), row.boundary.trim());
        }
        Ok(table)
    }

    /// Inline `[boundary.aliases]`, then `aliases_file` on top.
    pub fn from_config(config: &BoundaryConfig) -> Result<Self> {
        let mut table = AliasTable::from_map(config.aliases.clone());
        if let Some(path) = &config.aliases_file {
            let file = AliasTable::from_csv(path)?;
            table.aliases.extend(file.aliases);
        }
        Ok(table)
    }

    pub fn insert(&mut self, source: impl Into<String>, boundary: impl Into<String>) {
        self.aliases.insert(source.into(), boundary.into());
    }

    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

// ============================================================================
// BOUNDARY DATASET
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    pub name: String,
    pub geometry: Value,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryDataset {
    pub features: Vec<BoundaryFeature>,
}

impl BoundaryDataset {
    /// Parse a GeoJSON FeatureCollection keyed by `properties.name`.
    pub fn from_geojson_str(content: &str, location: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| PipelineError::boundary_unavailable(location, format!("invalid JSON: {}", e)))?;

        if root.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(PipelineError::boundary_unavailable(
                location,
                "expected a GeoJSON FeatureCollection",
            ));
        }

        let raw_features = root
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| PipelineError::boundary_unavailable(location, "missing 'features' array"))?;

        let mut unnamed = 0;
        let features: Vec<BoundaryFeature> = raw_features
            .iter()
            .map(|feature| {
                let properties = feature
                    .get("properties")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let name = match properties.get("name").and_then(Value::as_str) {
                    Some(name) => name.to_string(),
                    None => {
                        unnamed += 1;
                        String::new()
                    }
                };
                BoundaryFeature {
                    name,
                    geometry: feature.get("geometry").cloned().unwrap_or(Value::Null),
                    properties,
                }
            })
            .collect();

        if unnamed > 0 {
            warn!(location, unnamed, "boundary features without properties.name will never match");
        }

        Ok(BoundaryDataset { features })
    }
}

// ============================================================================
// FETCHERS
// ============================================================================

/// Where the raw GeoJSON text comes from.
pub trait BoundaryFetcher: Send + Sync {
    fn fetch(&self) -> Result<String>;

    fn location(&self) -> String;
}

pub struct HttpFetcher {
    pub url: String,
    pub timeout: Duration,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        HttpFetcher {
            url: url.into(),
            timeout,
        }
    }
}

impl BoundaryFetcher for HttpFetcher {
    fn fetch(&self) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::boundary_unavailable(&self.url, e))?;

        client
            .get(&self.url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| PipelineError::boundary_unavailable(&self.url, e))
    }

    fn location(&self) -> String {
        self.url.clone()
    }
}

pub struct FileFetcher {
    pub path: PathBuf,
}

impl BoundaryFetcher for FileFetcher {
    fn fetch(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .map_err(|e| PipelineError::boundary_unavailable(&self.location(), e))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// PROVIDER (fetch once, reuse)
// ============================================================================

/// Fetches the boundary dataset at most once per provider. Only a
/// successful fetch is cached: after a failure the next `dataset()` call
/// fetches again.
pub struct BoundaryProvider {
    fetcher: Box<dyn BoundaryFetcher>,
    cache: OnceCell<Arc<BoundaryDataset>>,
}

impl BoundaryProvider {
    pub fn new(fetcher: Box<dyn BoundaryFetcher>) -> Self {
        BoundaryProvider {
            fetcher,
            cache: OnceCell::new(),
        }
    }

    /// Local file when `path` is set, otherwise the remote URL.
    pub fn from_config(config: &BoundaryConfig) -> Self {
        let fetcher: Box<dyn BoundaryFetcher> = match &config.path {
            Some(path) => Box::new(FileFetcher { path: path.clone() }),
            None => Box::new(HttpFetcher::new(
                config.url.clone(),
                Duration::from_secs(config.timeout_seconds),
            )),
        };
        BoundaryProvider::new(fetcher)
    }

    /// Cached dataset; the first call fetches and parses it. A failed
    /// fetch is not cached, so a later call may retry.
    pub fn dataset(&self) -> Result<Arc<BoundaryDataset>> {
        if let Some(dataset) = self.cache.get() {
            debug!("boundary dataset served from cache");
            return Ok(Arc::clone(dataset));
        }

        let dataset = self.cache.get_or_try_init(|| {
            let location = self.fetcher.location();
            info!(location = %location, "fetching boundary dataset");
            let content = self.fetcher.fetch()?;
            let dataset = BoundaryDataset::from_geojson_str(&content, &location)?;
            info!(features = dataset.features.len(), "boundary dataset ready");
            Ok::<_, PipelineError>(Arc::new(dataset))
        })?;

        Ok(Arc::clone(dataset))
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.get().is_some()
    }
}

// ============================================================================
// COUNTRY MEANS
// ============================================================================

/// Mean indicators for one country over the selected years. `None` = no
/// non-null observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CountryMeans {
    pub birth_rate: Option<f64>,
    pub death_rate: Option<f64>,
}

#[derive(Default)]
struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Per-country means in first-appearance order, nulls ignored.
pub fn country_means(rows: &[ReconciledRow], years: Option<YearRange>) -> Vec<(String, CountryMeans)> {
    let mut order: Vec<&str> = Vec::new();
    let mut acc: HashMap<&str, (RunningMean, RunningMean)> = HashMap::new();

    for row in rows {
        if let Some(range) = years {
            if !range.contains(row.year) {
                continue;
            }
        }
        let (birth, death) = acc.entry(row.country.as_str()).or_insert_with(|| {
            order.push(row.country.as_str());
            (RunningMean::default(), RunningMean::default())
        });
        birth.push(row.birth_rate);
        death.push(row.death_rate);
    }

    order
        .into_iter()
        .filter_map(|country| {
            let (birth, death) = acc.get(country)?;
            Some((
                country.to_string(),
                CountryMeans {
                    birth_rate: birth.mean(),
                    death_rate: death.mean(),
                },
            ))
        })
        .collect()
}

// ============================================================================
// GEO FEATURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoFeature {
    pub name: String,
    pub geometry: Value,
    pub mean_death_rate: Option<f64>,
    pub mean_birth_rate: Option<f64>,
    /// Birth rate above death rate; None when either mean is missing
    pub comparison: Option<bool>,
    #[serde(skip)]
    pub properties: Map<String, Value>,
}

impl GeoFeature {
    /// Map-colouring view: missing data drawn as zero.
    pub fn filled_death_rate(&self) -> f64 {
        self.mean_death_rate.unwrap_or(0.0)
    }

    pub fn filled_birth_rate(&self) -> f64 {
        self.mean_birth_rate.unwrap_or(0.0)
    }

    pub fn has_data(&self) -> bool {
        self.mean_birth_rate.is_some() || self.mean_death_rate.is_some()
    }
}

/// Left-join boundary features to per-country indicator means.
pub fn build_geo_features(
    rows: &[ReconciledRow],
    boundary: &BoundaryDataset,
    years: Option<YearRange>,
    aliases: &AliasTable,
) -> Vec<GeoFeature> {
    let mut by_boundary_name: HashMap<String, CountryMeans> = HashMap::new();

    for (country, means) in country_means(rows, years) {
        let target = aliases.resolve(&country).to_string();
        if by_boundary_name.contains_key(&target) {
            warn!(
                country = %country,
                boundary_name = %target,
                "two source countries map onto one boundary feature, keeping the first"
            );
            continue;
        }
        by_boundary_name.insert(target, means);
    }

    let features: Vec<GeoFeature> = boundary
        .features
        .iter()
        .map(|feature| {
            let means = by_boundary_name.get(&feature.name).copied().unwrap_or_default();
            let comparison = match (means.birth_rate, means.death_rate) {
                (Some(birth), Some(death)) => Some(birth > death),
                _ => None,
            };
            GeoFeature {
                name: feature.name.clone(),
                geometry: feature.geometry.clone(),
                mean_death_rate: means.death_rate,
                mean_birth_rate: means.birth_rate,
                comparison,
                properties: feature.properties.clone(),
            }
        })
        .collect();

    let matched = features.iter().filter(|f| f.has_data()).count();
    debug!(features = features.len(), matched, "geo join complete");

    features
}

/// Serialise back to a GeoJSON FeatureCollection. With `fill_missing`,
/// absent means are written as 0 (the choropleth convention); otherwise
/// they stay null.
pub fn to_feature_collection(features: &[GeoFeature], fill_missing: bool) -> Value {
    let features: Vec<Value> = features
        .iter()
        .map(|f| {
            let mut properties = f.properties.clone();
            properties.insert("name".to_string(), json!(f.name));
            if fill_missing {
                properties.insert("Death Rate".to_string(), json!(f.filled_death_rate()));
                properties.insert("Birth Rate".to_string(), json!(f.filled_birth_rate()));
            } else {
                properties.insert("Death Rate".to_string(), json!(f.mean_death_rate));
                properties.insert("Birth Rate".to_string(), json!(f.mean_birth_rate));
            }
            properties.insert("Comparison".to_string(), json!(f.comparison));
            json!({
                "type": "Feature",
                "properties": Value::Object(properties),
                "geometry": f.geometry,
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

// ============================================================================
// TESTS
// ============================================================================
