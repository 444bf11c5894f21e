// 🔗 Pipeline Context - one run's inputs plus the operations over them
//
// Holds the five source tables, the alias table and the boundary provider.
// The reconciled table is computed on first use and then shared read-only;
// every aggregation is recomputed from it per request.

use crate::aggregation::{self, ContinentYearSummary, CountryRanking, Filter};
use crate::config::Config;
use crate::data_quality::{DataQualityEngine, QualityReport};
use crate::error::Result;
use crate::geo::{self, AliasTable, BoundaryProvider, GeoFeature};
use crate::loader::{self, SourceTables};
use crate::model::{ReconciledRow, YearRange};
use crate::reconciliation::{Reconciler, Reconciliation, ReconciliationOptions};
use once_cell::sync::OnceCell;
use tracing::info;

pub struct PipelineContext {
    tables: SourceTables,
    options: ReconciliationOptions,
    aliases: AliasTable,
    boundary: BoundaryProvider,
    top_n: usize,
    default_year_from: Option<i32>,
    reconciled: OnceCell<Reconciliation>,
}

impl PipelineContext {
    pub fn new(tables: SourceTables, aliases: AliasTable, boundary: BoundaryProvider) -> Self {
        PipelineContext {
            tables,
            options: ReconciliationOptions::default(),
            aliases,
            boundary,
            top_n: aggregation::DEFAULT_TOP_N,
            default_year_from: None,
            reconciled: OnceCell::new(),
        }
    }

    pub fn with_options(mut self, options: ReconciliationOptions) -> Self {
        self.options = options;
        self.reconciled = OnceCell::new();
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_default_year_from(mut self, year: Option<i32>) -> Self {
        self.default_year_from = year;
        self
    }

    /// Load every source named in the config. The boundary dataset is not
    /// fetched until a geo operation needs it.
    pub fn load(config: &Config) -> Result<Self> {
        let tables = loader::load_sources(&config.sources, &config.columns)?;
        let aliases = AliasTable::from_config(&config.boundary)?;
        let boundary = BoundaryProvider::from_config(&config.boundary);

        info!(aliases = aliases.len(), "pipeline context ready");

        Ok(PipelineContext::new(tables, aliases, boundary)
            .with_options(ReconciliationOptions {
                include_total: config.dashboard.include_total,
            })
            .with_top_n(config.dashboard.top_n)
            .with_default_year_from(config.dashboard.default_year_from))
    }

    pub fn tables(&self) -> &SourceTables {
        &self.tables
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn boundary(&self) -> &BoundaryProvider {
        &self.boundary
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Reconciled table with its report, computed once.
    pub fn reconcile(&self) -> Result<&Reconciliation> {
        self.reconciled.get_or_try_init(|| {
            Reconciler::with_options(self.options).reconcile(
                &self.tables.country_continent,
                &self.tables.death_rate,
                &self.tables.birth_rate,
                &self.tables.population_female,
                &self.tables.population_male,
            )
        })
    }

    pub fn rows(&self) -> Result<&[ReconciledRow]> {
        Ok(&self.reconcile()?.rows)
    }

    pub fn by_continent_year(&self, filter: &Filter) -> Result<Vec<ContinentYearSummary>> {
        Ok(aggregation::by_continent_year(self.rows()?, filter))
    }

    /// `n` falls back to the configured top_n.
    pub fn top_countries(&self, filter: &Filter, n: Option<usize>) -> Result<Vec<CountryRanking>> {
        Ok(aggregation::top_countries(
            self.rows()?,
            filter,
            n.unwrap_or(self.top_n),
        ))
    }

    pub fn geo_features(&self, years: Option<YearRange>) -> Result<Vec<GeoFeature>> {
        let rows = self.rows()?;
        let boundary = self.boundary.dataset()?;
        Ok(geo::build_geo_features(rows, &boundary, years, &self.aliases))
    }

    pub fn year_bounds(&self) -> Result<Option<YearRange>> {
        Ok(aggregation::year_bounds(self.rows()?))
    }

    pub fn continents(&self) -> Result<Vec<String>> {
        Ok(aggregation::continents(self.rows()?))
    }

    /// Initial slider position: configured start year (clamped to the data)
    /// through the last year present.
    pub fn default_years(&self) -> Result<Option<YearRange>> {
        let bounds = match self.year_bounds()? {
            Some(bounds) => bounds,
            None => return Ok(None),
        };
        let from = self
            .default_year_from
            .map(|year| year.clamp(bounds.from, bounds.to))
            .unwrap_or(bounds.from);
        Ok(Some(YearRange::new(from, bounds.to)))
    }

    pub fn quality(&self) -> QualityReport {
        DataQualityEngine::new().check(&self.tables)
    }
}
