// Demography Pipeline - Core Library
// Loads population, birth-rate and death-rate sources, reconciles them into one
// table and derives chart and map inputs. Used by the CLI, the API server and tests.

pub mod aggregation;
pub mod config;
pub mod data_quality;
pub mod error;
pub mod geo;
pub mod loader;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod reconciliation;

// Re-export commonly used types
pub use aggregation::{
    by_continent_year, top_countries, year_bounds, ContinentYearSummary, CountryRanking, Filter,
};
pub use config::{BoundaryConfig, Config, DashboardConfig, SourceSpec, SourcesConfig};
pub use data_quality::{DataQualityEngine, QualityIssue, QualityReport, Severity};
pub use error::{PipelineError, Result};
pub use geo::{
    build_geo_features, to_feature_collection, AliasTable, BoundaryDataset, BoundaryFetcher,
    BoundaryProvider, GeoFeature,
};
pub use loader::{load_sources, ColumnAliases, SourceKind, SourceTables};
pub use model::{
    CountryContinent, Gender, IndicatorRecord, PopulationRecord, ReconciledRow, YearRange,
};
pub use pipeline::PipelineContext;
pub use reconciliation::{
    reconcile, Reconciler, Reconciliation, ReconciliationOptions, ReconciliationReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
