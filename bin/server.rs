// Demography Pipeline - Web Server
// JSON API over the reconciled table: each request recomputes its aggregation
// from the shared, read-only pipeline context.

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use demography::logging::init_logging;
use demography::{
    to_feature_collection, Config, Filter, Gender, PipelineContext, PipelineError, YearRange,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    ctx: Arc<PipelineContext>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiErrorBody>,
}

#[derive(Serialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                code: code.to_string(),
                message,
            }),
        }),
    )
        .into_response()
}

fn pipeline_error(e: PipelineError) -> Response {
    let status = match e {
        PipelineError::BoundarySourceUnavailable { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("pipeline error: {}", e);
    error_response(status, e.code(), e.to_string())
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct FilterQuery {
    /// female | male | total | all
    gender: Option<String>,
    from: Option<i32>,
    to: Option<i32>,
    /// Comma-separated
    continents: Option<String>,
    all_years: Option<bool>,
    n: Option<usize>,
    fill: Option<bool>,
}

impl FilterQuery {
    fn gender(&self) -> Result<Option<Gender>, Response> {
        match self.gender.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(g) if g.eq_ignore_ascii_case("all") => Ok(None),
            Some(g) => g
                .parse::<Gender>()
                .map(Some)
                .map_err(|msg| error_response(StatusCode::BAD_REQUEST, "bad_gender", msg)),
        }
    }

    fn years(&self, ctx: &PipelineContext) -> Result<Option<YearRange>, PipelineError> {
        if self.from.is_none() && self.to.is_none() {
            if self.all_years.unwrap_or(false) {
                return Ok(None);
            }
            return ctx.default_years();
        }
        let bounds = ctx.year_bounds()?;
        let from = self.from.or(bounds.map(|b| b.from)).unwrap_or(i32::MIN);
        let to = self.to.or(bounds.map(|b| b.to)).unwrap_or(i32::MAX);
        Ok(Some(YearRange::new(from, to)))
    }

    fn filter(&self, ctx: &PipelineContext) -> Result<Filter, Response> {
        let mut filter = Filter::new();
        if let Some(gender) = self.gender()? {
            filter = filter.with_gender(gender);
        }
        if let Some(years) = self.years(ctx).map_err(pipeline_error)? {
            filter = filter.with_years(years);
        }
        if let Some(list) = &self.continents {
            let continents: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            if !continents.is_empty() {
                filter = filter.with_continents(continents);
            }
        }
        Ok(filter)
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check(State(state): State<AppState>) -> Response {
    ApiResponse::ok(serde_json::json!({
        "status": "OK",
        "version": demography::VERSION,
        "boundary_loaded": state.ctx.boundary().is_loaded(),
    }))
}

fn years_payload(ctx: &PipelineContext) -> Result<serde_json::Value, PipelineError> {
    Ok(serde_json::json!({
        "bounds": ctx.year_bounds()?,
        "default": ctx.default_years()?,
        "continents": ctx.continents()?,
    }))
}

/// GET /api/years - Slider bounds, default range and continent options
async fn get_years(State(state): State<AppState>) -> Response {
    match years_payload(&state.ctx) {
        Ok(value) => ApiResponse::ok(value),
        Err(e) => pipeline_error(e),
    }
}

/// GET /api/continents - Continents present in the reconciled table
async fn get_continents(State(state): State<AppState>) -> Response {
    match state.ctx.continents() {
        Ok(continents) => ApiResponse::ok(continents),
        Err(e) => pipeline_error(e),
    }
}

/// GET /api/report - Reconciliation report (dropped rows, missing indicators)
async fn get_report(State(state): State<AppState>) -> Response {
    match state.ctx.reconcile() {
        Ok(reconciliation) => ApiResponse::ok(&reconciliation.report),
        Err(e) => pipeline_error(e),
    }
}

/// GET /api/quality - Source table checks
async fn get_quality(State(state): State<AppState>) -> Response {
    ApiResponse::ok(state.ctx.quality())
}

/// GET /api/continent-series - Population per continent, year and gender
async fn get_continent_series(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Response {
    let filter = match query.filter(&state.ctx) {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    match state.ctx.by_continent_year(&filter) {
        Ok(summary) => ApiResponse::ok(summary),
        Err(e) => pipeline_error(e),
    }
}

/// GET /api/top-countries - Countries ranked by mean population
async fn get_top_countries(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Response {
    let filter = match query.filter(&state.ctx) {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    match state.ctx.top_countries(&filter, query.n) {
        Ok(ranking) => ApiResponse::ok(ranking),
        Err(e) => pipeline_error(e),
    }
}

/// GET /api/geo - Boundary features with mean birth/death rates (GeoJSON)
async fn get_geo(State(state): State<AppState>, Query(query): Query<FilterQuery>) -> Response {
    let years = match query.years(&state.ctx) {
        Ok(years) => years,
        Err(e) => return pipeline_error(e),
    };
    let fill = query.fill.unwrap_or(false);

    // The first call may download the boundary dataset
    let ctx = Arc::clone(&state.ctx);
    let joined = tokio::task::spawn_blocking(move || ctx.geo_features(years)).await;

    match joined {
        Ok(Ok(features)) => (StatusCode::OK, Json(to_feature_collection(&features, fill))).into_response(),
        Ok(Err(e)) => pipeline_error(e),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "join_error",
            format!("geo task failed: {}", e),
        ),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging(std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false));

    let config_path = Config::locate(None);
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    let ctx = tokio::task::spawn_blocking(move || -> anyhow::Result<PipelineContext> {
        let ctx = PipelineContext::load(&config).context("Failed to load sources")?;
        ctx.reconcile().context("Failed to reconcile sources")?;
        Ok(ctx)
    })
    .await??;
    let ctx = Arc::new(ctx);

    // Warm the boundary cache; the map endpoint retries on its own if this fails
    let warm = Arc::clone(&ctx);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = warm.boundary().dataset() {
            warn!("boundary dataset not available yet: {}", e);
        }
    });

    let state = AppState { ctx };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/years", get(get_years))
        .route("/continents", get(get_continents))
        .route("/report", get(get_report))
        .route("/quality", get(get_quality))
        .route("/continent-series", get(get_continent_series))
        .route("/top-countries", get(get_top_countries))
        .route("/geo", get(get_geo))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🚀 Server running on http://{}", addr);
    info!("   API: http://{}/api/continent-series", addr);

    axum::serve(listener, app).await.context("Server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use demography::geo::FileFetcher;
    use demography::{
        AliasTable, BoundaryProvider, CountryContinent, PopulationRecord, SourceTables,
    };

    fn population(country: &str, year: i32, value: f64) -> PopulationRecord {
        PopulationRecord {
            country: country.to_string(),
            year,
            value,
        }
    }

    fn context() -> PipelineContext {
        let tables = SourceTables {
            country_continent: vec![
                CountryContinent {
                    country: "Kenya".to_string(),
                    continent: "Africa".to_string(),
                },
                CountryContinent {
                    country: "Poland".to_string(),
                    continent: "Europe".to_string(),
                },
            ],
            population_female: vec![population("Kenya", 1999, 15.0), population("Poland", 2003, 19.7)],
            population_male: vec![population("Kenya", 1999, 14.8)],
            ..SourceTables::default()
        };
        let boundary = BoundaryProvider::new(Box::new(FileFetcher {
            path: "/nonexistent/countries.geo.json".into(),
        }));
        PipelineContext::new(tables, AliasTable::new(), boundary).with_default_year_from(Some(2000))
    }

    #[test]
    fn test_years_payload_lists_continents() {
        let payload = years_payload(&context()).unwrap();

        assert_eq!(payload["continents"], serde_json::json!(["Africa", "Europe"]));
        assert_eq!(payload["bounds"], serde_json::json!({"from": 1999, "to": 2003}));
        assert_eq!(payload["default"], serde_json::json!({"from": 2000, "to": 2003}));
    }

    #[test]
    fn test_filter_query_all_genders_and_continent_list() {
        let ctx = context();
        let query = FilterQuery {
            gender: Some("all".to_string()),
            continents: Some("Europe, ,Africa".to_string()),
            all_years: Some(true),
            ..FilterQuery::default()
        };

        let Ok(filter) = query.filter(&ctx) else {
            panic!("query rejected");
        };

        assert_eq!(filter.gender, None);
        assert_eq!(filter.years, None);
        assert_eq!(
            filter.continents,
            Some(vec!["Europe".to_string(), "Africa".to_string()])
        );
    }
}
