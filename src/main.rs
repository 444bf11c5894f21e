use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use demography::logging::init_logging;
use demography::{
    to_feature_collection, Config, Filter, Gender, PipelineContext, Severity, YearRange,
};

#[derive(Parser)]
#[command(name = "demography", version, about = "Reconcile demographic sources into chart and map tables")]
struct Cli {
    /// Config file (default: $DEMOGRAPHY_CONFIG or ./demography.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the reconciled (Country, Year, Gender) table
    Reconcile {
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Population summed per continent, year and gender
    Continents {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Countries ranked by mean population
    Top {
        #[command(flatten)]
        filter: FilterArgs,
        /// Number of countries (default from config)
        #[arg(short, long)]
        n: Option<usize>,
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Boundary features with mean birth/death rates as GeoJSON
    Geo {
        #[arg(long)]
        from: Option<i32>,
        #[arg(long)]
        to: Option<i32>,
        /// Use every year instead of the default range
        #[arg(long)]
        all_years: bool,
        /// Write missing means as 0 instead of null
        #[arg(long)]
        fill: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Year bounds, default range and continents present
    Years,
    /// Check the source tables before reconciling
    Quality {
        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// female, male or total (all genders when omitted)
    #[arg(long)]
    gender: Option<Gender>,
    #[arg(long)]
    from: Option<i32>,
    #[arg(long)]
    to: Option<i32>,
    /// Use every year instead of the default range
    #[arg(long)]
    all_years: bool,
    /// Comma-separated continent names
    #[arg(long, value_delimiter = ',')]
    continents: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config_path = Config::locate(cli.config.as_deref());
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let ctx = PipelineContext::load(&config).context("Failed to load sources")?;

    match cli.command {
        Command::Reconcile { format, out } => {
            let reconciliation = ctx.reconcile()?;
            eprintln!("✓ {}", reconciliation.report.summary());
            write_rows(&reconciliation.rows, format, out.as_deref())?;
        }
        Command::Continents { filter, format, out } => {
            let filter = filter.resolve(&ctx)?;
            let summary = ctx.by_continent_year(&filter)?;
            if summary.is_empty() {
                eprintln!("No data for this filter");
            }
            write_rows(&summary, format, out.as_deref())?;
        }
        Command::Top { filter, n, format, out } => {
            let filter = filter.resolve(&ctx)?;
            let ranking = ctx.top_countries(&filter, n)?;
            write_rows(&ranking, format, out.as_deref())?;
        }
        Command::Geo { from, to, all_years, fill, out } => {
            let years = resolve_years(&ctx, from, to, all_years)?;
            let features = ctx.geo_features(years)?;
            let collection = to_feature_collection(&features, fill);
            let mut writer = open_output(out.as_deref())?;
            serde_json::to_writer(&mut writer, &collection)?;
            writeln!(writer)?;
        }
        Command::Years => {
            let bounds = ctx.year_bounds()?;
            let default = ctx.default_years()?;
            let output = serde_json::json!({
                "bounds": bounds,
                "default": default,
                "continents": ctx.continents()?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Quality { json } => {
            let report = ctx.quality();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_quality(&report);
            }
            if report.has_critical_issues() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

impl FilterArgs {
    fn resolve(&self, ctx: &PipelineContext) -> Result<Filter> {
        let mut filter = Filter::new();
        if let Some(gender) = self.gender {
            filter = filter.with_gender(gender);
        }
        if let Some(years) = resolve_years(ctx, self.from, self.to, self.all_years)? {
            filter = filter.with_years(years);
        }
        if !self.continents.is_empty() {
            filter = filter.with_continents(self.continents.iter().map(|c| c.trim().to_string()));
        }
        Ok(filter)
    }
}

/// Explicit bounds win; otherwise the configured default range unless
/// `all_years` is set.
fn resolve_years(
    ctx: &PipelineContext,
    from: Option<i32>,
    to: Option<i32>,
    all_years: bool,
) -> Result<Option<YearRange>> {
    if from.is_none() && to.is_none() {
        if all_years {
            return Ok(None);
        }
        return Ok(ctx.default_years()?);
    }

    let bounds = ctx.year_bounds()?;
    let from = from.or(bounds.map(|b| b.from)).unwrap_or(i32::MIN);
    let to = to.or(bounds.map(|b| b.to)).unwrap_or(i32::MAX);
    Ok(Some(YearRange::new(from, to)))
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

fn write_rows<T: Serialize>(rows: &[T], format: Format, out: Option<&Path>) -> Result<()> {
    let mut writer = open_output(out)?;
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut writer, rows)?;
            writeln!(writer)?;
        }
        Format::Csv => {
            let mut csv_writer = csv::Writer::from_writer(writer);
            for row in rows {
                csv_writer.serialize(row)?;
            }
            csv_writer.flush()?;
        }
    }
    Ok(())
}

fn print_quality(report: &demography::QualityReport) {
    println!("📋 {}", report.summary());
    for issue in &report.issues {
        let marker = match issue.severity {
            Severity::Critical => "❌",
            Severity::Warning => "⚠️ ",
            Severity::Info => "ℹ️ ",
        };
        println!(
            "{} [{}] {}: {} ({} affected; e.g. {})",
            marker,
            issue.source.name(),
            issue.rule,
            issue.message,
            issue.count,
            issue.examples.join(", ")
        );
    }
}
