//! # Forest-loss CLI
//!
//! Command-line interface for the forest-loss library.
//! Prints a country's yearly tree cover loss or publishes its forest-state
//! map layers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forest_loss::{
    figure_note, map_view, render_table, AnalysisConfig, Analyzer, AreaUnit, HttpBackend,
    HttpBackendConfig, RasterBackend, RunHooks, ScalePolicy, YearRange,
};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cli;

/// Command-line interface for forest-loss
#[derive(Parser, Debug)]
#[command(name = "forest-loss")]
#[command(about = "Country-level forest loss statistics from a remote raster engine")]
#[command(long_about = "Computes yearly tree cover loss for a country and publishes forest-state map layers:
  forest-loss series Gabon                       # Loss per year, 2001-2022, in Kha
  forest-loss series Peru --from 2010 --to 2015  # Custom year range
  forest-loss series Peru --best-effort          # Let the backend coarsen the scale
  forest-loss map Gabon --year 2015              # Publish forest-state layers for 2015

Backend:
  --backend-url URL  or  FOREST_LOSS_BACKEND_URL   # Raster engine endpoint
  --token TOKEN      or  FOREST_LOSS_TOKEN         # Optional bearer token
  --synthetic                                      # Built-in demo country 'Synthland'")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the raster engine
    #[arg(long, global = true, env = "FOREST_LOSS_BACKEND_URL")]
    backend_url: Option<String>,

    /// Bearer token for the raster engine
    #[arg(long, global = true, env = "FOREST_LOSS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Use the built-in synthetic backend instead of a remote engine
    #[arg(long, global = true)]
    synthetic: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Yearly tree cover loss for a country
    Series {
        /// Country name as it appears in the boundary dataset
        country: String,

        /// First year to report (default from configuration)
        #[arg(long)]
        from: Option<i32>,

        /// Last year to report (default from configuration)
        #[arg(long)]
        to: Option<i32>,

        /// Explicit reduction scale in metres
        #[arg(long, conflicts_with = "best_effort")]
        scale: Option<f64>,

        /// Let the backend pick a coarser scale for cells over the pixel budget
        #[arg(long)]
        best_effort: bool,

        /// Maximum pixels per reduction
        #[arg(long)]
        max_pixels: Option<u64>,

        /// Grid cell size in degrees
        #[arg(long)]
        cell_size: Option<f64>,

        /// Maximum reductions in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Abandon outstanding cells after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Reporting unit: kha, ha or m2
        #[arg(long)]
        unit: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Publish forest-state map layers for a country and year
    Map {
        country: String,

        #[arg(long)]
        year: i32,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Flag overrides applied on top of the loaded configuration
#[derive(Debug, Default)]
struct Overrides {
    scale: Option<f64>,
    best_effort: bool,
    max_pixels: Option<u64>,
    cell_size: Option<f64>,
    concurrency: Option<usize>,
    deadline_secs: Option<u64>,
    unit: Option<String>,
}

fn load_config(path: Option<&PathBuf>, overrides: &Overrides) -> Result<AnalysisConfig> {
    let mut config = match path {
        Some(path) => AnalysisConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    if let Some(scale_m) = overrides.scale {
        config.scale_policy = ScalePolicy::Explicit { scale_m };
    }
    if overrides.best_effort {
        config.scale_policy = ScalePolicy::BestEffort;
    }
    if let Some(max_pixels) = overrides.max_pixels {
        config.max_pixels = max_pixels;
    }
    if let Some(cell_size) = overrides.cell_size {
        config.cell_size = cell_size;
    }
    if let Some(concurrency) = overrides.concurrency {
        config.max_concurrency = concurrency;
    }
    if overrides.deadline_secs.is_some() {
        config.deadline_secs = overrides.deadline_secs;
    }
    if let Some(unit) = &overrides.unit {
        config.unit = AreaUnit::parse(unit)?;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn make_backend(cli: &Cli, config: &AnalysisConfig) -> Result<Arc<dyn RasterBackend>> {
    if cli.synthetic {
        info!("Using synthetic backend with country '{}'", cli::demo::SYNTHETIC_COUNTRY);
        return Ok(Arc::new(cli::demo::synthetic_backend(&config.datasets)));
    }

    let base_url = cli.backend_url.clone().context(
        "no raster backend configured; pass --backend-url, set FOREST_LOSS_BACKEND_URL or use --synthetic",
    )?;
    debug!("Using raster backend at {base_url}");
    Ok(Arc::new(HttpBackend::new(HttpBackendConfig {
        base_url,
        token: cli.token.clone(),
        ..Default::default()
    })))
}

/// Cancel the run on Ctrl-C; completed cells are kept
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⚠️  Interrupted, stopping outstanding reductions");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🌲 Forest-loss v{} starting...", env!("CARGO_PKG_VERSION"));
    }

    match &cli.command {
        Command::Series {
            country,
            from,
            to,
            scale,
            best_effort,
            max_pixels,
            cell_size,
            concurrency,
            deadline_secs,
            unit,
            json,
        } => {
            let overrides = Overrides {
                scale: *scale,
                best_effort: *best_effort,
                max_pixels: *max_pixels,
                cell_size: *cell_size,
                concurrency: *concurrency,
                deadline_secs: *deadline_secs,
                unit: unit.clone(),
            };
            let config = load_config(cli.config.as_ref(), &overrides)?;
            run_series(&cli, config, country, *from, *to, *json).await
        }
        Command::Map {
            country,
            year,
            json,
        } => {
            let config = load_config(cli.config.as_ref(), &Overrides::default())?;
            run_map(&cli, config, country, *year, *json).await
        }
    }
}

async fn run_series(
    cli: &Cli,
    config: AnalysisConfig,
    country: &str,
    from: Option<i32>,
    to: Option<i32>,
    json: bool,
) -> Result<()> {
    let range = YearRange::new(
        from.unwrap_or(config.first_year),
        to.unwrap_or(config.last_year),
        config.epoch_year,
    )?;
    let backend = make_backend(cli, &config)?;
    let analyzer = Analyzer::with_config(backend, config);

    let progress = cli::ProgressManager::new(0, &format!("🌍 Reducing grid cells for {country}"));
    let hooks = RunHooks {
        cancel: Some(cancel_on_interrupt()),
        progress: Some(progress.callback()),
    };
    let result = analyzer.loss_series(country, range, &hooks).await;
    progress.finish();
    let report = result?;

    if json {
        let output = serde_json::json!({
            "report": report,
            "rows": report.chart_rows(),
            "note": figure_note(&report),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", render_table(&report));
    }

    if report.is_partial() {
        eprintln!(
            "⚠️  {} of {} grid cells missing from the series ({} failed, {} abandoned)",
            report.warning_count(),
            report.cells_total,
            report.failed_cells,
            report.abandoned_cells
        );
        for warning in &report.warnings {
            debug!("{warning}");
        }
    }

    Ok(())
}

async fn run_map(cli: &Cli, config: AnalysisConfig, country: &str, year: i32, json: bool) -> Result<()> {
    let epoch_year = config.epoch_year;
    let backend = make_backend(cli, &config)?;
    let analyzer = Analyzer::with_config(backend, config);

    let state = analyzer.forest_state(country, year).await?;
    let view = map_view(&state, epoch_year);

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Forest state in {} for {year}", state.country);
    println!("Map centre (lat, lon): {:.4}, {:.4}", view.center.0, view.center.1);
    for layer in &view.layers {
        let location = layer.handle.tile_url.as_deref().unwrap_or(&layer.handle.id);
        println!(
            "  {:<40} {} [{}..{}] {}",
            layer.name,
            location,
            layer.style.min,
            layer.style.max,
            layer.style.palette.join(" -> ")
        );
    }
    println!("{}", view.attribution);
    Ok(())
}
