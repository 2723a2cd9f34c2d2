//! # Forest-loss Library
//!
//! Country-level forest-loss statistics and forest-state map layers computed
//! against a remote raster engine that limits how many pixels a single call
//! may touch.
//!
//! ## Features
//!
//! - **Grid tiling**: large or irregular countries are split into clipped cells
//!   so that every reduction stays under the backend's pixel budget
//! - **Bounded fan-out**: cells are reduced concurrently up to a configurable
//!   limit, with deadline, cancellation and request budget
//! - **Partial-result tolerance**: a failing cell is recorded and reported as a
//!   warning instead of failing the whole series
//! - **Deterministic merge**: the year series does not depend on the order in
//!   which cells complete
//! - **Forest-state layers**: cumulative loss, loss in a year and intact forest
//!   published as map layers with styling and attribution
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = forest_loss::loss_series("https://raster.example", "Gabon", 2001, 2022).await?;
//!     print!("{}", forest_loss::render_table(&report));
//!
//!     let layers = forest_loss::forest_state("https://raster.example", "Gabon", 2015).await?;
//!     println!("Map centre: {:?}", layers.centroid);
//!     Ok(())
//! }
//! ```
//!
//! ## Custom backend and configuration
//!
//! ```rust,no_run
//! use forest_loss::{AnalysisConfig, Analyzer, HttpBackend, RunHooks, ScalePolicy, YearRange};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AnalysisConfig {
//!     scale_policy: ScalePolicy::BestEffort,
//!     cell_size: 2.0,
//!     ..Default::default()
//! };
//! let range = YearRange::new(2005, 2010, config.epoch_year)?;
//! let analyzer = Analyzer::with_config(Arc::new(HttpBackend::with_url("https://raster.example")), config);
//! let report = analyzer.loss_series("Peru", range, &RunHooks::default()).await?;
//! println!("{} cells failed", report.warning_count());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub use crate::core::backend::{
    BoundaryFeature, BoundaryQuery, Comparison, GroupSum, GroupedReduceRequest,
    GroupedReduceResponse, LayerExpr, LayerHandle, PublishLayerRequest, RasterBackend,
    WireGeometry,
};
pub use crate::core::classify::{
    classify_pixel, ForestClassifier, ForestMasks, ForestStateLayers, PixelState, ATTRIBUTION,
};
pub use crate::core::config::{AnalysisConfig, AreaUnit, DatasetConfig, ScalePolicy, YearRange};
pub use crate::core::error::{suggest_region, Error, Result};
pub use crate::core::http::{HttpBackend, HttpBackendConfig};
pub use crate::core::memory::{MemoryBackend, PublishedLayer, SyntheticRaster};
pub use crate::core::merge::{merge_tile_results, LossYear, MergedLoss};
pub use crate::core::normalize::{normalize, YearLoss, YearSeries};
pub use crate::core::pipeline::{Analyzer, RunHooks};
pub use crate::core::reducer::{
    reduce_cells, ProgressCallback, ReduceOptions, ReductionLayers, TileOutcome, TileResult,
};
pub use crate::core::region::{resolve_region, Region};
pub use crate::core::report::{
    chart_title, figure_note, map_view, render_table, ChartRow, ForestLayer, LayerDescriptor,
    LayerStyle, LossReport, MapView,
};
pub use crate::core::tiler::{GridCell, GridTiler};

// Internal modules
mod core;

fn http_analyzer(backend_url: &str) -> Analyzer {
    Analyzer::new(Arc::new(HttpBackend::with_url(backend_url)))
}

/// Yearly loss series for `country` over `[from, to]` with default settings
///
/// # Arguments
/// * `backend_url` - Base URL of the raster engine
/// * `country` - Boundary name, e.g. "Gabon"
/// * `from`, `to` - Inclusive range of absolute years
pub async fn loss_series(backend_url: &str, country: &str, from: i32, to: i32) -> Result<LossReport> {
    let analyzer = http_analyzer(backend_url);
    let range = YearRange::new(from, to, analyzer.config().epoch_year)?;
    analyzer.loss_series(country, range, &RunHooks::default()).await
}

/// Loss series with a progress callback receiving (finished cells, total cells)
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// forest_loss::loss_series_with_progress(
///     "https://raster.example",
///     "Gabon",
///     2001,
///     2022,
///     |done, total| println!("{done}/{total} cells"),
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn loss_series_with_progress<F>(
    backend_url: &str,
    country: &str,
    from: i32,
    to: i32,
    progress: F,
) -> Result<LossReport>
where
    F: Fn(u64, u64) + Send + Sync + 'static,
{
    let analyzer = http_analyzer(backend_url);
    let range = YearRange::new(from, to, analyzer.config().epoch_year)?;
    let hooks = RunHooks {
        progress: Some(Arc::new(progress)),
        ..Default::default()
    };
    analyzer.loss_series(country, range, &hooks).await
}

/// Publish the forest-state layers for `country` in `year`
pub async fn forest_state(backend_url: &str, country: &str, year: i32) -> Result<ForestStateLayers> {
    http_analyzer(backend_url).forest_state(country, year).await
}
