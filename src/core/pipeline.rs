//! Analysis orchestration
//!
//! [`Analyzer`] runs the loss pipeline (resolve, tile, reduce, merge,
//! normalize) and the forest-state classification against one backend.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::backend::{LayerExpr, LayerHandle, PublishLayerRequest, RasterBackend, WireGeometry};
use crate::core::classify::{ForestClassifier, ForestStateLayers, ATTRIBUTION};
use crate::core::config::{AnalysisConfig, YearRange};
use crate::core::error::{Error, Result};
use crate::core::merge::merge_tile_results;
use crate::core::normalize::normalize;
use crate::core::reducer::{reduce_cells, ProgressCallback, ReduceOptions, ReductionLayers, TileOutcome};
use crate::core::region::{resolve_region, Region};
use crate::core::report::{ForestLayer, LossReport};
use crate::core::tiler::GridTiler;

/// Per-call hooks that do not belong in the configuration
#[derive(Clone, Default)]
pub struct RunHooks {
    pub cancel: Option<CancellationToken>,
    pub progress: Option<ProgressCallback>,
}

/// Forest-loss analyzer bound to one raster backend
pub struct Analyzer {
    backend: Arc<dyn RasterBackend>,
    config: AnalysisConfig,
}

impl Analyzer {
    /// Create an analyzer with default configuration
    pub fn new(backend: Arc<dyn RasterBackend>) -> Self {
        Self::with_config(backend, AnalysisConfig::default())
    }

    pub fn with_config(backend: Arc<dyn RasterBackend>, config: AnalysisConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn classifier(&self) -> ForestClassifier {
        ForestClassifier::new(self.config.datasets.clone(), self.config.epoch_year)
    }

    /// Loss area times the loss flag, grouped by loss year, both restricted
    /// to forest presence
    fn loss_layers(&self) -> ReductionLayers {
        let datasets = &self.config.datasets;
        let presence = self.classifier().forest_presence();
        ReductionLayers {
            value: LayerExpr::band(&datasets.change_raster, &datasets.loss_band)
                .multiply(LayerExpr::PixelArea)
                .masked_by(presence.clone()),
            group: LayerExpr::band(&datasets.change_raster, &datasets.loss_year_band)
                .masked_by(presence),
        }
    }

    fn reduce_options(&self, hooks: &RunHooks) -> ReduceOptions {
        ReduceOptions {
            scale_policy: self.config.scale_policy,
            max_pixels: self.config.max_pixels,
            max_concurrency: self.config.max_concurrency,
            request_budget: self.config.request_budget,
            deadline: self.config.deadline(),
            cancel: hooks.cancel.clone(),
            progress: hooks.progress.clone(),
        }
    }

    /// Probe the backend, then resolve `country` to its boundary
    async fn prepare(&self, country: &str) -> Result<Region> {
        self.backend.check_available().await?;
        resolve_region(self.backend.as_ref(), &self.config.datasets, country).await
    }

    /// Compute the yearly loss series for `country` over `range`.
    ///
    /// Cells that fail or are abandoned are left out of the sums and counted
    /// in the report's warnings. If no cell reports any data at all the
    /// request fails with [`Error::EmptySeries`].
    pub async fn loss_series(&self, country: &str, range: YearRange, hooks: &RunHooks) -> Result<LossReport> {
        if range.from < self.config.epoch_year || range.to < range.from {
            return Err(Error::InvalidInput(format!(
                "year range {}-{} is not valid for epoch {}",
                range.from, range.to, self.config.epoch_year
            )));
        }

        let region = self.prepare(country).await?;
        info!("Resolved '{}' to boundary feature {}", region.name, region.feature_id);

        let tiler = GridTiler::new(self.config.cell_size, self.config.clip_tolerance, self.config.max_cells)?;
        let cells = tiler.tile(&region)?;
        info!("Reducing {} grid cells for '{}'", cells.len(), region.name);

        let options = self.reduce_options(hooks);
        let results = reduce_cells(self.backend.as_ref(), &cells, &self.loss_layers(), &options).await;

        let mut warnings = Vec::new();
        let mut failed_cells = 0;
        let mut abandoned_cells = 0;
        let mut coarsest_scale_m: Option<f64> = None;
        for result in &results {
            match &result.outcome {
                TileOutcome::Reported { scale_m, .. } => {
                    if let Some(scale) = scale_m {
                        coarsest_scale_m = Some(coarsest_scale_m.map_or(*scale, |c| c.max(*scale)));
                    }
                }
                TileOutcome::Failed { reason } => {
                    failed_cells += 1;
                    warnings.push(format!("cell {} failed: {reason}", result.cell_id));
                }
                TileOutcome::Abandoned => abandoned_cells += 1,
            }
        }
        if abandoned_cells > 0 {
            warnings.push(format!("{abandoned_cells} cells abandoned before completion"));
        }

        let merged = merge_tile_results(&results);
        if merged.is_empty() {
            let cancelled = hooks.cancel.as_ref().is_some_and(|c| c.is_cancelled());
            if cancelled || (!cells.is_empty() && abandoned_cells == cells.len()) {
                return Err(Error::Cancelled(format!(
                    "no grid cell for '{}' completed before the run was stopped",
                    region.name
                )));
            }
            return Err(Error::EmptySeries {
                country: region.name,
                cells: cells.len(),
            });
        }
        if merged.invalid_groups > 0 {
            warnings.push(format!("{} invalid loss-year groups ignored", merged.invalid_groups));
        }
        debug!("Area never flagged as lost: {} m²", merged.never_lost_area);

        let series = normalize(&merged, range, self.config.epoch_year, self.config.unit);

        if failed_cells + abandoned_cells > 0 {
            warn!(
                "⚠️  Series for '{}' is partial: {failed_cells} failed and {abandoned_cells} abandoned of {} cells",
                region.name,
                cells.len()
            );
        }
        info!(
            "Loss series for '{}' complete: {} years, total {:.3} {}",
            region.name,
            series.len(),
            series.total(),
            series.unit.label()
        );

        Ok(LossReport {
            country: region.name,
            range,
            series,
            scale_policy: self.config.scale_policy,
            coarsest_scale_m,
            cells_total: cells.len(),
            failed_cells,
            abandoned_cells,
            warnings,
        })
    }

    async fn publish(&self, name: String, image: LayerExpr, region: &WireGeometry) -> Result<LayerHandle> {
        let request = PublishLayerRequest {
            name,
            image,
            region: region.clone(),
        };
        self.backend.publish_layer(&request).await
    }

    /// Publish the three forest-state layers for `country` in `year`
    pub async fn forest_state(&self, country: &str, year: i32) -> Result<ForestStateLayers> {
        let region = self.prepare(country).await?;
        let centroid = region.centroid_lat_lon().ok_or_else(|| {
            Error::Backend(format!("boundary of '{}' has no centroid", region.name))
        })?;

        let classifier = self.classifier();
        let masks = classifier.masks(year);
        let epoch = self.config.epoch_year;
        let clip = WireGeometry::from(&region.geometry);
        info!(
            "Publishing forest-state layers for '{}' in {year} (offset {})",
            region.name, masks.year_offset
        );

        let cumulative = masks
            .cumulative_loss
            .clone()
            .masked_by(masks.cumulative_loss.clone());
        let this_year = masks
            .loss_this_year
            .clone()
            .masked_by(masks.loss_this_year.clone());

        let cumulative_loss = self
            .publish(ForestLayer::CumulativeLoss.title(year, epoch), cumulative, &clip)
            .await?;
        let loss_this_year = self
            .publish(ForestLayer::LossThisYear.title(year, epoch), this_year, &clip)
            .await?;
        let intact_forest = self
            .publish(
                ForestLayer::IntactForest.title(year, epoch),
                classifier.intact_cover(&masks),
                &clip,
            )
            .await?;

        Ok(ForestStateLayers {
            country: region.name,
            year,
            year_offset: masks.year_offset,
            cumulative_loss,
            loss_this_year,
            intact_forest,
            centroid,
            attribution: ATTRIBUTION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AreaUnit, DatasetConfig, ScalePolicy};
    use crate::core::memory::{MemoryBackend, SyntheticRaster};
    use geo::{coord, polygon, MultiPolygon, Rect};

    /// Two one-degree cells: A (west) has 10 m² lost in 2001, B (east) has
    /// 5 m² lost in 2001 and 2 m² lost in 2003.
    fn two_cell_backend(forest: f64) -> MemoryBackend {
        let datasets = DatasetConfig::default();
        let bounds = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2.0, y: 1.0 });
        let mut raster = SyntheticRaster::new(20, 1, bounds);
        let loss_year = |col: usize| match col {
            0..=14 => 1.0,
            15 | 16 => 3.0,
            _ => 0.0,
        };
        raster.fill_band_with(&datasets.change_raster, &datasets.loss_year_band, |_, c| loss_year(c));
        raster.fill_band_with(&datasets.change_raster, &datasets.loss_band, |_, c| {
            if loss_year(c) > 0.0 {
                1.0
            } else {
                0.0
            }
        });
        raster.fill_band(&datasets.change_raster, &datasets.tree_cover_band, 80.0);
        raster.fill_band(&datasets.forest_mask, &datasets.forest_mask_band, forest);

        let country = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 0.0, y: 1.0)];
        MemoryBackend::new(raster, 1.0, 30.0).with_boundary(
            &datasets.boundaries,
            "Testland",
            MultiPolygon(vec![country]),
        )
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            unit: AreaUnit::SquareMeters,
            max_concurrency: 2,
            ..Default::default()
        }
    }

    fn range() -> YearRange {
        YearRange::new(2001, 2003, 2000).unwrap()
    }

    fn pairs(report: &LossReport) -> Vec<(i32, f64)> {
        report
            .series
            .entries
            .iter()
            .map(|e| (e.year, e.loss_area))
            .collect()
    }

    #[tokio::test]
    async fn test_two_cell_series() {
        let backend = Arc::new(two_cell_backend(1.0));
        let analyzer = Analyzer::with_config(backend.clone(), config());
        let report = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap();

        assert_eq!(pairs(&report), vec![(2001, 15.0), (2002, 0.0), (2003, 2.0)]);
        assert_eq!(report.cells_total, 2);
        assert_eq!(report.warning_count(), 0);
        assert_eq!(report.coarsest_scale_m, Some(30.0));
        assert_eq!(backend.reduce_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_cell_yields_partial_series() {
        let failing = Rect::new(coord! { x: 0.9, y: -0.1 }, coord! { x: 2.1, y: 1.1 });
        let backend = Arc::new(two_cell_backend(1.0).with_failing_area(failing));
        let analyzer = Analyzer::with_config(backend, config());
        let report = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap();

        assert_eq!(pairs(&report), vec![(2001, 10.0), (2002, 0.0), (2003, 0.0)]);
        assert_eq!(report.failed_cells, 1);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_no_data_anywhere_is_empty_series_error() {
        let analyzer = Analyzer::with_config(Arc::new(two_cell_backend(0.0)), config());
        let err = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptySeries { cells: 2, .. }));
    }

    #[tokio::test]
    async fn test_all_cells_failing_is_empty_series_error() {
        let everywhere = Rect::new(coord! { x: -1.0, y: -1.0 }, coord! { x: 3.0, y: 2.0 });
        let backend = Arc::new(two_cell_backend(1.0).with_failing_area(everywhere));
        let analyzer = Analyzer::with_config(backend, config());
        let err = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptySeries { .. }));
    }

    #[tokio::test]
    async fn test_repeated_runs_are_bit_identical() {
        let analyzer = Analyzer::with_config(Arc::new(two_cell_backend(1.0)), config());
        let first = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap();
        let second = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap();

        assert_eq!(first, second);
        for (a, b) in first.series.entries.iter().zip(&second.series.entries) {
            assert_eq!(a.loss_area.to_bits(), b.loss_area.to_bits());
        }
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_before_any_reduction() {
        let backend = Arc::new(two_cell_backend(1.0));
        backend.set_available(false);
        let analyzer = Analyzer::with_config(backend.clone(), config());

        let err = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert_eq!(backend.reduce_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_country_is_resolution_error() {
        let analyzer = Analyzer::with_config(Arc::new(two_cell_backend(1.0)), config());
        let err = analyzer
            .loss_series("Testlnd", range(), &RunHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { matches: 0, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let analyzer = Analyzer::with_config(Arc::new(two_cell_backend(1.0)), config());
        let token = CancellationToken::new();
        token.cancel();
        let hooks = RunHooks {
            cancel: Some(token),
            progress: None,
        };
        let err = analyzer.loss_series("Testland", range(), &hooks).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_best_effort_reports_coarser_scale() {
        let config = AnalysisConfig {
            scale_policy: ScalePolicy::BestEffort,
            max_pixels: 4,
            ..config()
        };
        let analyzer = Analyzer::with_config(Arc::new(two_cell_backend(1.0)), config);
        let report = analyzer
            .loss_series("Testland", range(), &RunHooks::default())
            .await
            .unwrap();
        assert_eq!(report.coarsest_scale_m, Some(60.0));
        assert!(report.is_approximate());
    }

    #[tokio::test]
    async fn test_forest_state_publishes_three_layers() {
        let backend = Arc::new(two_cell_backend(1.0));
        let analyzer = Analyzer::with_config(backend.clone(), config());
        let state = analyzer.forest_state("Testland", 2001).await.unwrap();

        assert_eq!(state.year_offset, 1);
        assert_eq!(state.centroid, (0.5, 1.0));
        assert_eq!(state.attribution, ATTRIBUTION);

        let cumulative = backend.layer(&state.cumulative_loss).unwrap();
        let this_year = backend.layer(&state.loss_this_year).unwrap();
        let intact = backend.layer(&state.intact_forest).unwrap();

        assert_eq!(cumulative.name, "Cumulative forest loss, 2001--2000");
        assert_eq!(this_year.name, "Forest loss in 2001");
        assert_eq!(intact.name, "Intact forest in 2001");

        assert_eq!(cumulative.values.iter().flatten().count(), 0);
        assert_eq!(this_year.values.iter().flatten().count(), 15);
        // Columns with loss year 3 or no loss are still standing in 2001
        assert_eq!(intact.values.iter().flatten().count(), 5);
        assert!(intact.values.iter().flatten().all(|v| *v == 80.0));
    }
}
