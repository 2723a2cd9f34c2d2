//! Forest-state classifier
//!
//! Builds the three per-pixel masks for one target year: loss before the
//! target year, loss in the target year, and forest still standing. Masks are
//! [`LayerExpr`] trees evaluated by the backend; nothing here touches pixels.
//!
//! All three masks share one domain, forest presence with non-zero baseline
//! cover. Inside it every pixel is 1 in exactly one mask and 0 in the others;
//! outside it all three are no-data.

use serde::{Deserialize, Serialize};

use crate::core::backend::{LayerExpr, LayerHandle};
use crate::core::config::DatasetConfig;

/// Data citation shown next to every map built from the change raster
pub const ATTRIBUTION: &str = "Hansen, M. C., P. V. Potapov, R. Moore, M. Hancher, S. A. Turubanova, A. Tyukavina, D. Thau, S. V. Stehman, S. J. Goetz, T. R. Loveland, A. Kommareddy, A. Egorov, L. Chini, C. O. Justice, and J. R. G. Townshend. 2013. \"High-Resolution Global Maps of 21st-Century Forest Cover Change.\" Science 342 (15 November): 850–53. Data available from: earthenginepartners.appspot.com/science-2013-global-forest.";

/// State of one pixel relative to a fixed target year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelState {
    NeverForest,
    Intact,
    LostBeforeTarget,
    LostAtTarget,
}

/// Classify a single pixel from its static inputs.
///
/// Mirrors the mask expressions built by [`ForestClassifier::masks`].
pub fn classify_pixel(forest_present: bool, tree_cover: f64, loss_year: i64, year_offset: i32) -> PixelState {
    if !forest_present || tree_cover <= 0.0 {
        return PixelState::NeverForest;
    }
    let offset = i64::from(year_offset);
    if loss_year > 0 && loss_year < offset {
        PixelState::LostBeforeTarget
    } else if loss_year > 0 && loss_year == offset {
        PixelState::LostAtTarget
    } else {
        PixelState::Intact
    }
}

/// The three mask expressions for one target year
#[derive(Debug, Clone, PartialEq)]
pub struct ForestMasks {
    pub year: i32,
    pub year_offset: i32,
    pub cumulative_loss: LayerExpr,
    pub loss_this_year: LayerExpr,
    pub intact_forest: LayerExpr,
}

/// Builds classification expressions against the configured datasets
#[derive(Debug, Clone)]
pub struct ForestClassifier {
    datasets: DatasetConfig,
    epoch_year: i32,
}

impl ForestClassifier {
    pub fn new(datasets: DatasetConfig, epoch_year: i32) -> Self {
        Self {
            datasets,
            epoch_year,
        }
    }

    pub fn year_offset(&self, year: i32) -> i32 {
        year - self.epoch_year
    }

    fn change_band(&self, band: &str) -> LayerExpr {
        LayerExpr::band(&self.datasets.change_raster, band)
    }

    /// Forest presence mask alone (1 where primary forest, 0 elsewhere)
    pub fn forest_presence(&self) -> LayerExpr {
        LayerExpr::band(&self.datasets.forest_mask, &self.datasets.forest_mask_band).gt(0.0)
    }

    /// Pixels eligible for classification
    pub fn forest_domain(&self) -> LayerExpr {
        self.forest_presence()
            .and(self.change_band(&self.datasets.tree_cover_band).gt(0.0))
    }

    /// Loss-year band restricted to the forest domain
    fn loss_year(&self) -> LayerExpr {
        self.change_band(&self.datasets.loss_year_band)
            .masked_by(self.forest_domain())
    }

    /// Build the three masks for `year`.
    ///
    /// A year at or before the epoch gives an offset of zero or less, so both
    /// loss masks come out empty and every forest pixel is intact.
    pub fn masks(&self, year: i32) -> ForestMasks {
        let offset = self.year_offset(year);
        let ever_lost = self.loss_year().gt(0.0);

        let cumulative_loss = self.loss_year().lt(offset as f64).and(ever_lost.clone());
        let loss_this_year = self.loss_year().eq_value(offset as f64).and(ever_lost);
        let intact_forest = self
            .forest_domain()
            .and(cumulative_loss.clone().not())
            .and(loss_this_year.clone().not())
            .masked_by(self.forest_domain());

        ForestMasks {
            year,
            year_offset: offset,
            cumulative_loss,
            loss_this_year,
            intact_forest,
        }
    }

    /// Baseline tree cover where the forest is still intact, for display
    pub fn intact_cover(&self, masks: &ForestMasks) -> LayerExpr {
        self.change_band(&self.datasets.tree_cover_band)
            .masked_by(masks.intact_forest.clone())
    }
}

/// Published classification layers for one (country, year) request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestStateLayers {
    pub country: String,
    pub year: i32,
    pub year_offset: i32,
    pub cumulative_loss: LayerHandle,
    pub loss_this_year: LayerHandle,
    pub intact_forest: LayerHandle,
    /// Region centroid as (lat, lon) for centering a map
    pub centroid: (f64, f64),
    pub attribution: String,
}
