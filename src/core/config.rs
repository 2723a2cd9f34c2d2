//! Analysis configuration for forest-loss
//!
//! Dataset identifiers, grid and budget parameters, and the reporting unit.
//! Every field has a default matching the Hansen global forest change product,
//! and the whole struct can be loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{Error, Result};

/// Reference datasets consumed from the raster backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Vector boundary collection used to resolve country names
    pub boundaries: String,

    /// Property of a boundary feature holding the country name
    pub name_property: String,

    /// Annual change raster
    pub change_raster: String,

    pub loss_band: String,
    pub loss_year_band: String,
    pub tree_cover_band: String,

    /// Forest presence collection restricting loss accounting
    pub forest_mask: String,

    pub forest_mask_band: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            boundaries: "USDOS/LSIB_SIMPLE/2017".to_string(),
            name_property: "country_na".to_string(),
            change_raster: "UMD/hansen/global_forest_change_2022_v1_10".to_string(),
            loss_band: "loss".to_string(),
            loss_year_band: "lossyear".to_string(),
            tree_cover_band: "treecover2000".to_string(),
            forest_mask: "UMD/GLAD/PRIMARY_HUMID_TROPICAL_FORESTS/v1".to_string(),
            forest_mask_band: "Primary_HT_forests".to_string(),
        }
    }
}

/// How the backend picks the ground-sample distance for a reduction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ScalePolicy {
    /// Fixed ground-sample distance in metres; over-budget cells fail
    Explicit { scale_m: f64 },
    /// Backend may coarsen the scale until the cell fits the pixel budget
    BestEffort,
}

impl ScalePolicy {
    /// Human-readable label carried alongside every reported number
    pub fn label(&self) -> String {
        match self {
            ScalePolicy::Explicit { scale_m } => format!("{scale_m} m"),
            ScalePolicy::BestEffort => "Best Effort".to_string(),
        }
    }

    /// Whether numbers produced under this policy may be approximate
    pub fn is_approximate(&self) -> bool {
        matches!(self, ScalePolicy::BestEffort)
    }
}

impl Default for ScalePolicy {
    fn default() -> Self {
        ScalePolicy::Explicit { scale_m: 30.0 }
    }
}

/// Reporting unit for loss areas. The backend always sums square metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    SquareMeters,
    Hectares,
    /// Thousands of hectares: m² / 1e4 / 1e3
    #[default]
    Kilohectares,
}

impl AreaUnit {
    /// Conversion chain from square metres into this unit
    pub fn factor(&self) -> f64 {
        match self {
            AreaUnit::SquareMeters => 1.0,
            AreaUnit::Hectares => 1.0 / 1e4,
            AreaUnit::Kilohectares => 1.0 / 1e4 / 1e3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AreaUnit::SquareMeters => "m²",
            AreaUnit::Hectares => "ha",
            AreaUnit::Kilohectares => "Kha",
        }
    }

    /// Parse the short names accepted on the command line
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "m2" | "sqm" => Ok(AreaUnit::SquareMeters),
            "ha" | "hectares" => Ok(AreaUnit::Hectares),
            "kha" | "kilohectares" => Ok(AreaUnit::Kilohectares),
            other => Err(Error::InvalidInput(format!(
                "unknown area unit '{other}' (expected m2, ha or kha)"
            ))),
        }
    }
}

/// Inclusive range of absolute years to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub from: i32,
    pub to: i32,
}

impl YearRange {
    /// Build a range, rejecting years before the epoch and inverted bounds
    pub fn new(from: i32, to: i32, epoch_year: i32) -> Result<Self> {
        if from < epoch_year {
            return Err(Error::InvalidInput(format!(
                "first year {from} is before the dataset epoch {epoch_year}"
            )));
        }
        if to < from {
            return Err(Error::InvalidInput(format!(
                "year range is inverted: {from} > {to}"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.from..=self.to
    }

    pub fn len(&self) -> usize {
        (self.to - self.from + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

/// Full configuration for one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub datasets: DatasetConfig,

    /// Year encoded by loss-year offset 0; offset 1 is the year after
    pub epoch_year: i32,

    /// Default first reported year
    pub first_year: i32,

    /// Default last reported year (last year present in the change raster)
    pub last_year: i32,

    /// Edge length of a grid cell in region projection units (degrees)
    pub cell_size: f64,

    /// Fixed error tolerance for clipping cells to the region boundary
    pub clip_tolerance: f64,

    /// Refuse to tile regions that would need more cells than this
    pub max_cells: usize,

    pub scale_policy: ScalePolicy,

    /// Maximum pixels the backend may touch per reduction
    pub max_pixels: u64,

    /// Concurrent reductions in flight; further cells queue
    pub max_concurrency: usize,

    /// Stop issuing reductions after this many calls
    pub request_budget: Option<usize>,

    /// Abandon outstanding cells after this many seconds
    pub deadline_secs: Option<u64>,

    pub unit: AreaUnit,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            datasets: DatasetConfig::default(),
            epoch_year: 2000,
            first_year: 2001,
            last_year: 2022,
            cell_size: 1.0,
            clip_tolerance: 1e-6,
            max_cells: 20_000,
            scale_policy: ScalePolicy::default(),
            max_pixels: 1_000_000_000,
            max_concurrency: default_concurrency(),
            request_budget: None,
            deadline_secs: None,
            unit: AreaUnit::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load a configuration from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(text)
            .map_err(|e| Error::InvalidInput(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !(self.cell_size > 0.0) {
            return Err(Error::InvalidInput(format!(
                "cell_size must be positive, got {}",
                self.cell_size
            )));
        }
        if !(self.clip_tolerance >= 0.0) || self.clip_tolerance >= self.cell_size {
            return Err(Error::InvalidInput(format!(
                "clip_tolerance must be in [0, cell_size), got {}",
                self.clip_tolerance
            )));
        }
        if self.max_pixels == 0 {
            return Err(Error::InvalidInput("max_pixels must be positive".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidInput(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if let ScalePolicy::Explicit { scale_m } = self.scale_policy {
            if !(scale_m > 0.0) {
                return Err(Error::InvalidInput(format!(
                    "explicit scale must be positive, got {scale_m}"
                )));
            }
        }
        YearRange::new(self.first_year, self.last_year, self.epoch_year)?;
        Ok(())
    }

    /// The configured default reporting range
    pub fn default_range(&self) -> Result<YearRange> {
        YearRange::new(self.first_year, self.last_year, self.epoch_year)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Concurrent backend calls: two per core, capped at 16
fn default_concurrency() -> usize {
    std::cmp::min(16, num_cpus::get() * 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_hansen_product() {
        let config = AnalysisConfig::default();
        assert_eq!(config.epoch_year, 2000);
        assert_eq!(config.datasets.name_property, "country_na");
        assert_eq!(config.datasets.loss_year_band, "lossyear");
        assert_eq!(config.unit, AreaUnit::Kilohectares);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unit_factor_chain() {
        assert_eq!(AreaUnit::SquareMeters.factor(), 1.0);
        assert_eq!(AreaUnit::Hectares.factor(), 1e-4);
        assert!((AreaUnit::Kilohectares.factor() * 1e7 - 1.0).abs() < 1e-12);
        assert_eq!(AreaUnit::parse("KHA").unwrap(), AreaUnit::Kilohectares);
        assert!(AreaUnit::parse("acres").is_err());
    }

    #[test]
    fn test_year_range_validation() {
        assert!(YearRange::new(2001, 2022, 2000).is_ok());
        assert!(YearRange::new(2000, 2000, 2000).is_ok());
        assert!(YearRange::new(1999, 2005, 2000).is_err());
        assert!(YearRange::new(2010, 2005, 2000).is_err());

        let range = YearRange::new(2001, 2003, 2000).unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range.years().collect::<Vec<_>>(), vec![2001, 2002, 2003]);
    }

    #[test]
    fn test_scale_policy_labels() {
        assert_eq!(ScalePolicy::default().label(), "30 m");
        assert_eq!(ScalePolicy::BestEffort.label(), "Best Effort");
        assert!(ScalePolicy::BestEffort.is_approximate());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
cell_size = 2.5
max_pixels = 10000000
unit = "hectares"

[scale_policy]
policy = "best_effort"

[datasets]
boundaries = "FAO/GAUL_SIMPLIFIED_500m/2015/level0"
name_property = "ADM0_NAME"
"#
        )
        .unwrap();

        let config = AnalysisConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.cell_size, 2.5);
        assert_eq!(config.max_pixels, 10_000_000);
        assert_eq!(config.unit, AreaUnit::Hectares);
        assert_eq!(config.scale_policy, ScalePolicy::BestEffort);
        assert_eq!(config.datasets.name_property, "ADM0_NAME");
        // Untouched keys keep their defaults
        assert_eq!(config.datasets.loss_band, "loss");
        assert_eq!(config.epoch_year, 2000);
    }

    #[test]
    fn test_reject_invalid_toml_values() {
        assert!(AnalysisConfig::from_toml_str("cell_size = 0.0").is_err());
        assert!(AnalysisConfig::from_toml_str("max_concurrency = 0").is_err());
        assert!(AnalysisConfig::from_toml_str("first_year = 1990").is_err());
    }
}
