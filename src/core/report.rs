//! Output shapes for charts and maps
//!
//! [`LossReport`] carries the year series together with its data-quality
//! metadata. The helpers here turn reports and published layers into the rows,
//! notes and styled layer descriptors a chart or map widget consumes.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::core::backend::LayerHandle;
use crate::core::classify::ForestStateLayers;
use crate::core::config::{ScalePolicy, YearRange};
use crate::core::normalize::YearSeries;

/// Year series plus everything a consumer needs to judge its quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub country: String,
    pub range: YearRange,
    pub series: YearSeries,
    /// Policy requested for every cell
    pub scale_policy: ScalePolicy,
    /// Coarsest ground-sample distance any cell was reduced at
    pub coarsest_scale_m: Option<f64>,
    pub cells_total: usize,
    pub failed_cells: usize,
    pub abandoned_cells: usize,
    pub warnings: Vec<String>,
}

impl LossReport {
    /// Cells whose contribution is missing from the series
    pub fn warning_count(&self) -> usize {
        self.failed_cells + self.abandoned_cells
    }

    pub fn is_partial(&self) -> bool {
        self.warning_count() > 0
    }

    /// True when the numbers may have been computed at a coarser scale
    pub fn is_approximate(&self) -> bool {
        if self.scale_policy.is_approximate() {
            return true;
        }
        match (self.scale_policy, self.coarsest_scale_m) {
            (ScalePolicy::Explicit { scale_m }, Some(used)) => used > scale_m,
            _ => false,
        }
    }

    /// Scale label for chart rows; an explicit scale the backend had to
    /// coarsen is marked approximate
    pub fn scale_label(&self) -> String {
        let label = self.scale_policy.label();
        match (self.scale_policy, self.coarsest_scale_m) {
            (ScalePolicy::Explicit { scale_m }, Some(used)) if used > scale_m => {
                format!("{label} (approximate, up to {used} m)")
            }
            _ => label,
        }
    }

    pub fn chart_rows(&self) -> Vec<ChartRow> {
        let label = self.scale_label();
        self.series
            .entries
            .iter()
            .map(|entry| ChartRow {
                year: entry.year,
                loss_area: round2(entry.loss_area),
                scale_policy: label.clone(),
            })
            .collect()
    }
}

/// One bar of the loss chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRow {
    pub year: i32,
    pub loss_area: f64,
    pub scale_policy: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn chart_title(country: &str) -> String {
    format!("Tree cover loss in {country}")
}

/// Note printed under the chart naming the scale the numbers come from
pub fn figure_note(report: &LossReport) -> String {
    let mut note = format!(
        "Scale used to calculate forest loss: {}.",
        report.scale_policy.label()
    );
    if let (true, Some(scale_m)) = (report.is_approximate(), report.coarsest_scale_m) {
        let _ = write!(note, " Values are approximate (coarsest cell scale {scale_m} m).");
    }
    note
}

/// Plain-text table of the series, as printed by the CLI
pub fn render_table(report: &LossReport) -> String {
    let header = format!("Tree cover loss ({})", report.series.unit.label());
    let width = header.len().max(10);

    let mut out = String::new();
    let _ = writeln!(out, "{}", chart_title(&report.country));
    let _ = writeln!(out, "Year  {header:>width$}");
    for row in report.chart_rows() {
        let _ = writeln!(out, "{:<4}  {:>width$.2}", row.year, row.loss_area);
    }
    let _ = writeln!(out, "{}", figure_note(report));
    out
}

/// Which of the three classification layers a descriptor renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForestLayer {
    IntactForest,
    CumulativeLoss,
    LossThisYear,
}

impl ForestLayer {
    /// Map legend name for `year`
    pub fn title(&self, year: i32, epoch_year: i32) -> String {
        match self {
            ForestLayer::IntactForest => format!("Intact forest in {year}"),
            ForestLayer::CumulativeLoss => {
                format!("Cumulative forest loss, {}--{}", epoch_year + 1, year - 1)
            }
            ForestLayer::LossThisYear => format!("Forest loss in {year}"),
        }
    }

    pub fn style(&self) -> LayerStyle {
        let (max, high) = match self {
            ForestLayer::IntactForest => (100.0, "00FF00"),
            ForestLayer::CumulativeLoss => (1.0, "6495ED"),
            ForestLayer::LossThisYear => (1.0, "FF0000"),
        };
        LayerStyle {
            min: 0.0,
            max,
            palette: vec!["000000".to_string(), high.to_string()],
        }
    }
}

/// Linear colour ramp between `min` and `max`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    pub min: f64,
    pub max: f64,
    pub palette: Vec<String>,
}

/// A styled map layer ready for a tile-map widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub kind: ForestLayer,
    pub name: String,
    pub handle: LayerHandle,
    pub style: LayerStyle,
}

/// Map description: layers in drawing order, centre and attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub center: (f64, f64),
    pub layers: Vec<LayerDescriptor>,
    pub attribution: String,
}

pub fn map_view(state: &ForestStateLayers, epoch_year: i32) -> MapView {
    let layers = [
        (ForestLayer::IntactForest, &state.intact_forest),
        (ForestLayer::CumulativeLoss, &state.cumulative_loss),
        (ForestLayer::LossThisYear, &state.loss_this_year),
    ]
    .into_iter()
    .map(|(kind, handle)| LayerDescriptor {
        kind,
        name: kind.title(state.year, epoch_year),
        handle: handle.clone(),
        style: kind.style(),
    })
    .collect();

    MapView {
        center: state.centroid,
        layers,
        attribution: state.attribution.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::ATTRIBUTION;
    use crate::core::config::AreaUnit;
    use crate::core::normalize::YearLoss;

    fn report(policy: ScalePolicy, coarsest: Option<f64>) -> LossReport {
        LossReport {
            country: "Gabon".to_string(),
            range: YearRange::new(2001, 2002, 2000).unwrap(),
            series: YearSeries {
                unit: AreaUnit::Kilohectares,
                entries: vec![
                    YearLoss {
                        year: 2001,
                        loss_area: 1.23456,
                    },
                    YearLoss {
                        year: 2002,
                        loss_area: 0.0,
                    },
                ],
            },
            scale_policy: policy,
            coarsest_scale_m: coarsest,
            cells_total: 3,
            failed_cells: 1,
            abandoned_cells: 0,
            warnings: vec![],
        }
    }

    #[test]
    fn test_chart_rows_round_and_carry_policy() {
        let rows = report(ScalePolicy::default(), Some(30.0)).chart_rows();
        assert_eq!(rows[0].loss_area, 1.23);
        assert_eq!(rows[0].scale_policy, "30 m");
        assert_eq!(rows[1].year, 2002);
    }

    #[test]
    fn test_coarsened_explicit_scale_marks_rows_approximate() {
        let report = report(ScalePolicy::default(), Some(60.0));
        assert!(report.is_approximate());
        let rows = report.chart_rows();
        assert!(rows
            .iter()
            .all(|row| row.scale_policy == "30 m (approximate, up to 60 m)"));
        assert!(figure_note(&report).ends_with("Values are approximate (coarsest cell scale 60 m)."));

        let rows = self::report(ScalePolicy::BestEffort, Some(120.0)).chart_rows();
        assert_eq!(rows[0].scale_policy, "Best Effort");
    }

    #[test]
    fn test_table_and_note() {
        let report = report(ScalePolicy::default(), Some(30.0));
        let table = render_table(&report);
        assert!(table.starts_with("Tree cover loss in Gabon\n"));
        assert!(table.contains("Tree cover loss (Kha)"));
        assert!(table.contains("2001"));
        assert!(table.contains("1.23"));
        assert!(table.ends_with("Scale used to calculate forest loss: 30 m.\n"));
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn test_best_effort_is_flagged_approximate() {
        let report = report(ScalePolicy::BestEffort, Some(120.0));
        assert!(report.is_approximate());
        assert_eq!(
            figure_note(&report),
            "Scale used to calculate forest loss: Best Effort. Values are approximate (coarsest cell scale 120 m)."
        );
        assert!(!self::report(ScalePolicy::default(), Some(30.0)).is_approximate());
    }

    #[test]
    fn test_map_view_styles() {
        let handle = |id: &str| LayerHandle {
            id: id.to_string(),
            tile_url: None,
        };
        let state = ForestStateLayers {
            country: "Gabon".to_string(),
            year: 2010,
            year_offset: 10,
            cumulative_loss: handle("c"),
            loss_this_year: handle("t"),
            intact_forest: handle("i"),
            centroid: (-0.6, 11.6),
            attribution: ATTRIBUTION.to_string(),
        };
        let view = map_view(&state, 2000);

        assert_eq!(view.center, (-0.6, 11.6));
        let names: Vec<&str> = view.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Intact forest in 2010",
                "Cumulative forest loss, 2001--2009",
                "Forest loss in 2010"
            ]
        );
        assert_eq!(view.layers[0].handle.id, "i");
        assert_eq!(view.layers[0].style.max, 100.0);
        assert_eq!(view.layers[1].style.palette, vec!["000000", "6495ED"]);
        assert_eq!(view.layers[2].style.palette[1], "FF0000");
        assert_eq!(view.attribution, ATTRIBUTION);
    }
}
