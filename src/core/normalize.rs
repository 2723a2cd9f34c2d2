//! Unit normalizer
//!
//! Turns offset-keyed square-metre totals into an absolute-year series in the
//! reporting unit, with exactly one entry per year of the requested range.

use serde::{Deserialize, Serialize};

use crate::core::config::{AreaUnit, YearRange};
use crate::core::merge::MergedLoss;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearLoss {
    pub year: i32,
    pub loss_area: f64,
}

/// Gap-free loss series, ascending by year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearSeries {
    pub unit: AreaUnit,
    pub entries: Vec<YearLoss>,
}

impl YearSeries {
    pub fn years(&self) -> Vec<i32> {
        self.entries.iter().map(|e| e.year).collect()
    }

    /// Loss recorded for `year`, if the year is in the series
    pub fn get(&self, year: i32) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.year == year)
            .map(|e| e.loss_area)
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.loss_area).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map offsets to years (`epoch_year + offset`) and convert to `unit`.
///
/// Every year in `range` is present; a year with no merged data reads 0. The
/// epoch year itself has no offset of its own and always reads 0.
pub fn normalize(merged: &MergedLoss, range: YearRange, epoch_year: i32, unit: AreaUnit) -> YearSeries {
    let factor = unit.factor();
    let entries = range
        .years()
        .map(|year| {
            let offset = year - epoch_year;
            let area_m2 = u16::try_from(offset)
                .ok()
                .filter(|offset| *offset > 0)
                .and_then(|offset| merged.by_offset.get(&offset).copied())
                .unwrap_or(0.0);
            YearLoss {
                year,
                loss_area: area_m2 * factor,
            }
        })
        .collect();

    YearSeries { unit, entries }
}
