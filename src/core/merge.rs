//! Series merger
//!
//! Collates ragged per-tile group records into one mapping from loss-year
//! offset to total area. Tiles report arbitrary subsets of years, so records
//! are keyed by offset rather than aligned by position.

use log::warn;
use std::collections::BTreeMap;

use crate::core::reducer::TileResult;

/// A raw group value from the `lossyear` band with its overloading made explicit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LossYear {
    /// Offset 0: the pixel was never flagged as lost
    NeverLost,
    /// Offset from the epoch year, starting at 1
    Offset(u16),
}

impl LossYear {
    /// Interpret a raw group key; negative or out-of-range keys are invalid
    pub fn from_group(group: i64) -> Option<Self> {
        match group {
            0 => Some(LossYear::NeverLost),
            g if g > 0 && g <= u16::MAX as i64 => Some(LossYear::Offset(g as u16)),
            _ => None,
        }
    }
}

/// Merged loss area per offset, in the backend's native unit (m²)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedLoss {
    pub by_offset: BTreeMap<u16, f64>,
    /// Area reported under offset 0; the complement class, never a year
    pub never_lost_area: f64,
    /// Cells that answered with at least one group record
    pub reporting_cells: usize,
    /// Group records dropped because their key was not a valid offset
    pub invalid_groups: usize,
}

impl MergedLoss {
    /// True when no cell returned any group record at all
    pub fn is_empty(&self) -> bool {
        self.reporting_cells == 0
    }
}

/// Sum contributions in a canonical order so the total does not depend on
/// the order tiles arrived in
fn canonical_sum(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    values.into_iter().sum()
}

/// Merge every tile's group records by offset.
///
/// Failed and abandoned tiles contribute nothing; a tile missing an offset
/// contributes zero to it.
pub fn merge_tile_results(results: &[TileResult]) -> MergedLoss {
    let mut contributions: BTreeMap<LossYear, Vec<f64>> = BTreeMap::new();
    let mut merged = MergedLoss::default();

    for result in results {
        let groups = result.groups();
        if !groups.is_empty() {
            merged.reporting_cells += 1;
        }
        for group in groups {
            match LossYear::from_group(group.group) {
                Some(key) => contributions.entry(key).or_default().push(group.sum),
                None => {
                    warn!(
                        "⚠️  Cell {} reported invalid loss-year group {}; ignoring",
                        result.cell_id, group.group
                    );
                    merged.invalid_groups += 1;
                }
            }
        }
    }

    for (key, values) in contributions {
        let total = canonical_sum(values);
        match key {
            LossYear::NeverLost => merged.never_lost_area = total,
            LossYear::Offset(offset) => {
                merged.by_offset.insert(offset, total);
            }
        }
    }

    merged
}
