//! Region resolution for forest-loss
//!
//! Resolves a country name to exactly one boundary polygon. Zero or several
//! matches are a [`Error::Resolution`], never an empty result.

use geo::{Area, Centroid, MultiPolygon};
use log::{debug, warn};

use crate::core::backend::{BoundaryQuery, RasterBackend};
use crate::core::config::DatasetConfig;
use crate::core::error::{suggest_region, Error, Result};

/// Boundary of the country under analysis
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub feature_id: String,
    pub geometry: MultiPolygon<f64>,
}

impl Region {
    /// Centroid as (lat, lon), the order map widgets expect for centering
    pub fn centroid_lat_lon(&self) -> Option<(f64, f64)> {
        self.geometry.centroid().map(|p| (p.y(), p.x()))
    }

    /// Planar area in projection units (square degrees)
    pub fn planar_area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Resolve `name` against the boundary dataset.
///
/// On a zero match the backend's name list is consulted for a suggestion; a
/// failure to fetch that list does not mask the resolution error.
pub async fn resolve_region<B>(backend: &B, datasets: &DatasetConfig, name: &str) -> Result<Region>
where
    B: RasterBackend + ?Sized,
{
    let query = BoundaryQuery {
        dataset: datasets.boundaries.clone(),
        property: datasets.name_property.clone(),
        value: name.to_string(),
    };

    let mut features = backend.lookup_boundaries(&query).await?;
    debug!("Boundary lookup for '{name}' returned {} features", features.len());

    match features.len() {
        1 => {
            let feature = features.remove(0);
            let geometry = MultiPolygon::try_from(&feature.geometry)?;
            if geometry.0.is_empty() {
                return Err(Error::Backend(format!(
                    "boundary feature {} for '{name}' has no polygons",
                    feature.id
                )));
            }
            Ok(Region {
                name: feature.name,
                feature_id: feature.id,
                geometry,
            })
        }
        0 => {
            let suggestion = match backend
                .boundary_names(&datasets.boundaries, &datasets.name_property)
                .await
            {
                Ok(names) => suggest_region(name, &names),
                Err(e) => {
                    warn!("Could not fetch boundary names for suggestions: {e}");
                    None
                }
            };
            Err(Error::Resolution {
                name: name.to_string(),
                matches: 0,
                suggestion,
            })
        }
        n => Err(Error::Resolution {
            name: name.to_string(),
            matches: n,
            suggestion: None,
        }),
    }
}
