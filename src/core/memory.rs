//! In-process raster backend
//!
//! Holds a small synthetic change raster and boundary set in memory and
//! implements [`RasterBackend`] by evaluating [`LayerExpr`] per pixel. Used by
//! the test suites and the CLI `--synthetic` mode.

use async_trait::async_trait;
use geo::{BoundingRect, Contains, Intersects, MultiPolygon, Point, Rect};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::backend::{
    BoundaryFeature, BoundaryQuery, GroupSum, GroupedReduceRequest, GroupedReduceResponse,
    LayerExpr, LayerHandle, PublishLayerRequest, RasterBackend, WireGeometry,
};
use crate::core::config::ScalePolicy;
use crate::core::error::{Error, Result};

/// Row-major multi-band raster on a lon/lat grid. Row 0 is the northern edge.
#[derive(Debug, Clone)]
pub struct SyntheticRaster {
    pub width: usize,
    pub height: usize,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
    bands: HashMap<String, Vec<f64>>,
}

impl SyntheticRaster {
    pub fn new(width: usize, height: usize, bounds: Rect<f64>) -> Self {
        Self {
            width,
            height,
            min_lon: bounds.min().x,
            max_lon: bounds.max().x,
            min_lat: bounds.min().y,
            max_lat: bounds.max().y,
            bands: HashMap::new(),
        }
    }

    fn key(asset: &str, band: &str) -> String {
        format!("{asset}/{band}")
    }

    /// Fill a band with a constant value
    pub fn fill_band(&mut self, asset: &str, band: &str, value: f64) {
        self.bands
            .insert(Self::key(asset, band), vec![value; self.width * self.height]);
    }

    /// Fill a band from a function of (row, col)
    pub fn fill_band_with<F>(&mut self, asset: &str, band: &str, f: F)
    where
        F: Fn(usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(self.width * self.height);
        for row in 0..self.height {
            for col in 0..self.width {
                data.push(f(row, col));
            }
        }
        self.bands.insert(Self::key(asset, band), data);
    }

    #[inline]
    pub fn set(&mut self, asset: &str, band: &str, row: usize, col: usize, value: f64) {
        let width = self.width;
        if let Some(data) = self.bands.get_mut(&Self::key(asset, band)) {
            data[row * width + col] = value;
        }
    }

    pub fn band(&self, asset: &str, band: &str) -> Option<&[f64]> {
        self.bands.get(&Self::key(asset, band)).map(|v| v.as_slice())
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Centre of the pixel at (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> Point<f64> {
        let dx = (self.max_lon - self.min_lon) / self.width as f64;
        let dy = (self.max_lat - self.min_lat) / self.height as f64;
        Point::new(
            self.min_lon + (col as f64 + 0.5) * dx,
            self.max_lat - (row as f64 + 0.5) * dy,
        )
    }

    /// Evaluate an expression over the whole raster; `None` is no-data
    pub fn evaluate(&self, expr: &LayerExpr, pixel_area_m2: f64) -> Result<Vec<Option<f64>>> {
        let n = self.pixel_count();
        let zip = |lhs: &LayerExpr, rhs: &LayerExpr, f: &dyn Fn(f64, f64) -> f64| {
            let a = self.evaluate(lhs, pixel_area_m2)?;
            let b = self.evaluate(rhs, pixel_area_m2)?;
            Ok::<_, Error>(
                a.into_iter()
                    .zip(b)
                    .map(|(x, y)| Some(f(x?, y?)))
                    .collect::<Vec<_>>(),
            )
        };
        let truthy = |v: f64| v != 0.0;

        match expr {
            LayerExpr::Band { asset, band } => self
                .band(asset, band)
                .map(|data| data.iter().map(|v| Some(*v)).collect())
                .ok_or_else(|| Error::Backend(format!("unknown band {asset}/{band}"))),
            LayerExpr::Constant { value } => Ok(vec![Some(*value); n]),
            LayerExpr::PixelArea => Ok(vec![Some(pixel_area_m2); n]),
            LayerExpr::Compare { cmp, lhs, rhs } => {
                zip(lhs, rhs, &|a: f64, b: f64| {
                    if cmp.apply(a, b) {
                        1.0
                    } else {
                        0.0
                    }
                })
            }
            LayerExpr::And { lhs, rhs } => zip(lhs, rhs, &|a: f64, b: f64| {
                if truthy(a) && truthy(b) {
                    1.0
                } else {
                    0.0
                }
            }),
            LayerExpr::Or { lhs, rhs } => zip(lhs, rhs, &|a: f64, b: f64| {
                if truthy(a) || truthy(b) {
                    1.0
                } else {
                    0.0
                }
            }),
            LayerExpr::Multiply { lhs, rhs } => zip(lhs, rhs, &|a: f64, b: f64| a * b),
            LayerExpr::Not { input } => Ok(self
                .evaluate(input, pixel_area_m2)?
                .into_iter()
                .map(|v| v.map(|x| if truthy(x) { 0.0 } else { 1.0 }))
                .collect()),
            LayerExpr::Mask { input, mask } => {
                let values = self.evaluate(input, pixel_area_m2)?;
                let mask = self.evaluate(mask, pixel_area_m2)?;
                Ok(values
                    .into_iter()
                    .zip(mask)
                    .map(|(v, m)| match m {
                        Some(m) if truthy(m) => v,
                        _ => None,
                    })
                    .collect())
            }
        }
    }

    /// Indices of pixels whose centres fall inside `geometry`.
    ///
    /// Centres on the boundary are half-open: they count unless they lie on
    /// the east or north edge of the geometry's bounding box, so a centre on a
    /// shared grid line belongs to exactly one of the two cells.
    fn pixels_within(&self, geometry: &MultiPolygon<f64>) -> Vec<usize> {
        let Some(bounds) = geometry.bounding_rect() else {
            return Vec::new();
        };
        let max = bounds.max();
        let mut indices = Vec::new();
        for row in 0..self.height {
            for col in 0..self.width {
                let center = self.pixel_center(row, col);
                if !bounds.intersects(&center) {
                    continue;
                }
                let inside = geometry.contains(&center)
                    || (center.x() < max.x && center.y() < max.y && geometry.intersects(&center));
                if inside {
                    indices.push(row * self.width + col);
                }
            }
        }
        indices
    }
}

/// A layer published through [`RasterBackend::publish_layer`]
#[derive(Debug, Clone)]
pub struct PublishedLayer {
    pub name: String,
    pub image: LayerExpr,
    /// Evaluated values, no-data outside the clip region
    pub values: Vec<Option<f64>>,
}

/// In-memory implementation of the raster backend
pub struct MemoryBackend {
    raster: SyntheticRaster,
    boundaries: Vec<(String, String, MultiPolygon<f64>)>,
    pixel_area_m2: f64,
    native_scale_m: f64,
    available: AtomicBool,
    failing_area: Option<Rect<f64>>,
    layers: Mutex<Vec<PublishedLayer>>,
    reduce_calls: AtomicUsize,
}

impl MemoryBackend {
    /// Create a backend over `raster`; every pixel covers `pixel_area_m2`
    /// and the raster's native ground-sample distance is `native_scale_m`.
    pub fn new(raster: SyntheticRaster, pixel_area_m2: f64, native_scale_m: f64) -> Self {
        Self {
            raster,
            boundaries: Vec::new(),
            pixel_area_m2,
            native_scale_m,
            available: AtomicBool::new(true),
            failing_area: None,
            layers: Mutex::new(Vec::new()),
            reduce_calls: AtomicUsize::new(0),
        }
    }

    /// Register a boundary feature for `dataset`
    pub fn with_boundary(mut self, dataset: &str, name: &str, geometry: MultiPolygon<f64>) -> Self {
        self.boundaries
            .push((dataset.to_string(), name.to_string(), geometry));
        self
    }

    /// Fail every reduction whose geometry lies inside `area`
    pub fn with_failing_area(mut self, area: Rect<f64>) -> Self {
        self.failing_area = Some(area);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn reduce_calls(&self) -> usize {
        self.reduce_calls.load(Ordering::SeqCst)
    }

    /// Look up a layer previously published under `handle`
    pub fn layer(&self, handle: &LayerHandle) -> Option<PublishedLayer> {
        let index: usize = handle.id.strip_prefix("mem-layer-")?.parse().ok()?;
        self.layers.lock().ok()?.get(index).cloned()
    }

    /// Pixel stride needed to bring `pixels` under `max_pixels`
    fn stride_for(&self, pixels: usize, policy: ScalePolicy, max_pixels: u64) -> Result<usize> {
        let base_stride = match policy {
            ScalePolicy::Explicit { scale_m } => {
                ((scale_m / self.native_scale_m).round() as usize).max(1)
            }
            ScalePolicy::BestEffort => 1,
        };
        let sampled = |stride: usize| pixels.div_ceil(stride * stride) as u64;

        if sampled(base_stride) <= max_pixels {
            return Ok(base_stride);
        }
        match policy {
            ScalePolicy::Explicit { .. } => Err(Error::CapacityExceeded(format!(
                "Too many pixels in the region. Found {}, but max_pixels allows {max_pixels}",
                sampled(base_stride)
            ))),
            ScalePolicy::BestEffort => {
                let mut stride = 2;
                while sampled(stride) > max_pixels {
                    stride *= 2;
                }
                Ok(stride)
            }
        }
    }
}

#[async_trait]
impl RasterBackend for MemoryBackend {
    async fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BackendUnavailable(
                "in-memory backend switched off".to_string(),
            ))
        }
    }

    async fn lookup_boundaries(&self, query: &BoundaryQuery) -> Result<Vec<BoundaryFeature>> {
        Ok(self
            .boundaries
            .iter()
            .enumerate()
            .filter(|(_, (dataset, name, _))| *dataset == query.dataset && *name == query.value)
            .map(|(i, (_, name, geometry))| BoundaryFeature {
                id: format!("feature-{i}"),
                name: name.clone(),
                geometry: WireGeometry::from(geometry),
            })
            .collect())
    }

    async fn boundary_names(&self, dataset: &str, _property: &str) -> Result<Vec<String>> {
        Ok(self
            .boundaries
            .iter()
            .filter(|(d, _, _)| d == dataset)
            .map(|(_, name, _)| name.clone())
            .collect())
    }

    async fn reduce_grouped(
        &self,
        request: &GroupedReduceRequest,
    ) -> Result<GroupedReduceResponse> {
        self.reduce_calls.fetch_add(1, Ordering::SeqCst);
        let geometry = MultiPolygon::try_from(&request.geometry)?;

        if let (Some(area), Some(bounds)) = (self.failing_area, geometry.bounding_rect()) {
            if area.contains(&bounds) {
                return Err(Error::CapacityExceeded(
                    "Computation timed out for this geometry".to_string(),
                ));
            }
        }

        let pixels = self.raster.pixels_within(&geometry);
        let stride = self.stride_for(pixels.len(), request.scale_policy, request.max_pixels)?;
        let weight = (stride * stride) as f64;

        let values = self.raster.evaluate(&request.value, self.pixel_area_m2)?;
        let groups = self.raster.evaluate(&request.group, self.pixel_area_m2)?;

        let mut sums: BTreeMap<i64, f64> = BTreeMap::new();
        for idx in pixels {
            let (row, col) = (idx / self.raster.width, idx % self.raster.width);
            if row % stride != 0 || col % stride != 0 {
                continue;
            }
            if let (Some(value), Some(group)) = (values[idx], groups[idx]) {
                *sums.entry(group.round() as i64).or_insert(0.0) += value * weight;
            }
        }

        Ok(GroupedReduceResponse {
            groups: sums
                .into_iter()
                .map(|(group, sum)| GroupSum { group, sum })
                .collect(),
            scale_m: Some(match request.scale_policy {
                ScalePolicy::Explicit { scale_m } => scale_m,
                ScalePolicy::BestEffort => self.native_scale_m * stride as f64,
            }),
        })
    }

    async fn publish_layer(&self, request: &PublishLayerRequest) -> Result<LayerHandle> {
        let region = MultiPolygon::try_from(&request.region)?;
        let inside = self.raster.pixels_within(&region);
        let evaluated = self.raster.evaluate(&request.image, self.pixel_area_m2)?;

        let mut values = vec![None; self.raster.pixel_count()];
        for idx in inside {
            values[idx] = evaluated[idx];
        }

        let mut layers = self
            .layers
            .lock()
            .map_err(|_| Error::Backend("layer store poisoned".to_string()))?;
        let id = format!("mem-layer-{}", layers.len());
        layers.push(PublishedLayer {
            name: request.name.clone(),
            image: request.image.clone(),
            values,
        });

        Ok(LayerHandle {
            tile_url: Some(format!("memory://{id}/{{z}}/{{x}}/{{y}}")),
            id,
        })
    }
}
