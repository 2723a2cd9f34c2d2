//! Raster backend capability interface
//!
//! The remote raster engine is a black box exposing boundary lookup, grouped-sum
//! reduction over a geometry, and mask algebra published as map layers. Each
//! engine gets one implementation of [`RasterBackend`]; everything above this
//! module only speaks these types.

use async_trait::async_trait;
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::core::config::ScalePolicy;
use crate::core::error::{Error, Result};

/// Comparison operators available in the mask algebra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl Comparison {
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
        }
    }
}

/// Per-pixel raster expression evaluated by the backend.
///
/// Every operator propagates no-data: if any operand is masked at a pixel,
/// so is the result. Booleans are encoded as 1.0 / 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LayerExpr {
    /// One band of a raster asset (collections are mosaicked by the backend)
    Band { asset: String, band: String },
    Constant { value: f64 },
    /// Area of each pixel in square metres at the evaluation scale
    PixelArea,
    Compare {
        cmp: Comparison,
        lhs: Box<LayerExpr>,
        rhs: Box<LayerExpr>,
    },
    And { lhs: Box<LayerExpr>, rhs: Box<LayerExpr> },
    Or { lhs: Box<LayerExpr>, rhs: Box<LayerExpr> },
    Not { input: Box<LayerExpr> },
    Multiply { lhs: Box<LayerExpr>, rhs: Box<LayerExpr> },
    /// Keep `input` where `mask` is non-zero, no-data elsewhere
    Mask { input: Box<LayerExpr>, mask: Box<LayerExpr> },
}

impl LayerExpr {
    pub fn band(asset: &str, band: &str) -> Self {
        LayerExpr::Band {
            asset: asset.to_string(),
            band: band.to_string(),
        }
    }

    pub fn constant(value: f64) -> Self {
        LayerExpr::Constant { value }
    }

    pub fn compare(self, cmp: Comparison, rhs: LayerExpr) -> Self {
        LayerExpr::Compare {
            cmp,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn lt(self, value: f64) -> Self {
        self.compare(Comparison::Lt, LayerExpr::constant(value))
    }

    pub fn gt(self, value: f64) -> Self {
        self.compare(Comparison::Gt, LayerExpr::constant(value))
    }

    pub fn eq_value(self, value: f64) -> Self {
        self.compare(Comparison::Eq, LayerExpr::constant(value))
    }

    pub fn and(self, rhs: LayerExpr) -> Self {
        LayerExpr::And {
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn or(self, rhs: LayerExpr) -> Self {
        LayerExpr::Or {
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(self) -> Self {
        LayerExpr::Not {
            input: Box::new(self),
        }
    }

    pub fn multiply(self, rhs: LayerExpr) -> Self {
        LayerExpr::Multiply {
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn masked_by(self, mask: LayerExpr) -> Self {
        LayerExpr::Mask {
            input: Box::new(self),
            mask: Box::new(mask),
        }
    }
}

/// GeoJSON-style multipolygon coordinates: polygons -> rings -> [lon, lat].
///
/// A GeoJSON `Polygon` is accepted on input and widened to a one-polygon
/// `MultiPolygon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeometry")]
pub struct WireGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<Vec<[f64; 2]>>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCoordinates {
    Multi(Vec<Vec<Vec<[f64; 2]>>>),
    Single(Vec<Vec<[f64; 2]>>),
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: RawCoordinates,
}

impl TryFrom<RawGeometry> for WireGeometry {
    type Error = String;

    fn try_from(raw: RawGeometry) -> std::result::Result<Self, Self::Error> {
        let coordinates = match (raw.kind.as_str(), raw.coordinates) {
            ("MultiPolygon", RawCoordinates::Multi(polygons)) => polygons,
            ("Polygon", RawCoordinates::Single(rings)) => vec![rings],
            (kind, _) => return Err(format!("unsupported geometry '{kind}'")),
        };
        Ok(Self {
            kind: "MultiPolygon".to_string(),
            coordinates,
        })
    }
}

impl From<&MultiPolygon<f64>> for WireGeometry {
    fn from(geometry: &MultiPolygon<f64>) -> Self {
        let ring = |ls: &LineString<f64>| ls.0.iter().map(|c| [c.x, c.y]).collect::<Vec<_>>();
        let coordinates = geometry
            .0
            .iter()
            .map(|polygon| {
                std::iter::once(polygon.exterior())
                    .chain(polygon.interiors().iter())
                    .map(ring)
                    .collect()
            })
            .collect();
        Self {
            kind: "MultiPolygon".to_string(),
            coordinates,
        }
    }
}

impl TryFrom<&WireGeometry> for MultiPolygon<f64> {
    type Error = Error;

    fn try_from(wire: &WireGeometry) -> Result<Self> {
        if wire.kind != "MultiPolygon" {
            return Err(Error::Backend(format!(
                "unsupported geometry type '{}'",
                wire.kind
            )));
        }
        let to_ring = |points: &Vec<[f64; 2]>| -> LineString<f64> {
            points.iter().map(|p| Coord { x: p[0], y: p[1] }).collect()
        };
        let mut polygons = Vec::with_capacity(wire.coordinates.len());
        for rings in &wire.coordinates {
            let (exterior, interiors) = rings
                .split_first()
                .ok_or_else(|| Error::Backend("polygon without exterior ring".to_string()))?;
            polygons.push(Polygon::new(
                to_ring(exterior),
                interiors.iter().map(to_ring).collect(),
            ));
        }
        Ok(MultiPolygon(polygons))
    }
}

/// Lookup of boundary features whose property equals a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryQuery {
    pub dataset: String,
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryFeature {
    pub id: String,
    pub name: String,
    pub geometry: WireGeometry,
}

/// Grouped sum of `value` by the integer value of `group` over a geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedReduceRequest {
    pub value: LayerExpr,
    pub group: LayerExpr,
    pub geometry: WireGeometry,
    pub scale_policy: ScalePolicy,
    pub max_pixels: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupSum {
    pub group: i64,
    pub sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedReduceResponse {
    #[serde(default)]
    pub groups: Vec<GroupSum>,
    /// Ground-sample distance the backend actually used, in metres
    pub scale_m: Option<f64>,
}

/// Publish an expression, clipped to a region, as a renderable layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishLayerRequest {
    pub name: String,
    pub image: LayerExpr,
    pub region: WireGeometry,
}

/// Opaque handle to a published raster layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerHandle {
    pub id: String,
    pub tile_url: Option<String>,
}

/// Operations the core consumes from a raster engine
#[async_trait]
pub trait RasterBackend: Send + Sync {
    /// Probe reachability and credentials once per request
    async fn check_available(&self) -> Result<()>;

    async fn lookup_boundaries(&self, query: &BoundaryQuery) -> Result<Vec<BoundaryFeature>>;

    /// Every value of `property` in `dataset`, for name suggestions
    async fn boundary_names(&self, dataset: &str, property: &str) -> Result<Vec<String>>;

    async fn reduce_grouped(&self, request: &GroupedReduceRequest)
        -> Result<GroupedReduceResponse>;

    async fn publish_layer(&self, request: &PublishLayerRequest) -> Result<LayerHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_layer_expr_wire_format() {
        let expr = LayerExpr::band("hansen", "lossyear").lt(5.0);
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json["op"], "compare");
        assert_eq!(json["cmp"], "lt");
        assert_eq!(json["lhs"]["op"], "band");
        assert_eq!(json["lhs"]["band"], "lossyear");
        assert_eq!(json["rhs"]["value"], 5.0);
    }

    #[test]
    fn test_wire_geometry_keeps_holes() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 2.0)]],
        );
        let geometry = MultiPolygon(vec![poly]);
        let wire = WireGeometry::from(&geometry);
        assert_eq!(wire.kind, "MultiPolygon");
        assert_eq!(wire.coordinates.len(), 1);
        assert_eq!(wire.coordinates[0].len(), 2);

        let back = MultiPolygon::try_from(&wire).unwrap();
        assert_eq!(back, geometry);
    }

    #[test]
    fn test_geojson_polygon_is_widened() {
        let wire: WireGeometry = serde_json::from_value(serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        }))
        .unwrap();
        assert_eq!(wire.kind, "MultiPolygon");
        assert_eq!(wire.coordinates.len(), 1);
        assert_eq!(wire.coordinates[0][0].len(), 4);

        let point = serde_json::from_value::<WireGeometry>(serde_json::json!({
            "type": "Point",
            "coordinates": [1.0, 2.0]
        }));
        assert!(point.is_err());
    }

    #[test]
    fn test_wire_geometry_rejects_points() {
        let wire = WireGeometry {
            kind: "Point".to_string(),
            coordinates: vec![],
        };
        assert!(MultiPolygon::try_from(&wire).is_err());

        let wire = WireGeometry {
            kind: "MultiPolygon".to_string(),
            coordinates: vec![vec![]],
        };
        assert!(MultiPolygon::try_from(&wire).is_err());
    }
}
