//! Value types shared by entities and filters

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Default search radius for proximity filters, in meters.
pub const DEFAULT_NEAR_RADIUS_METERS: f64 = 200.0;

/// Geographic position.
///
/// Persisted as a GeoJSON point (`{"type": "Point", "coordinates": [lon, lat]}`)
/// so proximity queries can run against it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "GeoJsonPoint", try_from = "GeoJsonPoint")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// GeoJSON rendering of the point.
    pub fn to_geojson(&self) -> Value {
        json!({ "type": "Point", "coordinates": [self.longitude, self.latitude] })
    }

    /// Reads a GeoJSON point.
    pub fn from_geojson(value: &Value) -> Option<Self> {
        if value.get("type")?.as_str()? != "Point" {
            return None;
        }
        let coordinates = value.get("coordinates")?.as_array()?;
        match coordinates.as_slice() {
            [longitude, latitude] => Some(Self::new(latitude.as_f64()?, longitude.as_f64()?)),
            _ => None,
        }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_METERS: f64 = 6_371_008.8;
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: [f64; 2],
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(point: GeoPoint) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [point.longitude, point.latitude],
        }
    }
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = String;

    fn try_from(point: GeoJsonPoint) -> Result<Self, Self::Error> {
        if point.kind != "Point" {
            return Err(format!("expected GeoJSON Point, got {}", point.kind));
        }
        let [longitude, latitude] = point.coordinates;
        Ok(GeoPoint::new(latitude, longitude))
    }
}

/// Opening hours for one day of the week.
///
/// `day` counts from Sunday (0) to Saturday (6); `start` and `end` are
/// minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTiming {
    pub day: u32,
    pub start: u32,
    pub end: u32,
}

/// Parameters of a proximity search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearBy {
    pub latitude: f64,
    pub longitude: f64,
    /// Maximum distance in meters
    #[serde(default = "default_radius")]
    pub radius: f64,
}

impl NearBy {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius: DEFAULT_NEAR_RADIUS_METERS,
        }
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

fn default_radius() -> f64 {
    DEFAULT_NEAR_RADIUS_METERS
}
