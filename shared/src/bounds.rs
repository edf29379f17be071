use std::fmt;

use serde::{Deserialize, Serialize};

/// Decimal places kept on every bounds edge.
pub const BOUNDS_PRECISION: u32 = 5;

const KM_PER_DEGREE_LAT: f64 = 111.32;

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundsError {
    NonFinite,
    Inverted { north: f64, south: f64 },
    Reversed { east: f64, west: f64 },
    LatitudeOutOfRange(f64),
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsError::NonFinite => write!(f, "bounds contain a non-finite edge"),
            BoundsError::Inverted { north, south } => {
                write!(f, "north edge {north} is not above south edge {south}")
            }
            BoundsError::Reversed { east, west } => {
                write!(f, "east edge {east} is not east of west edge {west}")
            }
            BoundsError::LatitudeOutOfRange(lat) => write!(f, "latitude {lat} is outside ±90°"),
        }
    }
}

impl std::error::Error for BoundsError {}

/// Rectangular lat/lng region, edges rounded to [`BOUNDS_PRECISION`] decimals.
///
/// Equality is exact on the rounded edges, so two viewports that only differ
/// below the rounding precision compare equal. Dateline wrapping is not handled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl MapBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self, BoundsError> {
        if !(north.is_finite() && south.is_finite() && east.is_finite() && west.is_finite()) {
            return Err(BoundsError::NonFinite);
        }
        for lat in [north, south] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(BoundsError::LatitudeOutOfRange(lat));
            }
        }

        let bounds = Self::from_edges(north, south, east, west);
        if bounds.north <= bounds.south {
            return Err(BoundsError::Inverted {
                north: bounds.north,
                south: bounds.south,
            });
        }
        if bounds.east <= bounds.west {
            return Err(BoundsError::Reversed {
                east: bounds.east,
                west: bounds.west,
            });
        }
        Ok(bounds)
    }

    /// Builds bounds from edges already known to be ordered, rounding only.
    pub(crate) fn from_edges(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north: round_to(north, BOUNDS_PRECISION),
            south: round_to(south, BOUNDS_PRECISION),
            east: round_to(east, BOUNDS_PRECISION),
            west: round_to(west, BOUNDS_PRECISION),
        }
    }

    pub fn center(&self) -> LatLng {
        LatLng {
            lat: (self.north + self.south) / 2.0,
            lng: (self.east + self.west) / 2.0,
        }
    }

    pub fn contains(&self, point: LatLng) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lng >= self.west
            && point.lng <= self.east
    }

    pub fn contains_bounds(&self, other: &MapBounds) -> bool {
        other.north <= self.north
            && other.south >= self.south
            && other.east <= self.east
            && other.west >= self.west
    }

    pub fn intersects(&self, other: &MapBounds) -> bool {
        self.south < other.north
            && other.south < self.north
            && self.west < other.east
            && other.west < self.east
    }

    /// Overlapping region, or `None` when the two only touch or are disjoint.
    pub fn intersection(&self, other: &MapBounds) -> Option<MapBounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self {
            north: self.north.min(other.north),
            south: self.south.max(other.south),
            east: self.east.min(other.east),
            west: self.west.max(other.west),
        })
    }

    /// Largest absolute movement of any single edge between `self` and `other`.
    pub fn max_edge_delta(&self, other: &MapBounds) -> f64 {
        (self.north - other.north)
            .abs()
            .max((self.south - other.south).abs())
            .max((self.east - other.east).abs())
            .max((self.west - other.west).abs())
    }

    pub fn differs_from(&self, other: &MapBounds, threshold_deg: f64) -> bool {
        self.max_edge_delta(other) > threshold_deg
    }

    /// Coarser copy used for request identity; not re-validated.
    pub fn rounded(&self, decimals: u32) -> Self {
        Self {
            north: round_to(self.north, decimals),
            south: round_to(self.south, decimals),
            east: round_to(self.east, decimals),
            west: round_to(self.west, decimals),
        }
    }

    /// Grows every edge by roughly `km` kilometres, clamped to valid coordinates.
    pub fn buffered_km(&self, km: f64) -> Self {
        if km <= 0.0 || !km.is_finite() {
            return *self;
        }
        let dlat = km / KM_PER_DEGREE_LAT;
        let cos_lat = self.center().lat.to_radians().cos().abs().max(0.01);
        let dlng = km / (KM_PER_DEGREE_LAT * cos_lat);
        Self::from_edges(
            (self.north + dlat).min(90.0),
            (self.south - dlat).max(-90.0),
            (self.east + dlng).min(180.0),
            (self.west - dlng).max(-180.0),
        )
    }

    pub fn width_deg(&self) -> f64 {
        self.east - self.west
    }

    pub fn height_deg(&self) -> f64 {
        self.north - self.south
    }
}
