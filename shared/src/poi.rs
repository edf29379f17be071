use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bounds::{LatLng, MapBounds};

pub type PoiId = String;

/// Decimal places used when deriving a [`RequestKey`] from bounds.
pub const REQUEST_KEY_PRECISION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: PoiId,
    pub name: String,
    pub category: String,
    pub lat: f64,
    pub lng: f64,
    /// Intrinsic importance; the proximity boost is added on top at read time.
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Poi {
    pub fn new(
        id: impl Into<PoiId>,
        name: impl Into<String>,
        category: impl Into<String>,
        lat: f64,
        lng: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            lat,
            lng,
            priority: 0.0,
            audiences: Vec::new(),
            description: None,
            address: None,
            image_url: None,
            updated_at: None,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// A cached POI copy annotated for one particular read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPoi {
    #[serde(flatten)]
    pub poi: Poi,
    pub distance_km: f64,
    pub priority_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoiFilters {
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl PoiFilters {
    pub fn with_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
            audience: None,
        }
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Stable identity of the filter set; category order never changes it.
    pub fn fingerprint(&self) -> u32 {
        let mut canonical = String::with_capacity(64);
        write_filters(&mut canonical, self);
        crc32fast::hash(canonical.as_bytes())
    }

    /// Empty category set matches every category.
    pub fn matches(&self, poi: &Poi) -> bool {
        let category_ok = self.categories.is_empty() || self.categories.contains(&poi.category);
        let audience_ok = match &self.audience {
            Some(audience) => poi.audiences.iter().any(|a| a == audience),
            None => true,
        };
        category_ok && audience_ok
    }
}

/// Parameters sent to the backend for one viewport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoiQuery {
    pub bounds: MapBounds,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl PoiQuery {
    pub fn new(bounds: MapBounds, filters: &PoiFilters) -> Self {
        Self {
            bounds,
            categories: filters.categories.iter().cloned().collect(),
            audience: filters.audience.clone(),
        }
    }
}

/// Stable identity of a request: filters plus bounds rounded to
/// [`REQUEST_KEY_PRECISION`] decimals, so near-identical viewports collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey(u32);

impl RequestKey {
    pub fn new(filters: &PoiFilters, bounds: &MapBounds) -> Self {
        Self(crc32fast::hash(canonical_request(filters, bounds).as_bytes()))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

fn canonical_request(filters: &PoiFilters, bounds: &MapBounds) -> String {
    let coarse = bounds.rounded(REQUEST_KEY_PRECISION);
    let mut out = String::with_capacity(96);
    write_filters(&mut out, filters);
    let _ = write!(
        out,
        "|{:.3},{:.3},{:.3},{:.3}",
        coarse.north, coarse.south, coarse.east, coarse.west
    );
    out
}

fn write_filters(out: &mut String, filters: &PoiFilters) {
    // BTreeSet iteration is sorted, so category order never matters.
    for category in &filters.categories {
        out.push_str(category);
        out.push(',');
    }
    out.push('|');
    out.push_str(filters.audience.as_deref().unwrap_or(""));
}
