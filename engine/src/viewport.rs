use std::sync::{Arc, PoisonError, RwLock};

use waypoint_shared::{LatLng, MapBounds};

/// Read side of the map viewport. Rendering and gestures live elsewhere.
pub trait ViewportProvider {
    /// `None` until the map has been laid out.
    fn current_bounds(&self) -> Option<MapBounds>;

    fn bounds_center(&self) -> Option<LatLng> {
        self.current_bounds().map(|bounds| bounds.center())
    }
}

impl<V: ViewportProvider + ?Sized> ViewportProvider for Arc<V> {
    fn current_bounds(&self) -> Option<MapBounds> {
        (**self).current_bounds()
    }

    fn bounds_center(&self) -> Option<LatLng> {
        (**self).bounds_center()
    }
}

/// Latest viewport bounds, written by the UI layer and read by the engine.
#[derive(Debug, Clone, Default)]
pub struct SharedViewport {
    bounds: Arc<RwLock<Option<MapBounds>>>,
}

impl SharedViewport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, bounds: MapBounds) {
        *self.bounds.write().unwrap_or_else(PoisonError::into_inner) = Some(bounds);
    }

    pub fn clear(&self) {
        *self.bounds.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl ViewportProvider for SharedViewport {
    fn current_bounds(&self) -> Option<MapBounds> {
        *self.bounds.read().unwrap_or_else(PoisonError::into_inner)
    }
}
