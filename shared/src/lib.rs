pub mod bounds;
pub mod events;
pub mod geo;
pub mod poi;
pub mod tile;

pub use bounds::{BoundsError, LatLng, MapBounds};
pub use events::*;
pub use geo::{distance_boost, haversine_km, priority_score};
pub use poi::*;
pub use tile::{TileGrid, TileId};
