pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod governor;
pub mod markers;
pub mod services;
pub mod stabilizer;
pub mod state;
pub mod telemetry;
pub mod tile_cache;
pub mod viewport;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{HttpPoiBackend, PoiBackend};
pub use config::EngineConfig;
pub use coordinator::{FetchOutcome, FetchSource, ViewportFetchCoordinator};
pub use error::BackendError;
pub use governor::{Decision, FetchGovernor};
pub use markers::{
    IconVariant, MarkerFactory, MarkerHandle, MarkerPoolReconciler, MarkerSpec, ReconcileReport,
};
pub use stabilizer::BoundsStabilizer;
pub use state::EngineState;
pub use tile_cache::{GeographicTileCache, TileKey};
pub use viewport::{SharedViewport, ViewportProvider};
