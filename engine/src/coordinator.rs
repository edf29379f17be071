use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use waypoint_shared::{
    LatLng, MapBounds, Notice, PoiFilters, PoiQuery, RankedPoi, RequestKey, TileId,
};

use crate::backend::PoiBackend;
use crate::config::CoordinatorConfig;
use crate::governor::FetchGovernor;
use crate::state::{EngineCounters, EngineState};
use crate::tile_cache::GeographicTileCache;

/// How a [`FetchOutcome`] was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Every tile was fresh; no network.
    Cache,
    Network,
    /// The governor refused the fetch; best cached data instead.
    Throttled,
    /// The backend failed; best cached data instead.
    StaleFallback,
    /// A newer request started before this one completed.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub pois: Vec<RankedPoi>,
    pub source: FetchSource,
    /// Generation current when the outcome was produced.
    pub generation: u64,
}

impl FetchOutcome {
    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }

    pub fn is_superseded(&self) -> bool {
        self.source == FetchSource::Superseded
    }
}

/// Single entry point turning stable viewport bounds into a ranked POI list.
///
/// One coordinator serves one logical viewport stream with its own filters;
/// the cache and governor it holds are the process-wide ones from
/// [`EngineState`].
pub struct ViewportFetchCoordinator<B: PoiBackend + ?Sized + 'static> {
    backend: Arc<B>,
    tile_cache: Arc<GeographicTileCache>,
    governor: Arc<FetchGovernor>,
    notices: broadcast::Sender<Notice>,
    counters: Arc<EngineCounters>,
    config: CoordinatorConfig,
    filters: RwLock<PoiFilters>,
    generation: Arc<watch::Sender<u64>>,
    fallback_notified: AtomicBool,
    prefetch_inflight: Arc<DashMap<TileId, ()>>,
}

impl<B: PoiBackend + ?Sized + 'static> ViewportFetchCoordinator<B> {
    pub fn new(state: &EngineState, backend: Arc<B>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            backend,
            tile_cache: Arc::clone(&state.tile_cache),
            governor: Arc::clone(&state.governor),
            notices: state.notices.clone(),
            counters: Arc::clone(&state.counters),
            config: state.config.coordinator.clone(),
            filters: RwLock::new(PoiFilters::default()),
            generation: Arc::new(generation),
            fallback_notified: AtomicBool::new(false),
            prefetch_inflight: Arc::new(DashMap::new()),
        }
    }

    pub fn filters(&self) -> PoiFilters {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the active filters, returning true when they actually changed.
    /// Tiles cached under other filter sets are left alone.
    pub fn set_filters(&self, filters: PoiFilters) -> bool {
        let mut current = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        if *current == filters {
            return false;
        }
        info!(
            categories = filters.categories.len(),
            audience = filters.audience.as_deref().unwrap_or(""),
            "POI filters changed"
        );
        *current = filters;
        true
    }

    pub fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Watch the request generation; it changes whenever a network fetch starts.
    pub fn subscribe_generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn prefetch_in_flight(&self) -> usize {
        self.prefetch_inflight.len()
    }

    /// Never fails: every error path resolves to cached data plus a notice.
    pub async fn fetch_pois(&self, bounds: MapBounds, force_fresh: bool) -> FetchOutcome {
        let now = Instant::now();
        let center = bounds.center();
        let filters = self.filters();
        self.tile_cache.set_focus(center);

        if !force_fresh && !self.tile_cache.needs_fresh_data(&bounds, &filters, now) {
            self.counters.record_cache_hit();
            if self.tile_cache.needs_revalidation(&bounds, &filters, now) {
                self.spawn_revalidation(bounds, &filters);
            }
            self.spawn_prefetch(center, &filters);
            return self.cached_outcome(center, &filters, FetchSource::Cache);
        }

        let key = RequestKey::new(&filters, &bounds);
        let decision = self.governor.allow(key, now);
        if !decision.is_allowed() {
            debug!(?decision, key = key.value(), "fetch refused, serving cached data");
            self.counters.record_throttled();
            return self.cached_outcome(center, &filters, FetchSource::Throttled);
        }

        let mut issued = 0;
        self.generation.send_modify(|generation| {
            *generation += 1;
            issued = *generation;
        });
        let mut newer = self.generation.subscribe();

        let query = PoiQuery::new(bounds.buffered_km(self.config.query_buffer_km), &filters);
        let result = tokio::select! {
            biased;
            result = self.backend.query(&query) => Some(result),
            _ = newer.changed() => None,
        };

        let Some(result) = result.filter(|_| self.current_generation() == issued) else {
            return self.superseded(center, &filters, issued);
        };

        match result {
            Ok(pois) => {
                self.governor.record_success();
                self.fallback_notified.store(false, Ordering::Relaxed);
                let tiles = self
                    .tile_cache
                    .store(&pois, &query.bounds, &filters, Instant::now());
                self.counters.record_network_fetch();
                debug!(
                    generation = issued,
                    pois = pois.len(),
                    tiles,
                    "stored fetched POIs"
                );
                self.spawn_prefetch(center, &filters);
                self.outcome(center, &filters, FetchSource::Network, issued)
            }
            Err(e) => {
                self.governor.record_failure(Instant::now());
                warn!(
                    error = %e,
                    generation = issued,
                    transient = e.is_transient(),
                    "POI query failed, falling back to cached data"
                );
                self.fallback(center, &filters, issued)
            }
        }
    }

    fn outcome(
        &self,
        center: LatLng,
        filters: &PoiFilters,
        source: FetchSource,
        generation: u64,
    ) -> FetchOutcome {
        let pois = self
            .tile_cache
            .get_cached_pois(center, filters, self.config.result_limit);
        FetchOutcome {
            pois,
            source,
            generation,
        }
    }

    fn cached_outcome(
        &self,
        center: LatLng,
        filters: &PoiFilters,
        source: FetchSource,
    ) -> FetchOutcome {
        let outcome = self.outcome(center, filters, source, self.current_generation());
        if outcome.is_empty() && source == FetchSource::Throttled {
            self.counters.record_empty_result();
        }
        outcome
    }

    fn superseded(&self, center: LatLng, filters: &PoiFilters, issued: u64) -> FetchOutcome {
        debug!(
            generation = issued,
            current = self.current_generation(),
            "discarding superseded POI response"
        );
        self.counters.record_superseded();
        self.outcome(center, filters, FetchSource::Superseded, issued)
    }

    fn fallback(&self, center: LatLng, filters: &PoiFilters, issued: u64) -> FetchOutcome {
        let outcome = self.outcome(center, filters, FetchSource::StaleFallback, issued);
        self.counters.record_stale_fallback();
        if outcome.is_empty() {
            self.counters.record_empty_result();
        }
        // One notice per failure episode; the next success re-arms it.
        if !self.fallback_notified.swap(true, Ordering::Relaxed) {
            let notice = if outcome.is_empty() {
                Notice::NothingAvailable
            } else {
                Notice::UsingCachedData {
                    count: outcome.pois.len(),
                }
            };
            let _ = self.notices.send(notice);
        }
        outcome
    }

    /// Refreshes aging tiles behind a cache hit without touching the generation.
    fn spawn_revalidation(&self, bounds: MapBounds, filters: &PoiFilters) {
        let key = RequestKey::new(filters, &bounds);
        let decision = self.governor.allow(key, Instant::now());
        if !decision.is_allowed() {
            debug!(?decision, "skipping revalidation");
            return;
        }

        let backend = Arc::clone(&self.backend);
        let tile_cache = Arc::clone(&self.tile_cache);
        let governor = Arc::clone(&self.governor);
        let counters = Arc::clone(&self.counters);
        let generation = Arc::clone(&self.generation);
        let issued_at = *generation.borrow();
        let filters = filters.clone();
        let query = PoiQuery::new(bounds.buffered_km(self.config.query_buffer_km), &filters);

        tokio::spawn(async move {
            match backend.query(&query).await {
                Ok(pois) => {
                    governor.record_success();
                    if *generation.borrow() == issued_at {
                        tile_cache.store(&pois, &query.bounds, &filters, Instant::now());
                        counters.record_revalidation();
                    } else {
                        debug!("dropping revalidation overtaken by a newer request");
                    }
                }
                Err(e) => {
                    governor.record_failure(Instant::now());
                    debug!(error = %e, "background revalidation failed");
                }
            }
        });
    }

    /// Fire-and-forget fetch of stale neighbour tiles, one query per tile.
    fn spawn_prefetch(&self, center: LatLng, filters: &PoiFilters) {
        let now = Instant::now();
        if self.governor.is_open(now) {
            return;
        }
        let claimed: Vec<InflightTile> = self
            .tile_cache
            .get_tiles_to_prefetch(center, filters, now)
            .into_iter()
            .filter(|tile| self.prefetch_inflight.insert(*tile, ()).is_none())
            .map(|tile| InflightTile {
                tile,
                inflight: Arc::clone(&self.prefetch_inflight),
            })
            .collect();
        if claimed.is_empty() {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let tile_cache = Arc::clone(&self.tile_cache);
        let counters = Arc::clone(&self.counters);
        let filters = filters.clone();

        tokio::spawn(async move {
            for claim in claimed {
                let tile = claim.tile;
                let query = PoiQuery::new(tile_cache.grid().tile_bounds(tile), &filters);
                match backend.query(&query).await {
                    Ok(pois) => {
                        tile_cache.store(&pois, &query.bounds, &filters, Instant::now());
                        counters.record_prefetched_tiles(1);
                    }
                    Err(e) => debug!(error = %e, %tile, "prefetch failed"),
                }
            }
        });
    }
}

/// A prefetch tile marked in flight; the mark is cleared on drop, so tiles
/// are released even when the prefetch task is cancelled mid-way.
struct InflightTile {
    tile: TileId,
    inflight: Arc<DashMap<TileId, ()>>,
}

impl Drop for InflightTile {
    fn drop(&mut self) {
        self.inflight.remove(&self.tile);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio::time::Instant;
    use waypoint_shared::{Notice, Poi, PoiFilters, TileId};

    use super::{FetchSource, ViewportFetchCoordinator};
    use crate::config::{CoordinatorConfig, EngineConfig, TileCacheConfig};
    use crate::state::EngineState;
    use crate::tile_cache::TileKey;
    use crate::testing::{Scripted, ScriptedBackend, bounds, rimini_bounds, rimini_pois};

    fn no_prefetch_config() -> EngineConfig {
        EngineConfig {
            tile_cache: TileCacheConfig {
                max_prefetch: 0,
                ..TileCacheConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn coordinator(
        config: EngineConfig,
        script: Vec<Scripted>,
    ) -> (
        EngineState,
        Arc<ScriptedBackend>,
        ViewportFetchCoordinator<ScriptedBackend>,
    ) {
        let state = EngineState::new(config);
        let backend = Arc::new(ScriptedBackend::new(script));
        let coordinator = ViewportFetchCoordinator::new(&state, Arc::clone(&backend));
        (state, backend, coordinator)
    }

    async fn settle_background_tasks() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cold_fetch_hits_network_then_serves_from_cache() {
        let (state, backend, coordinator) =
            coordinator(no_prefetch_config(), vec![Scripted::Ok(rimini_pois())]);

        let first = coordinator.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(first.source, FetchSource::Network);
        assert_eq!(first.generation, 1);
        assert_eq!(first.pois.len(), 5);
        assert!(first.pois.iter().all(|ranked| ranked.distance_km < 10.0));

        let query = &backend.queries()[0];
        assert!(query.bounds.contains_bounds(&rimini_bounds()));

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = coordinator.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(second.source, FetchSource::Cache);
        assert_eq!(second.pois, first.pois);
        assert_eq!(backend.calls(), 1);

        let counters = state.counters.snapshot();
        assert_eq!(counters.network_fetches_total, 1);
        assert_eq!(counters.cache_hits_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_falls_back_to_stale_cache_with_one_notice() {
        let (state, backend, coordinator) = coordinator(no_prefetch_config(), vec![]);
        let mut notices = state.subscribe_notices();
        let pois: Vec<Poi> = rimini_pois().into_iter().take(3).collect();
        state
            .tile_cache
            .store(&pois, &rimini_bounds(), &PoiFilters::default(), Instant::now());

        tokio::time::advance(Duration::from_secs(301)).await;
        backend.push(Scripted::Fail);
        let outcome = coordinator.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(outcome.source, FetchSource::StaleFallback);
        assert_eq!(outcome.pois.len(), 3);
        assert_eq!(
            notices.try_recv().expect("fallback notice"),
            Notice::UsingCachedData { count: 3 }
        );

        tokio::time::advance(Duration::from_secs(3)).await;
        backend.push(Scripted::Fail);
        let nudged = bounds(44.12, 44.02, 12.6, 12.5);
        let again = coordinator.fetch_pois(nudged, false).await;
        assert_eq!(again.source, FetchSource::StaleFallback);
        assert!(!again.is_empty());
        assert!(notices.try_recv().is_err(), "notice raised once per episode");
        assert_eq!(state.governor.snapshot(Instant::now()).failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_with_empty_cache_reports_nothing_available() {
        let (state, _backend, coordinator) =
            coordinator(no_prefetch_config(), vec![Scripted::Fail]);
        let mut notices = state.subscribe_notices();

        let outcome = coordinator.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(outcome.source, FetchSource::StaleFallback);
        assert!(outcome.is_empty());
        assert_eq!(notices.try_recv().expect("notice"), Notice::NothingAvailable);
        assert_eq!(state.counters.snapshot().empty_results_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_fetch_returns_cached_neighbourhood() {
        let (state, backend, coordinator) =
            coordinator(no_prefetch_config(), vec![Scripted::Ok(rimini_pois())]);
        coordinator.fetch_pois(rimini_bounds(), false).await;

        // Reaches a tile row the buffered query never covered, within the min interval.
        let shifted = bounds(44.21, 44.11, 12.6, 12.5);
        let outcome = coordinator.fetch_pois(shifted, false).await;
        assert_eq!(outcome.source, FetchSource::Throttled);
        assert!(!outcome.is_empty());
        assert_eq!(backend.calls(), 1);
        assert_eq!(state.counters.snapshot().throttled_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_response_is_never_applied() {
        let (gate_tx, gate_rx) = oneshot::channel();
        let (state, backend, coordinator) = coordinator(
            no_prefetch_config(),
            vec![
                Scripted::Gate(gate_rx),
                Scripted::Ok(vec![Poi::new("new", "Nuovo", "park", 45.05, 12.55)]),
            ],
        );
        let coordinator = Arc::new(coordinator);

        let slow = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.fetch_pois(rimini_bounds(), false).await }
        });
        while backend.calls() == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::advance(Duration::from_secs(3)).await;
        let elsewhere = bounds(45.1, 45.0, 12.6, 12.5);
        let fresh = coordinator.fetch_pois(elsewhere, false).await;
        assert_eq!(fresh.source, FetchSource::Network);
        assert_eq!(fresh.generation, 2);

        let stale = slow.await.expect("join");
        assert!(stale.is_superseded());
        assert_eq!(stale.generation, 1);

        // The old response arrives too late to matter.
        let _ = gate_tx.send(rimini_pois());
        assert!(state.tile_cache.needs_fresh_data(
            &rimini_bounds(),
            &PoiFilters::default(),
            Instant::now()
        ));
        assert_eq!(state.counters.snapshot().superseded_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn grazed_neighbours_are_still_prefetched() {
        let (state, backend, coordinator) =
            coordinator(EngineConfig::default(), vec![Scripted::Ok(rimini_pois())]);

        coordinator.fetch_pois(rimini_bounds(), false).await;
        settle_background_tasks().await;

        // The 1 km buffer only reaches a thin strip of each neighbouring tile.
        assert_eq!(backend.calls(), 3);
        assert_eq!(coordinator.prefetch_in_flight(), 0);
        assert_eq!(state.counters.snapshot().prefetched_tiles_total, 2);
        let north = TileKey::new(TileId::new(441, 125), &PoiFilters::default());
        let entry = state.tile_cache.entry(&north).expect("north tile prefetched");
        assert!(entry.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn panning_into_a_grazed_tile_fetches_it() {
        let north_poi = Poi::new("north", "Santarcangelo", "village", 44.15, 12.55);
        let (state, backend, coordinator) = coordinator(
            no_prefetch_config(),
            vec![Scripted::Ok(rimini_pois()), Scripted::Ok(vec![north_poi])],
        );
        coordinator.fetch_pois(rimini_bounds(), false).await;

        tokio::time::advance(Duration::from_secs(3)).await;
        let north_view = bounds(44.19, 44.11, 12.59, 12.51);
        assert!(state.tile_cache.needs_fresh_data(
            &north_view,
            &PoiFilters::default(),
            Instant::now()
        ));

        let outcome = coordinator.fetch_pois(north_view, false).await;
        assert_eq!(outcome.source, FetchSource::Network);
        assert_eq!(backend.calls(), 2);
        assert!(outcome.pois.iter().any(|ranked| ranked.poi.id == "north"));
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_fetches_stale_neighbours_in_the_background() {
        let config = EngineConfig {
            coordinator: CoordinatorConfig {
                query_buffer_km: 0.001,
                ..CoordinatorConfig::default()
            },
            ..EngineConfig::default()
        };
        let (state, backend, coordinator) = coordinator(config, vec![]);

        let tile = bounds(44.09, 44.01, 12.59, 12.51);
        let outcome = coordinator.fetch_pois(tile, false).await;
        assert_eq!(outcome.source, FetchSource::Network);
        settle_background_tasks().await;

        assert_eq!(backend.calls(), 3);
        assert_eq!(coordinator.prefetch_in_flight(), 0);
        assert_eq!(state.counters.snapshot().prefetched_tiles_total, 2);
        let center = TileId::new(440, 125);
        let key = |tile: TileId| TileKey::new(tile, &PoiFilters::default());
        assert!(state.tile_cache.entry(&key(center.offset(1, 0))).is_some());
        assert!(state.tile_cache.entry(&key(center.offset(-1, 0))).is_some());
        assert!(state.tile_cache.entry(&key(center.offset(0, 1))).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn aging_cache_hit_triggers_background_revalidation() {
        let (state, backend, coordinator) =
            coordinator(no_prefetch_config(), vec![Scripted::Ok(rimini_pois())]);
        coordinator.fetch_pois(rimini_bounds(), false).await;

        tokio::time::advance(Duration::from_secs(121)).await;
        let outcome = coordinator.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(outcome.source, FetchSource::Cache);
        assert_eq!(outcome.generation, 1, "revalidation leaves the generation alone");
        settle_background_tasks().await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(state.counters.snapshot().revalidations_total, 1);
        assert!(!state.tile_cache.needs_revalidation(
            &rimini_bounds(),
            &PoiFilters::default(),
            Instant::now()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn changing_filters_fetches_under_the_new_filter_set() {
        let mut beach = Poi::new("beach", "Spiaggia", "beach", 44.05, 12.56);
        beach.priority = 1.0;
        let museum = Poi::new("museum", "Museo", "museum", 44.05, 12.55);
        let (state, _backend, coordinator) = coordinator(
            no_prefetch_config(),
            vec![
                Scripted::Ok(vec![beach.clone(), museum.clone()]),
                Scripted::Ok(vec![beach, museum]),
            ],
        );

        let all = coordinator.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(all.pois.len(), 2);

        assert!(coordinator.set_filters(PoiFilters::with_categories(["beach"])));
        assert!(!coordinator.set_filters(PoiFilters::with_categories(["beach"])));

        tokio::time::advance(Duration::from_secs(3)).await;
        let beaches = coordinator.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(beaches.source, FetchSource::Network);
        let ids: Vec<&str> = beaches.pois.iter().map(|r| r.poi.id.as_str()).collect();
        assert_eq!(ids, vec!["beach"]);

        // Unfiltered tiles survive the change.
        let unfiltered = state.tile_cache.get_cached_pois(
            rimini_bounds().center(),
            &PoiFilters::default(),
            10,
        );
        assert_eq!(unfiltered.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn consumers_with_different_filters_do_not_share_results() {
        let beach = Poi::new("beach", "Spiaggia", "beach", 44.05, 12.56);
        let museum = Poi::new("museum", "Museo", "museum", 44.05, 12.55);
        let state = EngineState::new(no_prefetch_config());
        let backend = Arc::new(ScriptedBackend::new([
            Scripted::Ok(vec![beach.clone()]),
            Scripted::Ok(vec![beach, museum]),
        ]));
        let beaches = ViewportFetchCoordinator::new(&state, Arc::clone(&backend));
        let everything = ViewportFetchCoordinator::new(&state, Arc::clone(&backend));
        beaches.set_filters(PoiFilters::with_categories(["beach"]));

        let narrowed = beaches.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(narrowed.source, FetchSource::Network);
        assert_eq!(narrowed.pois.len(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        let full = everything.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(full.source, FetchSource::Network);
        assert_eq!(full.pois.len(), 2);
        assert_eq!(backend.calls(), 2);

        tokio::time::advance(Duration::from_secs(3)).await;
        let again = beaches.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(again.source, FetchSource::Cache);
        let ids: Vec<&str> = again.pois.iter().map(|r| r.poi.id.as_str()).collect();
        assert_eq!(ids, vec!["beach"]);
        let full_again = everything.fetch_pois(rimini_bounds(), false).await;
        assert_eq!(full_again.source, FetchSource::Cache);
        assert_eq!(full_again.pois.len(), 2);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_serves_cache_without_calling_backend() {
        let (state, backend, coordinator) =
            coordinator(no_prefetch_config(), vec![Scripted::Ok(rimini_pois())]);
        coordinator.fetch_pois(rimini_bounds(), false).await;
        for _ in 0..5 {
            state.governor.record_failure(Instant::now());
        }

        tokio::time::advance(Duration::from_secs(3)).await;
        let outcome = coordinator.fetch_pois(rimini_bounds(), true).await;
        assert_eq!(outcome.source, FetchSource::Throttled);
        assert_eq!(outcome.pois.len(), 5);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn cancelled_prefetch_releases_its_tiles() {
        let config = EngineConfig {
            coordinator: CoordinatorConfig {
                query_buffer_km: 0.001,
                ..CoordinatorConfig::default()
            },
            ..EngineConfig::default()
        };
        let (gate_tx, gate_rx) = oneshot::channel();
        let (_state, backend, coordinator) =
            coordinator(config, vec![Scripted::Ok(Vec::new()), Scripted::Gate(gate_rx)]);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            coordinator
                .fetch_pois(bounds(44.09, 44.01, 12.59, 12.51), false)
                .await;
            while backend.calls() < 2 {
                tokio::task::yield_now().await;
            }
        });
        assert_eq!(coordinator.prefetch_in_flight(), 2);

        // Shutting the runtime down drops the stuck prefetch task.
        drop(runtime);
        assert_eq!(coordinator.prefetch_in_flight(), 0);
        drop(gate_tx);
    }
}
