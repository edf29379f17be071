use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};
use waypoint_shared::{
    LatLng, MapBounds, Poi, PoiFilters, PoiId, RankedPoi, TileGrid, TileId, haversine_km,
    priority_score,
};

use crate::config::TileCacheConfig;

/// Tiles around the centre tile searched by [`GeographicTileCache::get_cached_pois`].
pub const NEIGHBORHOOD_RADIUS: i32 = 1;

/// One grid cell as fetched under one filter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub tile: TileId,
    pub filters: u32,
}

impl TileKey {
    pub fn new(tile: TileId, filters: &PoiFilters) -> Self {
        Self {
            tile,
            filters: filters.fingerprint(),
        }
    }
}

/// Cached POIs for one tile. Replaced wholesale on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEntry {
    pub pois: Vec<Poi>,
    pub fetched_at: Instant,
    pub bounds: MapBounds,
    /// Part of the tile the last fetch actually queried. `None` when the
    /// entry only holds POIs that landed here from a neighbouring query.
    pub coverage: Option<MapBounds>,
}

impl TileEntry {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    pub fn covers(&self, area: &MapBounds) -> bool {
        self.coverage
            .is_some_and(|coverage| coverage.contains_bounds(area))
    }

    pub fn is_complete(&self) -> bool {
        self.covers(&self.bounds)
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    fresh_checks: AtomicU64,
    fresh_hits: AtomicU64,
    tiles_written: AtomicU64,
    tiles_evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheStats {
    pub tiles: usize,
    pub fresh_checks: u64,
    pub fresh_hits: u64,
    pub tiles_written: u64,
    pub tiles_evicted: u64,
}

/// Process-wide POI cache partitioned on a fixed lat/lng grid.
///
/// Entries are keyed by tile and filter set, so consumers with different
/// filters share the cache without seeing each other's narrowed results.
/// A tile is only fresh for the part of it a fetch actually covered.
#[derive(Debug)]
pub struct GeographicTileCache {
    grid: TileGrid,
    config: TileCacheConfig,
    tiles: DashMap<TileKey, Arc<TileEntry>>,
    focus: Mutex<Option<TileId>>,
    counters: CacheCounters,
}

impl GeographicTileCache {
    pub fn new(config: TileCacheConfig) -> Self {
        Self {
            grid: TileGrid::new(config.tile_size_deg),
            config,
            tiles: DashMap::new(),
            focus: Mutex::new(None),
            counters: CacheCounters::default(),
        }
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.config
    }

    /// Fresh for `area`, a region inside the tile; the whole tile when `None`.
    fn is_fresh(
        &self,
        key: &TileKey,
        area: Option<&MapBounds>,
        ttl: Duration,
        now: Instant,
    ) -> bool {
        self.tiles.get(key).is_some_and(|entry| {
            let covered = match area {
                Some(area) => entry.covers(area),
                None => entry.is_complete(),
            };
            covered && entry.age(now) <= ttl
        })
    }

    fn covering_tiles(&self, bounds: &MapBounds) -> Option<Vec<TileId>> {
        let count = self.grid.tile_count(bounds);
        if count > self.config.max_tiles_per_query {
            debug!(
                tiles = count,
                limit = self.config.max_tiles_per_query,
                "bounds span too many tiles to track individually"
            );
            return None;
        }
        Some(self.grid.tiles_covering(bounds))
    }

    pub fn needs_fresh_data(
        &self,
        bounds: &MapBounds,
        filters: &PoiFilters,
        now: Instant,
    ) -> bool {
        self.needs_fresh_data_within(bounds, filters, self.config.ttl, now)
    }

    /// True when any tile intersecting `bounds` is missing, older than `ttl`,
    /// or was never fetched across the part of it `bounds` needs.
    pub fn needs_fresh_data_within(
        &self,
        bounds: &MapBounds,
        filters: &PoiFilters,
        ttl: Duration,
        now: Instant,
    ) -> bool {
        self.counters.fresh_checks.fetch_add(1, Ordering::Relaxed);
        let Some(tiles) = self.covering_tiles(bounds) else {
            return true;
        };
        let stale = tiles.iter().any(|tile| {
            let needed = bounds.intersection(&self.grid.tile_bounds(*tile));
            let key = TileKey::new(*tile, filters);
            match needed {
                Some(area) => !self.is_fresh(&key, Some(&area), ttl, now),
                None => false,
            }
        });
        if !stale {
            self.counters.fresh_hits.fetch_add(1, Ordering::Relaxed);
        }
        stale
    }

    /// Fresh, but old enough that a background refresh is worthwhile.
    pub fn needs_revalidation(
        &self,
        bounds: &MapBounds,
        filters: &PoiFilters,
        now: Instant,
    ) -> bool {
        let Some(tiles) = self.covering_tiles(bounds) else {
            return false;
        };
        tiles.iter().any(|tile| {
            self.tiles
                .get(&TileKey::new(*tile, filters))
                .is_some_and(|entry| entry.age(now) > self.config.revalidate_after)
        })
    }

    /// Writes POIs fetched for `bounds` under `filters` into their tiles.
    ///
    /// Each POI lands in the tile of its own coordinates. Tiles `bounds` fully
    /// contains are replaced and stamped with `now`, empty ones included. A
    /// tile only partly inside `bounds` keeps its cached POIs lying outside
    /// it, and stays fresh only for the area its earlier fetch covered unless
    /// that earlier entry had expired. Returns the number of tiles written.
    pub fn store(
        &self,
        pois: &[Poi],
        bounds: &MapBounds,
        filters: &PoiFilters,
        now: Instant,
    ) -> usize {
        let mut grouped: HashMap<TileId, BTreeMap<PoiId, Poi>> = HashMap::new();
        for poi in pois {
            if !poi.position().is_finite() {
                warn!(poi = %poi.id, "skipping POI with non-finite coordinates");
                continue;
            }
            grouped
                .entry(self.grid.tile_for(poi.position()))
                .or_default()
                .insert(poi.id.clone(), poi.clone());
        }
        if let Some(covered) = self.covering_tiles(bounds) {
            for tile in covered {
                grouped.entry(tile).or_default();
            }
        }

        let written = grouped.len();
        for (tile, fetched) in grouped {
            let key = TileKey::new(tile, filters);
            let tile_bounds = self.grid.tile_bounds(tile);
            let entry = if bounds.contains_bounds(&tile_bounds) {
                TileEntry {
                    pois: fetched.into_values().collect(),
                    fetched_at: now,
                    bounds: tile_bounds,
                    coverage: Some(tile_bounds),
                }
            } else {
                self.merge_partial(key, fetched, bounds, tile_bounds, now)
            };
            self.tiles.insert(key, Arc::new(entry));
        }
        self.counters
            .tiles_written
            .fetch_add(written as u64, Ordering::Relaxed);

        self.evict_over_capacity();
        written
    }

    fn merge_partial(
        &self,
        key: TileKey,
        mut merged: BTreeMap<PoiId, Poi>,
        bounds: &MapBounds,
        tile_bounds: MapBounds,
        now: Instant,
    ) -> TileEntry {
        let queried = bounds.intersection(&tile_bounds);
        let previous = self.tiles.get(&key).map(|e| Arc::clone(e.value()));
        let Some(previous) = previous else {
            return TileEntry {
                pois: merged.into_values().collect(),
                fetched_at: now,
                bounds: tile_bounds,
                coverage: queried,
            };
        };

        for poi in &previous.pois {
            if !bounds.contains(poi.position()) {
                merged
                    .entry(poi.id.clone())
                    .or_insert_with(|| poi.clone());
            }
        }

        let still_fresh = previous.age(now) <= self.config.ttl;
        let (fetched_at, coverage) = match queried {
            Some(area) if still_fresh && previous.covers(&area) => {
                (previous.fetched_at, previous.coverage)
            }
            Some(area) => (now, Some(area)),
            None if still_fresh => (previous.fetched_at, previous.coverage),
            None => (previous.fetched_at, None),
        };
        TileEntry {
            pois: merged.into_values().collect(),
            fetched_at,
            bounds: tile_bounds,
            coverage,
        }
    }

    /// Cached POIs matching `filters` from the 3×3 block around `center`,
    /// ranked, at most `limit`.
    pub fn get_cached_pois(
        &self,
        center: LatLng,
        filters: &PoiFilters,
        limit: usize,
    ) -> Vec<RankedPoi> {
        let center_tile = self.grid.tile_for(center);
        let entries: Vec<Arc<TileEntry>> = self
            .grid
            .neighborhood(center_tile, NEIGHBORHOOD_RADIUS)
            .iter()
            .filter_map(|tile| {
                self.tiles
                    .get(&TileKey::new(*tile, filters))
                    .map(|e| Arc::clone(e.value()))
            })
            .collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut ranked: Vec<RankedPoi> = Vec::new();
        for entry in &entries {
            for poi in &entry.pois {
                if !seen.insert(poi.id.as_str()) || !filters.matches(poi) {
                    continue;
                }
                let distance_km = haversine_km(center, poi.position());
                ranked.push(RankedPoi {
                    poi: poi.clone(),
                    distance_km,
                    priority_score: priority_score(poi.priority, distance_km),
                });
            }
        }

        ranked.sort_by(|a, b| {
            b.priority_score
                .total_cmp(&a.priority_score)
                .then(a.distance_km.total_cmp(&b.distance_km))
                .then_with(|| a.poi.id.cmp(&b.poi.id))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Adjacent tiles of `center` not fully fetched and fresh, at most `max_prefetch`.
    pub fn get_tiles_to_prefetch(
        &self,
        center: LatLng,
        filters: &PoiFilters,
        now: Instant,
    ) -> Vec<TileId> {
        let center_tile = self.grid.tile_for(center);
        self.grid
            .ring(center_tile)
            .into_iter()
            .filter(|tile| {
                !self.is_fresh(&TileKey::new(*tile, filters), None, self.config.ttl, now)
            })
            .take(self.config.max_prefetch)
            .collect()
    }

    /// Marks the tile holding the viewport centre; eviction never removes it.
    pub fn set_focus(&self, center: LatLng) {
        let tile = self.grid.tile_for(center);
        *self.focus.lock().unwrap_or_else(PoisonError::into_inner) = Some(tile);
    }

    pub fn focus(&self) -> Option<TileId> {
        *self.focus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every entry intersecting `bounds`, whatever its filters.
    pub fn invalidate(&self, bounds: &MapBounds) -> usize {
        let before = self.tiles.len();
        self.tiles
            .retain(|_, entry| !entry.bounds.intersects(bounds));
        before - self.tiles.len()
    }

    pub fn invalidate_all(&self) {
        self.tiles.clear();
    }

    pub fn entry(&self, key: &TileKey) -> Option<Arc<TileEntry>> {
        self.tiles.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            tiles: self.tiles.len(),
            fresh_checks: self.counters.fresh_checks.load(Ordering::Relaxed),
            fresh_hits: self.counters.fresh_hits.load(Ordering::Relaxed),
            tiles_written: self.counters.tiles_written.load(Ordering::Relaxed),
            tiles_evicted: self.counters.tiles_evicted.load(Ordering::Relaxed),
        }
    }

    fn evict_over_capacity(&self) {
        let len = self.tiles.len();
        if len <= self.config.max_tiles {
            return;
        }
        let focus = self.focus();
        let mut candidates: Vec<(Instant, TileKey)> = self
            .tiles
            .iter()
            .filter(|e| Some(e.key().tile) != focus)
            .map(|e| (e.value().fetched_at, *e.key()))
            .collect();
        candidates.sort();

        let excess = len - self.config.max_tiles;
        let mut evicted = 0usize;
        for (_, key) in candidates.into_iter().take(excess) {
            if self.tiles.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.counters
            .tiles_evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(evicted, remaining = self.tiles.len(), "evicted least recently fetched tiles");
    }
}
