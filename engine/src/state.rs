use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use waypoint_shared::Notice;

use crate::config::{DEFAULT_NOTICE_BUFFER, EngineConfig};
use crate::governor::FetchGovernor;
use crate::tile_cache::GeographicTileCache;

/// The process-wide pieces every viewport consumer shares.
///
/// Cloning is cheap; clones point at the same cache, governor and notice channel.
#[derive(Clone)]
pub struct EngineState {
    pub tile_cache: Arc<GeographicTileCache>,
    pub governor: Arc<FetchGovernor>,
    pub notices: broadcast::Sender<Notice>,
    pub counters: Arc<EngineCounters>,
    pub config: EngineConfig,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Self {
        let (notices, _) = broadcast::channel(DEFAULT_NOTICE_BUFFER);
        Self {
            tile_cache: Arc::new(GeographicTileCache::new(config.tile_cache.clone())),
            governor: Arc::new(FetchGovernor::new(
                config.governor.clone(),
                notices.clone(),
            )),
            notices,
            counters: Arc::new(EngineCounters::default()),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

#[derive(Debug, Default)]
pub struct EngineCounters {
    cache_hits_total: AtomicU64,
    network_fetches_total: AtomicU64,
    throttled_total: AtomicU64,
    stale_fallbacks_total: AtomicU64,
    empty_results_total: AtomicU64,
    superseded_total: AtomicU64,
    prefetched_tiles_total: AtomicU64,
    revalidations_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub cache_hits_total: u64,
    pub network_fetches_total: u64,
    pub throttled_total: u64,
    pub stale_fallbacks_total: u64,
    pub empty_results_total: u64,
    pub superseded_total: u64,
    pub prefetched_tiles_total: u64,
    pub revalidations_total: u64,
}

impl EngineCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            cache_hits_total: self.cache_hits_total.load(Ordering::Relaxed),
            network_fetches_total: self.network_fetches_total.load(Ordering::Relaxed),
            throttled_total: self.throttled_total.load(Ordering::Relaxed),
            stale_fallbacks_total: self.stale_fallbacks_total.load(Ordering::Relaxed),
            empty_results_total: self.empty_results_total.load(Ordering::Relaxed),
            superseded_total: self.superseded_total.load(Ordering::Relaxed),
            prefetched_tiles_total: self.prefetched_tiles_total.load(Ordering::Relaxed),
            revalidations_total: self.revalidations_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_fetch(&self) {
        self.network_fetches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_fallback(&self) {
        self.stale_fallbacks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_result(&self) {
        self.empty_results_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.superseded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetched_tiles(&self, count: u64) {
        self.prefetched_tiles_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_revalidation(&self) {
        self.revalidations_total.fetch_add(1, Ordering::Relaxed);
    }
}
