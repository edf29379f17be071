use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};
use waypoint_shared::{MapBounds, ViewportSignal};

use crate::backend::PoiBackend;
use crate::config::StabilizerConfig;
use crate::coordinator::{FetchOutcome, ViewportFetchCoordinator};
use crate::stabilizer::BoundsStabilizer;
use crate::viewport::ViewportProvider;

/// Drives the stabilizer from viewport signals and publishes a fetch outcome
/// for every stable viewport. Returns once the signal channel closes.
pub async fn run<V, B>(
    viewport: V,
    mut signals: mpsc::Receiver<ViewportSignal>,
    coordinator: Arc<ViewportFetchCoordinator<B>>,
    outcomes: watch::Sender<Option<FetchOutcome>>,
    config: StabilizerConfig,
) where
    V: ViewportProvider,
    B: PoiBackend + ?Sized + 'static,
{
    let outcomes = Arc::new(outcomes);
    let published = Arc::new(AtomicU64::new(0));
    let mut stabilizer = BoundsStabilizer::new(config);
    let mut issued: u64 = 0;

    info!("viewport watcher started");

    loop {
        let deadline = stabilizer.next_deadline();
        let stable = tokio::select! {
            signal = signals.recv() => {
                let Some(signal) = signal else {
                    break;
                };
                let now = Instant::now();
                match signal {
                    ViewportSignal::Moved => stabilizer.on_viewport_event(&viewport, now),
                    ViewportSignal::InteractionStart => {
                        stabilizer.interaction_start();
                        None
                    }
                    ViewportSignal::InteractionEnd => {
                        stabilizer.interaction_end(now);
                        None
                    }
                }
            }
            _ = sleep_until(deadline) => stabilizer.poll(&viewport, Instant::now()),
        };

        if let Some(bounds) = stable {
            issued += 1;
            spawn_fetch(
                bounds,
                issued,
                Arc::clone(&coordinator),
                Arc::clone(&outcomes),
                Arc::clone(&published),
            );
        }
    }

    info!("viewport signal channel closed, watcher stopping");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn spawn_fetch<B>(
    bounds: MapBounds,
    sequence: u64,
    coordinator: Arc<ViewportFetchCoordinator<B>>,
    outcomes: Arc<watch::Sender<Option<FetchOutcome>>>,
    published: Arc<AtomicU64>,
) where
    B: PoiBackend + ?Sized + 'static,
{
    tokio::spawn(async move {
        let outcome = coordinator.fetch_pois(bounds, false).await;
        if outcome.is_superseded() {
            return;
        }
        // Outcomes from older viewports never replace newer ones.
        if published.fetch_max(sequence, Ordering::SeqCst) > sequence {
            debug!(sequence, "dropping outcome for an older viewport");
            return;
        }
        debug!(
            sequence,
            source = ?outcome.source,
            pois = outcome.pois.len(),
            "publishing fetch outcome"
        );
        outcomes.send_replace(Some(outcome));
    });
}
