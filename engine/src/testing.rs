//! Test doubles shared by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use waypoint_shared::{MapBounds, Poi, PoiQuery};

use crate::backend::{PoiBackend, QueryResult};
use crate::error::BackendError;

pub(crate) enum Scripted {
    Ok(Vec<Poi>),
    Fail,
    /// Resolves when the test sends POIs on the paired channel.
    Gate(oneshot::Receiver<Vec<Poi>>),
}

/// Backend replaying scripted responses in call order; empty results once exhausted.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Scripted>>,
    queries: Mutex<Vec<PoiQuery>>,
}

impl ScriptedBackend {
    pub(crate) fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(script.into_iter().collect()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, response: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> Vec<PoiQuery> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PoiBackend for ScriptedBackend {
    fn query<'a>(&'a self, query: &'a PoiQuery) -> BoxFuture<'a, QueryResult> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match next {
                None => Ok(Vec::new()),
                Some(Scripted::Ok(pois)) => Ok(pois),
                Some(Scripted::Fail) => Err(BackendError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
                Some(Scripted::Gate(rx)) => rx
                    .await
                    .map_err(|_| BackendError::Rejected("gate dropped".to_string())),
            }
        })
    }
}

pub(crate) fn bounds(north: f64, south: f64, east: f64, west: f64) -> MapBounds {
    MapBounds::new(north, south, east, west).expect("valid bounds")
}

/// Viewport used by the end-to-end scenarios.
pub(crate) fn rimini_bounds() -> MapBounds {
    bounds(44.10, 44.00, 12.60, 12.50)
}

pub(crate) fn rimini_pois() -> Vec<Poi> {
    vec![
        Poi::new("arco", "Arco d'Augusto", "monument", 44.051, 12.551),
        Poi::new("borgo", "Borgo San Giuliano", "village", 44.02, 12.52),
        Poi::new("castel", "Castel Sismondo", "castle", 44.09, 12.58),
        Poi::new("duomo", "Tempio Malatestiano", "church", 44.06, 12.54),
        Poi::new("parco", "Parco Fellini", "park", 44.01, 12.59),
    ]
}
