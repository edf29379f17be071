use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;
use waypoint_shared::{LatLng, MapBounds, Poi, PoiId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IconVariant {
    #[default]
    Normal,
    Highlighted,
    Selected,
}

pub type SelectCallback = Arc<dyn Fn(&Poi) + Send + Sync>;
pub type ClickHandler = Box<dyn Fn() + Send + Sync>;

/// A visual marker living on some external map surface.
pub trait MarkerHandle {
    type Surface;

    fn set_icon(&mut self, icon: IconVariant);
    fn set_visible(&mut self, visible: bool);
    /// `None` detaches the marker from its surface.
    fn set_map(&mut self, surface: Option<&Self::Surface>);
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub poi_id: PoiId,
    pub title: String,
    pub position: LatLng,
    pub icon: IconVariant,
}

pub trait MarkerFactory {
    type Handle: MarkerHandle;

    fn create(&mut self, spec: MarkerSpec, on_click: ClickHandler) -> Self::Handle;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub hidden: usize,
    pub shown: usize,
}

struct PooledMarker<H> {
    handle: H,
    position: LatLng,
    icon: IconVariant,
    visible: bool,
    /// Present in the latest POI set.
    active: bool,
}

/// What a click resolves against: always the latest reconcile call.
#[derive(Default)]
struct ClickTargets {
    pois: HashMap<PoiId, Poi>,
    on_select: Option<SelectCallback>,
}

/// Keeps one marker per POI id alive across refreshes.
///
/// Markers missing from the latest POI set are hidden, not destroyed, so a
/// POI reappearing after a pan reuses its handle. Handles are only dropped by
/// [`forget`](Self::forget), [`teardown`](Self::teardown) or when the
/// reconciler itself is dropped.
pub struct MarkerPoolReconciler<F: MarkerFactory> {
    factory: F,
    surface: <F::Handle as MarkerHandle>::Surface,
    markers: HashMap<PoiId, PooledMarker<F::Handle>>,
    targets: Arc<RwLock<ClickTargets>>,
    viewport: Option<MapBounds>,
    selected: Option<PoiId>,
    highlighted: HashSet<PoiId>,
}

impl<F: MarkerFactory> MarkerPoolReconciler<F> {
    pub fn new(factory: F, surface: <F::Handle as MarkerHandle>::Surface) -> Self {
        Self {
            factory,
            surface,
            markers: HashMap::new(),
            targets: Arc::new(RwLock::new(ClickTargets::default())),
            viewport: None,
            selected: None,
            highlighted: HashSet::new(),
        }
    }

    pub fn reconcile(&mut self, pois: &[Poi], on_select: SelectCallback) -> ReconcileReport {
        {
            let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
            targets.pois = pois
                .iter()
                .map(|poi| (poi.id.clone(), poi.clone()))
                .collect();
            targets.on_select = Some(on_select);
        }

        let mut report = ReconcileReport::default();
        let mut current: HashSet<&str> = HashSet::with_capacity(pois.len());
        for poi in pois {
            if !current.insert(poi.id.as_str()) {
                continue;
            }
            let icon = self.icon_for(&poi.id);
            match self.markers.get_mut(&poi.id) {
                Some(marker) if marker.position == poi.position() => {
                    marker.active = true;
                    if marker.icon != icon {
                        marker.handle.set_icon(icon);
                        marker.icon = icon;
                        report.updated += 1;
                    }
                }
                Some(_) => {
                    // Handles cannot move; swap in a new one at the new position.
                    if let Some(mut stale) = self.markers.remove(&poi.id) {
                        stale.handle.set_visible(false);
                        stale.handle.set_map(None);
                    }
                    self.create_marker(poi, icon);
                    report.created += 1;
                }
                None => {
                    self.create_marker(poi, icon);
                    report.created += 1;
                }
            }
        }

        for (id, marker) in self.markers.iter_mut() {
            if marker.active && !current.contains(id.as_str()) {
                marker.active = false;
            }
        }

        let visibility = self.refresh_visibility();
        report.shown = visibility.shown;
        report.hidden = visibility.hidden;
        debug!(
            created = report.created,
            updated = report.updated,
            hidden = report.hidden,
            shown = report.shown,
            pooled = self.markers.len(),
            "reconciled markers"
        );
        report
    }

    /// Settled-viewport visibility pass; only markers in the latest POI set
    /// and inside `bounds` are shown.
    pub fn apply_viewport(&mut self, bounds: MapBounds) -> ReconcileReport {
        self.viewport = Some(bounds);
        self.refresh_visibility()
    }

    /// Selects one marker (or clears the selection); icons change in place.
    pub fn select(&mut self, id: Option<&str>) -> usize {
        self.selected = id.map(str::to_string);
        self.refresh_icons()
    }

    pub fn set_highlighted<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<PoiId>,
    {
        self.highlighted = ids.into_iter().map(Into::into).collect();
        self.refresh_icons()
    }

    /// Permanently destroys the marker for `id`.
    pub fn forget(&mut self, id: &str) -> bool {
        let Some(mut marker) = self.markers.remove(id) else {
            return false;
        };
        marker.handle.set_visible(false);
        marker.handle.set_map(None);
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pois
            .remove(id);
        true
    }

    /// Detaches and drops every marker.
    pub fn teardown(&mut self) {
        if self.markers.is_empty() {
            return;
        }
        let count = self.markers.len();
        for (_, mut marker) in self.markers.drain() {
            marker.handle.set_map(None);
        }
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        targets.pois.clear();
        targets.on_select = None;
        debug!(count, "tore down marker pool");
    }

    pub fn handle(&self, id: &str) -> Option<&F::Handle> {
        self.markers.get(id).map(|marker| &marker.handle)
    }

    pub fn is_visible(&self, id: &str) -> bool {
        self.markers.get(id).is_some_and(|marker| marker.visible)
    }

    pub fn icon(&self, id: &str) -> Option<IconVariant> {
        self.markers.get(id).map(|marker| marker.icon)
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn visible_count(&self) -> usize {
        self.markers.values().filter(|marker| marker.visible).count()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn surface(&self) -> &<F::Handle as MarkerHandle>::Surface {
        &self.surface
    }

    fn icon_for(&self, id: &str) -> IconVariant {
        if self.selected.as_deref() == Some(id) {
            IconVariant::Selected
        } else if self.highlighted.contains(id) {
            IconVariant::Highlighted
        } else {
            IconVariant::Normal
        }
    }

    fn create_marker(&mut self, poi: &Poi, icon: IconVariant) {
        let spec = MarkerSpec {
            poi_id: poi.id.clone(),
            title: poi.name.clone(),
            position: poi.position(),
            icon,
        };
        let mut handle = self.factory.create(spec, self.click_handler(&poi.id));
        handle.set_visible(false);
        handle.set_map(Some(&self.surface));
        self.markers.insert(
            poi.id.clone(),
            PooledMarker {
                handle,
                position: poi.position(),
                icon,
                visible: false,
                active: true,
            },
        );
    }

    /// Resolves the POI and callback when clicked, never when created.
    fn click_handler(&self, id: &PoiId) -> ClickHandler {
        let targets = Arc::clone(&self.targets);
        let id = id.clone();
        Box::new(move || {
            let (poi, on_select) = {
                let targets = targets.read().unwrap_or_else(PoisonError::into_inner);
                (targets.pois.get(&id).cloned(), targets.on_select.clone())
            };
            match (poi, on_select) {
                (Some(poi), Some(on_select)) => on_select(&poi),
                _ => debug!(poi = %id, "ignoring click on marker without a current POI"),
            }
        })
    }

    fn refresh_icons(&mut self) -> usize {
        let mut changed = 0;
        let desired: Vec<(PoiId, IconVariant)> = self
            .markers
            .keys()
            .map(|id| (id.clone(), self.icon_for(id)))
            .collect();
        for (id, icon) in desired {
            if let Some(marker) = self.markers.get_mut(&id)
                && marker.icon != icon
            {
                marker.handle.set_icon(icon);
                marker.icon = icon;
                changed += 1;
            }
        }
        changed
    }

    fn refresh_visibility(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let viewport = self.viewport;
        for marker in self.markers.values_mut() {
            let show = marker.active
                && viewport.is_none_or(|bounds| bounds.contains(marker.position));
            if show == marker.visible {
                continue;
            }
            marker.handle.set_visible(show);
            marker.visible = show;
            if show {
                report.shown += 1;
            } else {
                report.hidden += 1;
            }
        }
        report
    }
}

impl<F: MarkerFactory> Drop for MarkerPoolReconciler<F> {
    fn drop(&mut self) {
        self.teardown();
    }
}
