use tokio::time::Instant;
use tracing::trace;
use waypoint_shared::MapBounds;

use crate::config::StabilizerConfig;
use crate::viewport::ViewportProvider;

/// Single-shot timer the stabilizer reschedules instead of spawning sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Replaces any pending deadline.
    pub fn schedule(&mut self, at: Instant) {
        self.deadline = Some(at);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// Turns high-frequency viewport ticks into occasional "stable bounds" emissions.
///
/// Movement outside an interaction waits for the idle debounce. An explicit
/// interaction end switches to the shorter settle delay, and while the user is
/// still interacting nothing is scheduled at all. When the timer fires the
/// provider is read again so inertial motion after pointer-up is picked up.
#[derive(Debug)]
pub struct BoundsStabilizer {
    config: StabilizerConfig,
    last_emitted: Option<MapBounds>,
    pending: Option<MapBounds>,
    interacting: bool,
    settling: bool,
    timer: DebounceTimer,
}

impl BoundsStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            last_emitted: None,
            pending: None,
            interacting: false,
            settling: false,
            timer: DebounceTimer::default(),
        }
    }

    /// Pan/zoom/drag tick. Ignored while the provider cannot report bounds.
    pub fn on_viewport_event<V>(&mut self, viewport: &V, now: Instant) -> Option<MapBounds>
    where
        V: ViewportProvider + ?Sized,
    {
        let Some(bounds) = viewport.current_bounds() else {
            trace!("viewport not ready, ignoring event");
            return None;
        };
        self.observe(bounds, now)
    }

    /// Records new bounds; returns them only on the cold-start emission.
    pub fn observe(&mut self, bounds: MapBounds, now: Instant) -> Option<MapBounds> {
        let Some(last) = self.last_emitted else {
            return Some(self.emit(bounds));
        };

        if !bounds.differs_from(&last, self.config.threshold_deg) {
            // Back within jitter range of what was already emitted.
            self.pending = None;
            if !self.settling {
                self.timer.cancel();
            }
            return None;
        }

        self.pending = Some(bounds);
        if !self.interacting {
            let delay = if self.settling {
                self.config.settle_delay
            } else {
                self.config.idle_debounce
            };
            self.timer.schedule(now + delay);
        }
        None
    }

    pub fn interaction_start(&mut self) {
        self.interacting = true;
        self.settling = false;
        self.timer.cancel();
    }

    pub fn interaction_end(&mut self, now: Instant) {
        self.interacting = false;
        self.settling = true;
        self.timer.schedule(now + self.config.settle_delay);
    }

    /// Fires the timer if it is due and returns the bounds to emit, if any.
    pub fn poll<V>(&mut self, viewport: &V, now: Instant) -> Option<MapBounds>
    where
        V: ViewportProvider + ?Sized,
    {
        if self.interacting || !self.timer.is_due(now) {
            return None;
        }
        self.timer.cancel();
        self.settling = false;

        let pending = self.pending.take();
        let candidate = viewport.current_bounds().or(pending)?;
        match self.last_emitted {
            Some(last) if !candidate.differs_from(&last, self.config.threshold_deg) => None,
            _ => Some(self.emit(candidate)),
        }
    }

    fn emit(&mut self, bounds: MapBounds) -> MapBounds {
        trace!(?bounds, "stable bounds");
        self.last_emitted = Some(bounds);
        self.pending = None;
        bounds
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.interacting {
            None
        } else {
            self.timer.deadline()
        }
    }

    pub fn last_emitted(&self) -> Option<MapBounds> {
        self.last_emitted
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }
}
