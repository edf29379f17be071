use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use waypoint_shared::{Notice, RequestKey};

use crate::config::GovernorConfig;

/// Outcome of asking the governor for permission to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Same request key as the last accepted fetch.
    Duplicate,
    TooSoon { retry_in: Duration },
    BreakerOpen { remaining: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorSnapshot {
    pub recent_fetches: usize,
    pub failure_count: u32,
    pub breaker_remaining: Option<Duration>,
}

#[derive(Debug, Default)]
struct GovernorState {
    recent: VecDeque<Instant>,
    last_key: Option<RequestKey>,
    last_accepted_at: Option<Instant>,
    failure_count: u32,
    breaker_open_until: Option<Instant>,
    notice_sent: bool,
}

impl GovernorState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn open_remaining(&self, now: Instant) -> Option<Duration> {
        self.breaker_open_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }
}

/// Rate limiter plus circuit breaker shared by every viewport consumer.
///
/// Construct one per process (or per test) and hand it out behind an `Arc`.
#[derive(Debug)]
pub struct FetchGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
    notices: broadcast::Sender<Notice>,
}

impl FetchGovernor {
    pub fn new(config: GovernorConfig, notices: broadcast::Sender<Notice>) -> Self {
        Self {
            config,
            state: Mutex::new(GovernorState::default()),
            notices,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allow(&self, key: RequestKey, now: Instant) -> Decision {
        let mut state = self.lock();
        self.close_if_elapsed(&mut state, now);

        if let Some(remaining) = state.open_remaining(now) {
            return Decision::BreakerOpen { remaining };
        }

        if state.last_key == Some(key)
            && state
                .last_accepted_at
                .is_some_and(|at| now.saturating_duration_since(at) < self.config.duplicate_window)
        {
            return Decision::Duplicate;
        }

        if let Some(at) = state.last_accepted_at {
            let elapsed = now.saturating_duration_since(at);
            if elapsed < self.config.min_interval {
                return Decision::TooSoon {
                    retry_in: self.config.min_interval - elapsed,
                };
            }
        }

        state.prune(now, self.config.window);
        if state.recent.len() + 1 > self.config.max_per_window {
            warn!(
                accepted = state.recent.len(),
                window_secs = self.config.window.as_secs(),
                "fetch ceiling exceeded, opening breaker"
            );
            self.open_breaker(&mut state, now);
            return Decision::BreakerOpen {
                remaining: self.config.cooldown,
            };
        }

        state.recent.push_back(now);
        state.last_key = Some(key);
        state.last_accepted_at = Some(now);
        Decision::Allowed
    }

    pub fn record_success(&self) {
        self.lock().failure_count = 0;
    }

    pub fn record_failure(&self, now: Instant) {
        let mut state = self.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        debug!(failure_count = state.failure_count, "fetch failure recorded");
        if state.failure_count >= self.config.failure_threshold
            && state.open_remaining(now).is_none()
        {
            warn!(
                failure_count = state.failure_count,
                "repeated fetch failures, opening breaker"
            );
            self.open_breaker(&mut state, now);
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        let mut state = self.lock();
        self.close_if_elapsed(&mut state, now);
        state.open_remaining(now).is_some()
    }

    pub fn snapshot(&self, now: Instant) -> GovernorSnapshot {
        let mut state = self.lock();
        self.close_if_elapsed(&mut state, now);
        state.prune(now, self.config.window);
        GovernorSnapshot {
            recent_fetches: state.recent.len(),
            failure_count: state.failure_count,
            breaker_remaining: state.open_remaining(now),
        }
    }

    fn open_breaker(&self, state: &mut GovernorState, now: Instant) {
        state.breaker_open_until = Some(now + self.config.cooldown);
        if !state.notice_sent {
            state.notice_sent = true;
            let _ = self.notices.send(Notice::ProtectionEngaged {
                cooldown_secs: self.config.cooldown.as_secs(),
            });
        }
    }

    fn close_if_elapsed(&self, state: &mut GovernorState, now: Instant) {
        let Some(until) = state.breaker_open_until else {
            return;
        };
        if now < until {
            return;
        }
        info!("fetch breaker closed");
        state.breaker_open_until = None;
        state.notice_sent = false;
        state.failure_count = 0;
        state.recent.clear();
        state.last_key = None;
    }
}
