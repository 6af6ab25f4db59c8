//! Debounce and single-flight scheduling for one repository.
//!
//! The session feeds events and timer expiries into a [`Debouncer`] and
//! asks it whether a computation should start now. The debouncer never
//! allows two computations to overlap: events that arrive while one is
//! running only mark a follow-up, which is scheduled once it finishes.

use std::time::Duration;

use tokio::time::Instant;

/// Scheduling phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing pending.
    Idle,
    /// A computation starts at `deadline` unless more events push it back.
    Pending { deadline: Instant },
    /// A computation is running. `rerun` holds the widest window requested
    /// by events that arrived meanwhile.
    Computing { rerun: Option<Duration> },
}

/// Coalesces change events into computations.
#[derive(Debug)]
pub struct Debouncer {
    phase: Phase,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debouncer {
    #[must_use]
    pub const fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Instant the pending computation is due, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Pending { deadline } => Some(deadline),
            Phase::Idle | Phase::Computing { .. } => None,
        }
    }

    /// Record a change event that asks for a computation `window` from now.
    ///
    /// An already pending deadline is only ever pushed later, never earlier,
    /// so a burst mixing both windows settles on the longest one.
    pub fn on_event(&mut self, window: Duration, now: Instant) {
        self.phase = match self.phase {
            Phase::Idle => Phase::Pending {
                deadline: now + window,
            },
            Phase::Pending { deadline } => Phase::Pending {
                deadline: deadline.max(now + window),
            },
            Phase::Computing { rerun } => Phase::Computing {
                rerun: Some(rerun.map_or(window, |w| w.max(window))),
            },
        };
    }

    /// Ask for an immediate computation.
    ///
    /// Returns `true` if the caller should start computing now. While a
    /// computation runs, a follow-up with no extra delay is queued instead.
    pub fn request_now(&mut self, _now: Instant) -> bool {
        match self.phase {
            Phase::Idle | Phase::Pending { .. } => {
                self.phase = Phase::Computing { rerun: None };
                true
            }
            Phase::Computing { rerun } => {
                self.phase = Phase::Computing {
                    rerun: Some(rerun.unwrap_or(Duration::ZERO)),
                };
                false
            }
        }
    }

    /// The timer fired. Returns `true` if the caller should start computing.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Pending { deadline } if deadline <= now => {
                self.phase = Phase::Computing { rerun: None };
                true
            }
            _ => false,
        }
    }

    /// The running computation finished.
    pub fn on_computed(&mut self, now: Instant) {
        self.phase = match self.phase {
            Phase::Computing { rerun: Some(window) } => Phase::Pending {
                deadline: now + window,
            },
            _ => Phase::Idle,
        };
    }

    #[must_use]
    pub const fn is_computing(&self) -> bool {
        matches!(self.phase, Phase::Computing { .. })
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: Duration = Duration::from_millis(400);
    const METADATA: Duration = Duration::from_millis(800);

    #[test]
    fn test_events_extend_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        debouncer.on_event(CONTENT, start);
        assert_eq!(debouncer.deadline(), Some(start + CONTENT));

        let later = start + Duration::from_millis(300);
        debouncer.on_event(CONTENT, later);
        assert_eq!(debouncer.deadline(), Some(later + CONTENT));

        assert!(!debouncer.on_timer(start + CONTENT));
        assert!(debouncer.on_timer(later + CONTENT));
        assert!(debouncer.is_computing());
    }

    #[test]
    fn test_deadline_never_moves_earlier() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        debouncer.on_event(METADATA, start);
        debouncer.on_event(CONTENT, start + Duration::from_millis(100));
        assert_eq!(debouncer.deadline(), Some(start + METADATA));
    }

    #[test]
    fn test_events_during_compute_schedule_one_rerun() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        assert!(debouncer.request_now(start));
        debouncer.on_event(CONTENT, start);
        debouncer.on_event(METADATA, start);
        debouncer.on_event(CONTENT, start);
        assert_eq!(debouncer.phase(), Phase::Computing { rerun: Some(METADATA) });

        let done = start + Duration::from_secs(1);
        debouncer.on_computed(done);
        assert_eq!(debouncer.deadline(), Some(done + METADATA));
    }

    #[test]
    fn test_request_now_while_computing_queues_followup() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        assert!(debouncer.request_now(start));
        assert!(!debouncer.request_now(start));
        debouncer.on_computed(start);
        assert_eq!(debouncer.deadline(), Some(start));
        assert!(debouncer.on_timer(start));
    }

    #[test]
    fn test_request_now_preempts_pending() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        debouncer.on_event(CONTENT, start);
        assert!(debouncer.request_now(start));
        assert_eq!(debouncer.deadline(), None);
        debouncer.on_computed(start);
        assert_eq!(debouncer.phase(), Phase::Idle);
    }

    #[test]
    fn test_timer_when_idle_is_noop() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.on_timer(Instant::now()));
        assert_eq!(debouncer.phase(), Phase::Idle);
    }
}
