//! Coalesces bursts of shader edits into a single rebuild.
//!
//! The debouncer never looks at a clock itself; every call takes the current
//! `Instant`, so the host can drive it from whatever loop it already has and
//! tests can step time explicitly.

use std::time::{Duration, Instant};

use engineconfig::PreviewConfig;
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DebounceError {
    #[error("rebuild ticket {ticket} is stale; generation {current} superseded it")]
    StaleTicket { ticket: u64, current: u64 },
}

/// A released edit that should be compiled now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket<T> {
    pub generation: u64,
    pub value: T,
}

#[derive(Debug)]
struct PendingEdit<T> {
    value: T,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<PendingEdit<T>>,
    generation: u64,
    last_attempt_failed: bool,
    attempts: u64,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
            generation: 0,
            last_attempt_failed: false,
            attempts: 0,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(config.debounce)
    }

    pub fn quiet_interval(&self) -> Duration {
        self.quiet
    }

    /// Records an edit and restarts the quiet interval.
    ///
    /// Any edit still waiting is replaced; only the newest value is ever
    /// released. A previous failure does not shortcut the wait.
    pub fn on_source_changed(&mut self, value: T, now: Instant) {
        self.generation = self.generation.wrapping_add(1);
        let restarted = self.pending.is_some();
        self.pending = Some(PendingEdit {
            value,
            deadline: now + self.quiet,
        });
        trace!(
            generation = self.generation,
            restarted,
            last_attempt_failed = self.last_attempt_failed,
            "source edit queued"
        );
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending edit will be released, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    /// Drops the pending edit. Tickets already handed out become stale.
    pub fn cancel(&mut self) -> Option<T> {
        let pending = self.pending.take()?;
        self.generation = self.generation.wrapping_add(1);
        debug!(generation = self.generation, "pending rebuild cancelled");
        Some(pending.value)
    }

    /// Releases the pending edit once its quiet interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Ticket<T>> {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|pending| now >= pending.deadline);
        if !due {
            return None;
        }
        let pending = self.pending.take()?;
        self.attempts = self.attempts.saturating_add(1);
        debug!(
            generation = self.generation,
            attempts = self.attempts,
            "quiet interval elapsed; releasing rebuild"
        );
        Some(Ticket {
            generation: self.generation,
            value: pending.value,
        })
    }

    /// Releases the pending edit without waiting out the quiet interval.
    pub fn flush(&mut self) -> Option<Ticket<T>> {
        let deadline = self.deadline()?;
        self.poll(deadline)
    }

    /// Whether a ticket still describes the newest edit.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.pending.is_none()
    }

    /// Stores the result of compiling a ticket.
    ///
    /// Outcomes for superseded tickets are rejected and leave the failure flag
    /// untouched, so the caller must not install what it built for them.
    pub fn record_outcome(&mut self, generation: u64, succeeded: bool) -> Result<(), DebounceError> {
        if !self.is_current(generation) {
            return Err(DebounceError::StaleTicket {
                ticket: generation,
                current: self.generation,
            });
        }
        self.last_attempt_failed = !succeeded;
        Ok(())
    }

    pub fn last_attempt_failed(&self) -> bool {
        self.last_attempt_failed
    }

    /// Number of edits released for compilation so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(1000);

    #[test]
    fn burst_of_edits_releases_only_the_last() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();
        for (index, source) in ["v", "vo", "voi", "void"].iter().enumerate() {
            let now = start + Duration::from_millis(200 * index as u64);
            debouncer.on_source_changed(source.to_string(), now);
            assert!(debouncer.poll(now).is_none());
        }

        let last_edit = start + Duration::from_millis(600);
        assert!(debouncer.poll(last_edit + QUIET - Duration::from_millis(1)).is_none());
        let ticket = debouncer.poll(last_edit + QUIET).expect("released");
        assert_eq!(ticket.value, "void");
        assert_eq!(debouncer.attempts(), 1);
        assert!(debouncer.poll(last_edit + QUIET * 3).is_none());
        assert_eq!(debouncer.attempts(), 1);
    }

    #[test]
    fn edit_after_failure_still_waits() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();
        debouncer.on_source_changed("broken", start);
        let ticket = debouncer.poll(start + QUIET).unwrap();
        debouncer.record_outcome(ticket.generation, false).unwrap();
        assert!(debouncer.last_attempt_failed());

        let edit = start + QUIET * 2;
        debouncer.on_source_changed("fixed", edit);
        assert!(debouncer.poll(edit).is_none());
        assert!(debouncer.poll(edit + QUIET / 2).is_none());
        let ticket = debouncer.poll(edit + QUIET).unwrap();
        debouncer.record_outcome(ticket.generation, true).unwrap();
        assert!(!debouncer.last_attempt_failed());
    }

    #[test]
    fn stale_ticket_outcome_is_rejected() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();
        debouncer.on_source_changed(1, start);
        let ticket = debouncer.poll(start + QUIET).unwrap();
        debouncer.on_source_changed(2, start + QUIET);

        let err = debouncer.record_outcome(ticket.generation, false).unwrap_err();
        assert!(matches!(err, DebounceError::StaleTicket { .. }));
        assert!(!debouncer.last_attempt_failed());
    }

    #[test]
    fn cancel_drops_pending_edit() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();
        debouncer.on_source_changed("draft", start);
        assert_eq!(debouncer.deadline(), Some(start + QUIET));
        assert_eq!(debouncer.cancel(), Some("draft"));
        assert!(!debouncer.is_pending());
        assert!(debouncer.poll(start + QUIET * 2).is_none());
        assert_eq!(debouncer.cancel(), None);
        assert_eq!(debouncer.attempts(), 0);
    }

    #[test]
    fn cancel_invalidates_released_ticket() {
        let mut debouncer = Debouncer::new(QUIET);
        let start = Instant::now();
        debouncer.on_source_changed("a", start);
        let ticket = debouncer.poll(start + QUIET).unwrap();
        debouncer.on_source_changed("b", start + QUIET);
        debouncer.cancel();
        assert!(!debouncer.is_current(ticket.generation));
    }

    #[test]
    fn built_from_preview_config() {
        let config = PreviewConfig {
            debounce: Duration::from_millis(250),
            ..PreviewConfig::default()
        };
        let debouncer: Debouncer<String> = Debouncer::from_config(&config);
        assert_eq!(debouncer.quiet_interval(), Duration::from_millis(250));
    }
}
