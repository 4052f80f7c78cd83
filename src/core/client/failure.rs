//! Failure classification and adaptive change paging.
//!
//! HTTP and JMAP failures map onto a small set of outcomes the send loop
//! acts on. The classification is by observable effect: whether the batch
//! is discarded, retried through the auth module, or triggers session
//! repair.
//!
//! `/changes` paging escalates `maxChanges` per type along a fixed
//! schedule; when the ceiling is reached and the server still reports more
//! changes, the caller synthesizes the `cannotCalculateChanges` recovery
//! and the pager resets.

use std::time::Duration;

/// Escalation schedule for message-like types.
pub const MESSAGE_CHANGES_SCHEDULE: &[u32] = &[50, 100, 150];

/// Escalation schedule for thread-like types.
pub const THREAD_CHANGES_SCHEDULE: &[u32] = &[30, 100, 120];

/// What the send loop does with a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Drop the batch; pending callbacks are flushed with empty responses.
    Discard,

    /// Credentials were rejected; the batch is kept and re-sent after
    /// re-authentication.
    Reauthenticate,

    /// The API endpoint moved or the session is stale; refresh the session
    /// and re-send (bounded by configuration).
    RefreshSession,

    /// Transient server-side pressure; report failure with a backoff hint.
    Backoff(Duration),

    /// The server failed outright; surface it and drop the batch.
    ServerFailure,

    /// Hand the batch to the auth module's generic retry scheduler.
    Retry,
}

/// Classify a non-2xx HTTP status.
///
/// `will_retry` applies to statuses outside the explicit table: read-only
/// batches retry transparently, mutating batches are discarded rather than
/// blindly re-sent.
#[must_use]
pub fn classify_status(status: u16, will_retry: bool) -> FailureOutcome {
    match status {
        400 | 413 => FailureOutcome::Discard,
        401 => FailureOutcome::Reauthenticate,
        404 => FailureOutcome::RefreshSession,
        429 | 502 | 503 | 504 => FailureOutcome::Backoff(Duration::from_secs(30)),
        500 => FailureOutcome::ServerFailure,
        _ if will_retry => FailureOutcome::Retry,
        _ => FailureOutcome::Discard,
    }
}

/// Position of a pager within its escalation schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagerState {
    /// At the first schedule entry.
    Initial,
    /// At `schedule[step]`.
    Escalated(usize),
    /// The ceiling was hit with changes still outstanding.
    Maxed,
}

/// Adaptive `maxChanges` escalation for one record type.
///
/// # Examples
///
/// ```
/// use jmap_engine::core::client::{ChangesPager, MESSAGE_CHANGES_SCHEDULE};
///
/// let mut pager = ChangesPager::new(MESSAGE_CHANGES_SCHEDULE.to_vec());
/// assert_eq!(pager.current(), 50);
/// assert_eq!(pager.escalate(), Some(100));
/// assert_eq!(pager.escalate(), Some(150));
/// assert_eq!(pager.escalate(), None); // ceiling: force a resync
/// pager.reset();
/// assert_eq!(pager.current(), 50);
/// ```
#[derive(Debug, Clone)]
pub struct ChangesPager {
    schedule: Vec<u32>,
    state: PagerState,
}

impl ChangesPager {
    /// Create a pager over `schedule`; an empty schedule falls back to the
    /// message schedule.
    #[must_use]
    pub fn new(schedule: Vec<u32>) -> Self {
        let schedule = if schedule.is_empty() {
            MESSAGE_CHANGES_SCHEDULE.to_vec()
        } else {
            schedule
        };
        ChangesPager {
            schedule,
            state: PagerState::Initial,
        }
    }

    /// The `maxChanges` value to send now.
    #[must_use]
    pub fn current(&self) -> u32 {
        match self.state {
            PagerState::Initial => self.schedule[0],
            PagerState::Escalated(step) => self.schedule[step],
            PagerState::Maxed => *self.schedule.last().unwrap_or(&0),
        }
    }

    /// Move one step up the schedule because the server reported
    /// `hasMoreChanges`. Returns the next `maxChanges`, or `None` once the
    /// ceiling has been reached (the caller must force a resync).
    pub fn escalate(&mut self) -> Option<u32> {
        let next = match self.state {
            PagerState::Initial => 1,
            PagerState::Escalated(step) => step + 1,
            PagerState::Maxed => return None,
        };
        if next < self.schedule.len() {
            self.state = PagerState::Escalated(next);
            Some(self.schedule[next])
        } else {
            self.state = PagerState::Maxed;
            None
        }
    }

    /// Return to the start of the schedule.
    pub fn reset(&mut self) {
        self.state = PagerState::Initial;
    }
}
