//! Submission bookkeeping shared by the device and the deferred destruction queue.

use std::collections::VecDeque;
use std::fmt;
use keel_core::collections::SmallVec;

/// Monotonic id of a queue submission. Ids start at 1; [`SubmitId::NONE`] precedes them all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmitId(pub(crate) u64);

impl SubmitId {
    pub const NONE: Self = Self(0);

    #[inline]
    pub fn value(self) -> u64 { self.0 }

    #[inline]
    pub fn is_none(self) -> bool { self.0 == 0 }
}

impl fmt::Display for SubmitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One recording session, from `acquire_command_buffer` until submission or abandonment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SessionId(u64);

/// What a resource destroyed right now has to wait for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ReleasePoint {
    /// Newest submission already issued.
    pub after: SubmitId,
    /// Recordings that may still reference the resource. Each one adds its own submission
    /// once it is submitted, whatever order that happens in.
    pub open_sessions: SmallVec<[SessionId; 4]>,
}

/// In-flight submissions and the completion watermark derived from them.
///
/// Submissions may signal in any order. The watermark only moves past an id once every
/// earlier id has signaled too.
pub(crate) struct SubmissionTracker<S> {
    last_issued: SubmitId,
    in_flight: VecDeque<(SubmitId, S)>,
    completed_through: SubmitId,
    next_session: u64,
    open_sessions: SmallVec<[SessionId; 4]>,
}

impl<S> Default for SubmissionTracker<S> {
    fn default() -> Self {
        Self {
            last_issued: SubmitId::NONE,
            in_flight: VecDeque::new(),
            completed_through: SubmitId::NONE,
            next_session: 0,
            open_sessions: SmallVec::new(),
        }
    }
}

impl<S> SubmissionTracker<S> {
    /// Record a submission that is now on the GPU and return its id.
    pub fn push(&mut self, submission: S) -> SubmitId {
        self.last_issued = SubmitId(self.last_issued.0 + 1);
        self.in_flight.push_back((self.last_issued, submission));
        self.last_issued
    }

    /// Retire every signaled submission (in any order) and advance the watermark.
    pub fn poll(&mut self, mut is_complete: impl FnMut(&S) -> bool, mut retire: impl FnMut(S)) -> SubmitId {
        let mut index = 0;
        while index < self.in_flight.len() {
            if is_complete(&self.in_flight[index].1) {
                if let Some((_, submission)) = self.in_flight.remove(index) {
                    retire(submission);
                }
            } else {
                index += 1;
            }
        }

        self.completed_through = match self.in_flight.front() {
            Some((oldest_pending, _)) => SubmitId(oldest_pending.0 - 1),
            None => self.last_issued,
        };
        self.completed_through
    }

    pub fn begin_recording(&mut self) -> SessionId {
        self.next_session += 1;
        let session = SessionId(self.next_session);
        self.open_sessions.push(session);
        session
    }

    /// `session` was submitted or abandoned.
    pub fn end_recording(&mut self, session: SessionId) {
        let open = self.open_sessions.iter().position(|&open| open == session);
        debug_assert!(open.is_some(), "recording session {session:?} ended twice");
        if let Some(index) = open {
            self.open_sessions.remove(index);
        }
    }

    /// Everything a resource destroyed right now may still be used by.
    pub fn release_point(&self) -> ReleasePoint {
        ReleasePoint {
            after: self.last_issued,
            open_sessions: self.open_sessions.clone(),
        }
    }

    /// Every id at or below the returned one has signaled.
    #[inline]
    pub fn completed_through(&self) -> SubmitId { self.completed_through }

    #[cfg(test)]
    #[inline]
    pub fn last_issued(&self) -> SubmitId { self.last_issued }

    #[inline]
    pub fn pending(&self) -> usize { self.in_flight.len() }

    pub fn find(&self, id: SubmitId) -> Option<&S> {
        self.in_flight.iter().find(|(pending, _)| *pending == id).map(|(_, submission)| submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one() {
        let mut tracker = SubmissionTracker::<bool>::default();
        assert_eq!(tracker.completed_through(), SubmitId::NONE);
        assert_eq!(tracker.push(false).value(), 1);
        assert_eq!(tracker.push(false).value(), 2);
        assert_eq!(tracker.last_issued().value(), 2);
    }

    #[test]
    fn watermark_waits_for_the_oldest_submission() {
        // Submission payload is "has signaled".
        let mut tracker = SubmissionTracker::<std::cell::Cell<bool>>::default();
        let first = tracker.push(Default::default());
        let second = tracker.push(Default::default());

        tracker.find(second).unwrap().set(true);
        let mut retired = 0;
        tracker.poll(|s| s.get(), |_| retired += 1);
        assert_eq!(retired, 1);
        assert_eq!(tracker.completed_through(), SubmitId::NONE);

        tracker.find(first).unwrap().set(true);
        tracker.poll(|s| s.get(), |_| retired += 1);
        assert_eq!(retired, 2);
        assert_eq!(tracker.completed_through(), second);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn release_point_lists_open_sessions() {
        let mut tracker = SubmissionTracker::<()>::default();
        assert_eq!(tracker.release_point(), ReleasePoint::default());

        let first = tracker.begin_recording();
        let second = tracker.begin_recording();
        assert_ne!(first, second);
        assert_eq!(tracker.release_point().open_sessions.as_slice(), &[first, second]);

        // The later session is submitted first.
        tracker.push(());
        tracker.end_recording(second);
        let point = tracker.release_point();
        assert_eq!(point.after, SubmitId(1));
        assert_eq!(point.open_sessions.as_slice(), &[first]);

        tracker.end_recording(first);
        assert!(tracker.release_point().open_sessions.is_empty());
    }
}
