use std::collections::VecDeque;
use keel_core::collections::SmallVec;
use crate::submit::{ReleasePoint, SessionId, SubmitId};

/// Native teardown captured at logical destruction time, run once the GPU is done.
pub type DeferredTask<C> = Box<dyn FnOnce(&C) + Send>;

/// Result of the most recent drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastFreedStats {
    pub freed: usize,
    pub completed_through: SubmitId,
}

struct Entry<C> {
    after: SubmitId,
    sessions: SmallVec<[SessionId; 4]>,
    task: DeferredTask<C>,
}

/// Queue of teardown tasks, each gated on a release point.
///
/// A task runs once every recording session that was open when it was queued has ended and
/// every submission up to its tag has signaled. Submitting one of those sessions raises the
/// tag to that submission; abandoning it just drops the session. Ready tasks run in the
/// order they were queued.
pub(crate) struct DeferReleaseQueue<C> {
    tasks: VecDeque<Entry<C>>,
    last_freed: LastFreedStats,
}

impl<C> Default for DeferReleaseQueue<C> {
    fn default() -> Self {
        Self {
            tasks: VecDeque::new(),
            last_freed: LastFreedStats::default(),
        }
    }
}

impl<C> DeferReleaseQueue<C> {
    pub fn push(&mut self, point: ReleasePoint, task: DeferredTask<C>) {
        self.tasks.push_back(Entry {
            after: point.after,
            sessions: point.open_sessions,
            task,
        });
    }

    /// `session` was submitted as `submitted`, or abandoned when that is `None`.
    pub fn session_ended(&mut self, session: SessionId, submitted: Option<SubmitId>) {
        for entry in &mut self.tasks {
            let Some(index) = entry.sessions.iter().position(|&waiting| waiting == session) else {
                continue;
            };
            entry.sessions.remove(index);
            if let Some(id) = submitted {
                entry.after = entry.after.max(id);
            }
        }
    }

    /// Pop every task whose release point has passed. The caller runs them outside any lock.
    pub fn take_ready(&mut self, completed_through: SubmitId) -> Vec<DeferredTask<C>> {
        let mut ready = Vec::new();
        let mut pending = VecDeque::with_capacity(self.tasks.len());
        for entry in self.tasks.drain(..) {
            if entry.sessions.is_empty() && entry.after <= completed_through {
                ready.push(entry.task);
            } else {
                pending.push_back(entry);
            }
        }
        self.tasks = pending;
        self.last_freed = LastFreedStats { freed: ready.len(), completed_through };
        ready
    }

    /// Pop everything regardless of completion; used once the device is idle.
    pub fn take_all(&mut self) -> Vec<DeferredTask<C>> {
        let ready: Vec<_> = self.tasks.drain(..).map(|entry| entry.task).collect();
        self.last_freed.freed = ready.len();
        ready
    }

    #[inline]
    pub fn last_freed(&self) -> LastFreedStats { self.last_freed }

    #[inline]
    pub fn len(&self) -> usize { self.tasks.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::collections::smallvec;
    use parking_lot::Mutex;
    use crate::submit::SubmissionTracker;

    type Log = Mutex<Vec<&'static str>>;

    fn task(name: &'static str) -> DeferredTask<Log> {
        Box::new(move |log: &Log| log.lock().push(name))
    }

    fn after(id: u64) -> ReleasePoint {
        ReleasePoint { after: SubmitId(id), open_sessions: smallvec![] }
    }

    fn run(queue: &mut DeferReleaseQueue<Log>, completed_through: u64, log: &Log) {
        for t in queue.take_ready(SubmitId(completed_through)) {
            t(log);
        }
    }

    #[test]
    fn tasks_wait_for_their_submission() {
        let log = Log::default();
        let mut queue = DeferReleaseQueue::<Log>::default();
        queue.push(after(0), task("unused"));
        queue.push(after(1), task("first"));
        queue.push(after(2), task("second"));

        run(&mut queue, 0, &log);
        assert_eq!(*log.lock(), vec!["unused"]);
        assert_eq!(queue.len(), 2);

        run(&mut queue, 1, &log);
        assert_eq!(*log.lock(), vec!["unused", "first"]);
        assert_eq!(queue.last_freed(), LastFreedStats { freed: 1, completed_through: SubmitId(1) });

        for t in queue.take_all() {
            t(&log);
        }
        assert_eq!(*log.lock(), vec!["unused", "first", "second"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn ready_tasks_keep_queue_order() {
        let log = Log::default();
        let mut queue = DeferReleaseQueue::<Log>::default();
        queue.push(after(3), task("third"));
        queue.push(after(1), task("first"));
        queue.push(after(2), task("second"));

        run(&mut queue, 2, &log);
        assert_eq!(*log.lock(), vec!["first", "second"]);
        run(&mut queue, 3, &log);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn open_sessions_hold_tasks_until_their_submission_signals() {
        let log = Log::default();
        let mut tracker = SubmissionTracker::<()>::default();
        let mut queue = DeferReleaseQueue::<Log>::default();

        let early = tracker.begin_recording();
        queue.push(tracker.release_point(), task("buffer"));
        let late = tracker.begin_recording();

        // The session opened after the destroy is submitted and signals first.
        let late_id = tracker.push(());
        tracker.end_recording(late);
        queue.session_ended(late, Some(late_id));
        run(&mut queue, late_id.value(), &log);
        assert!(log.lock().is_empty());

        let early_id = tracker.push(());
        tracker.end_recording(early);
        queue.session_ended(early, Some(early_id));
        run(&mut queue, late_id.value(), &log);
        assert!(log.lock().is_empty());

        run(&mut queue, early_id.value(), &log);
        assert_eq!(*log.lock(), vec!["buffer"]);
    }

    #[test]
    fn abandoned_sessions_stop_holding_tasks() {
        let log = Log::default();
        let mut tracker = SubmissionTracker::<()>::default();
        let mut queue = DeferReleaseQueue::<Log>::default();

        let session = tracker.begin_recording();
        queue.push(tracker.release_point(), task("texture"));
        run(&mut queue, 0, &log);
        assert!(log.lock().is_empty());

        tracker.end_recording(session);
        queue.session_ended(session, None);
        run(&mut queue, 0, &log);
        assert_eq!(*log.lock(), vec!["texture"]);
    }
}
