use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One unit of work: simulate box `box_index` under the given sunlight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxTask {
    pub box_index: usize,
    pub sun_intensity: f32,
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<BoxTask>,
    in_progress: usize,
}

/// FIFO task queue shared by the worker pool.
///
/// Workers pop with [`TaskScheduler::wait_for_task`] and must call
/// [`TaskScheduler::finish`] once per popped task. The scheduler is idle
/// when the queue is empty and no task is in progress.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, task: BoxTask) {
        self.lock().tasks.push_back(task);
        self.available.notify_one();
    }

    pub fn push_many(&self, tasks: impl IntoIterator<Item = BoxTask>) -> usize {
        let pushed = {
            let mut state = self.lock();
            let before = state.tasks.len();
            state.tasks.extend(tasks);
            state.tasks.len() - before
        };
        if pushed > 0 {
            self.available.notify_all();
        }
        pushed
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<BoxTask> {
        let mut state = self.lock();
        let task = state.tasks.pop_front()?;
        state.in_progress += 1;
        Some(task)
    }

    /// Pop, waiting up to `timeout` if the queue is empty.
    pub fn wait_for_task(&self, timeout: Duration) -> Option<BoxTask> {
        let mut state = self.lock();
        if state.tasks.is_empty() {
            state = self
                .available
                .wait_timeout(state, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let task = state.tasks.pop_front()?;
        state.in_progress += 1;
        Some(task)
    }

    /// Mark one popped task as done.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.in_progress = state.in_progress.saturating_sub(1);
        if state.in_progress == 0 && state.tasks.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Wake every waiting worker, e.g. so they notice a stop request.
    pub fn wake_all(&self) {
        self.available.notify_all();
    }

    /// Block until idle or `timeout` passes. Returns whether idle was reached.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !(state.tasks.is_empty() && state.in_progress == 0) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Pending tasks, not counting those in progress.
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    pub fn in_progress(&self) -> usize {
        self.lock().in_progress
    }

    /// Drop all pending tasks. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            let n = state.tasks.len();
            state.tasks.clear();
            if state.in_progress == 0 {
                self.idle.notify_all();
            }
            n
        };
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn task(i: usize) -> BoxTask {
        BoxTask {
            box_index: i,
            sun_intensity: 0.0,
        }
    }

    #[test]
    fn fifo_order() {
        let s = TaskScheduler::new();
        s.push(task(3));
        s.push_many([task(1), task(2)]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.try_pop().unwrap().box_index, 3);
        assert_eq!(s.try_pop().unwrap().box_index, 1);
        assert_eq!(s.in_progress(), 2);
        s.finish();
        s.finish();
        assert_eq!(s.try_pop().unwrap().box_index, 2);
    }

    #[test]
    fn empty_wait_times_out() {
        let s = TaskScheduler::new();
        let start = Instant::now();
        assert!(s.wait_for_task(Duration::from_millis(5)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(1));
        assert_eq!(s.in_progress(), 0);
    }

    #[test]
    fn idle_after_all_finished() {
        let s = Arc::new(TaskScheduler::new());
        s.push_many((0..50).map(task));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    while let Some(_t) = s.try_pop() {
                        s.finish();
                    }
                })
            })
            .collect();

        assert!(s.wait_idle(Duration::from_secs(5)));
        for w in workers {
            w.join().unwrap();
        }
        assert!(s.is_empty());
        assert_eq!(s.in_progress(), 0);
    }

    #[test]
    fn wait_idle_times_out_with_task_in_progress() {
        let s = TaskScheduler::new();
        s.push(task(0));
        let _t = s.try_pop().unwrap();
        assert!(!s.wait_idle(Duration::from_millis(5)));
        s.finish();
        assert!(s.wait_idle(Duration::from_millis(5)));
    }

    #[test]
    fn clear_drops_pending() {
        let s = TaskScheduler::new();
        s.push_many((0..7).map(task));
        assert_eq!(s.clear(), 7);
        assert!(s.is_empty());
    }
}
