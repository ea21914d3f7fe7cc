//! Bounded FIFO of opened files, shared between the dispatcher and workers.
//!
//! Every queued entry holds an open descriptor, so the capacity is tied to
//! half the process descriptor limit: the dispatcher blocks on a full queue
//! instead of exhausting descriptors, and workers block on an empty queue
//! until the dispatcher declares the end of work.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::input::WorkFile;

pub struct WorkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<WorkFile>,
    finished: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::with_capacity(default_capacity())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                finished: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a work item, blocking while the queue is full.
    pub fn enqueue(&self, wf: WorkFile) {
        let mut st = self.state.lock().expect("work queue lock poisoned");
        while st.items.len() >= self.capacity {
            st = self
                .not_full
                .wait(st)
                .expect("work queue lock poisoned");
        }
        st.items.push_back(wf);
        self.not_empty.notify_one();
    }

    /// Take the oldest work item, blocking while the queue is empty.
    /// Returns `None` once the queue is both empty and finished.
    pub fn dequeue(&self) -> Option<WorkFile> {
        let mut st = self.state.lock().expect("work queue lock poisoned");
        while st.items.is_empty() && !st.finished {
            st = self
                .not_empty
                .wait(st)
                .expect("work queue lock poisoned");
        }
        let wf = st.items.pop_front();
        if wf.is_some() {
            self.not_full.notify_one();
        }
        wf
    }

    /// Declare that no more items will arrive and release idle workers.
    pub fn finish(&self) {
        let mut st = self.state.lock().expect("work queue lock poisoned");
        st.finished = true;
        self.not_empty.notify_all();
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Half the soft file-descriptor limit, so queued descriptors can never
/// starve the rest of the process.
#[cfg(unix)]
fn default_capacity() -> usize {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit fills the struct we hand it.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } == 0
        && rlim.rlim_cur != libc::RLIM_INFINITY
    {
        ((rlim.rlim_cur / 2) as usize).max(1)
    } else {
        256
    }
}

#[cfg(not(unix))]
fn default_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn work_item(name: &str) -> (NamedTempFile, WorkFile) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"data\n").unwrap();
        tmp.flush().unwrap();
        let file = File::open(tmp.path()).unwrap();
        let len = file.metadata().unwrap().len();
        (tmp, WorkFile::from_file(file, name.to_string(), true, len))
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::with_capacity(8);
        let (_t1, a) = work_item("a");
        let (_t2, b) = work_item("b");
        queue.enqueue(a);
        queue.enqueue(b);
        queue.finish();
        assert_eq!(queue.dequeue().unwrap().path, "a");
        assert_eq!(queue.dequeue().unwrap().path, "b");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_finish_releases_blocked_consumer() {
        let queue = Arc::new(WorkQueue::with_capacity(2));
        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || q.dequeue().is_none());
        thread::sleep(Duration::from_millis(20));
        queue.finish();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn test_producer_blocks_at_capacity() {
        let queue = Arc::new(WorkQueue::with_capacity(1));
        let (_t1, a) = work_item("a");
        queue.enqueue(a);

        let q = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            let (_t2, b) = work_item("b");
            q.enqueue(b);
            q.finish();
        });

        // Give the producer a chance to block on the full queue, then make
        // room and check both items come out in order.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.dequeue().unwrap().path, "a");
        assert_eq!(queue.dequeue().unwrap().path, "b");
        producer.join().unwrap();
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_dequeue_after_finish_drains_remaining() {
        let queue = WorkQueue::with_capacity(4);
        let (_t1, a) = work_item("a");
        queue.enqueue(a);
        queue.finish();
        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
    }
}
