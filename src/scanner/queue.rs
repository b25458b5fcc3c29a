//! Task queue with completion tracking
//!
//! Every address put on the queue must be acknowledged once; [`TaskQueue::join`]
//! blocks until that has happened for all of them. `None` on the channel
//! is the shutdown sentinel and is not counted.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Completion {
    pending: Mutex<usize>,
    drained: Condvar,
    acknowledged: AtomicUsize,
}

impl Completion {
    fn task_done(&self) {
        let mut pending = self.pending.lock();
        if *pending == 0 {
            log::warn!("task_done called more times than tasks were queued");
            return;
        }
        *pending -= 1;
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// Producer side, owned by the coordinator
pub struct TaskQueue {
    sender: Sender<Option<IpAddr>>,
    receiver: Receiver<Option<IpAddr>>,
    completion: Arc<Completion>,
}

impl TaskQueue {
    /// Queue holding at most `capacity` entries (sentinels included)
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self::from_channel(sender, receiver)
    }

    pub fn unbounded() -> Self {
        let (sender, receiver) = unbounded();
        Self::from_channel(sender, receiver)
    }

    fn from_channel(sender: Sender<Option<IpAddr>>, receiver: Receiver<Option<IpAddr>>) -> Self {
        Self {
            sender,
            receiver,
            completion: Arc::new(Completion::default()),
        }
    }

    /// Consumer handle for one worker
    pub fn receiver(&self) -> TaskReceiver {
        TaskReceiver {
            receiver: self.receiver.clone(),
            completion: Arc::clone(&self.completion),
        }
    }

    /// Enqueue one address; blocks while the queue is full
    pub fn put(&self, address: IpAddr) {
        *self.completion.pending.lock() += 1;
        // The queue keeps its own receiver, so the channel cannot disconnect
        if self.sender.send(Some(address)).is_err() {
            self.completion.task_done();
        }
    }

    /// Enqueue one shutdown sentinel
    pub fn put_sentinel(&self) {
        let _ = self.sender.send(None);
    }

    /// Block until every queued address has been acknowledged
    pub fn join(&self) {
        let mut pending = self.completion.pending.lock();
        while *pending > 0 {
            self.completion.drained.wait(&mut pending);
        }
    }

    pub fn pending(&self) -> usize {
        *self.completion.pending.lock()
    }

    /// Total acknowledgements over the life of the queue
    pub fn acknowledged(&self) -> usize {
        self.completion.acknowledged.load(Ordering::SeqCst)
    }
}

/// Consumer side, one per worker
#[derive(Clone)]
pub struct TaskReceiver {
    receiver: Receiver<Option<IpAddr>>,
    completion: Arc<Completion>,
}

impl TaskReceiver {
    /// Blocking pull. `None` means shut down: a sentinel was received or
    /// the queue is gone.
    pub fn recv(&self) -> Option<(IpAddr, TaskGuard)> {
        match self.receiver.recv() {
            Ok(Some(address)) => Some((
                address,
                TaskGuard {
                    completion: Arc::clone(&self.completion),
                },
            )),
            Ok(None) | Err(_) => None,
        }
    }
}

/// Acknowledges its task when dropped, including during a panic unwind
pub struct TaskGuard {
    completion: Arc<Completion>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.completion.task_done();
    }
}
