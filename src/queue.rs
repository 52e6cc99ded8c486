//! Cross-thread procedure queue with an OS-pollable readiness signal.
//!
//! Producers on any thread append zero-argument closures; a single consumer
//! pops and runs them. The queue carries a kernel notifier whose file
//! descriptor polls readable exactly while work is pending (or after a
//! [`poke`]), so a consumer can block on the queue together with sockets,
//! timers, or any other resource inside one [`mio::Poll`] wait.
//!
//! The pending buffer, the `signaled` flag, and the kernel object are
//! mutated only together, under a single mutex. The in-memory transition
//! always completes before the OS-level wake is issued, so a consumer woken
//! by the notifier is guaranteed to observe the procedure that caused the
//! wake.
//!
//! [`poke`]: Queue::poke

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::{Mutex, MutexGuard};

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use thiserror::Error;

use crate::notify::Notifier;
use crate::trace::trace;

/// A queued unit of work: owned, zero-argument, run-once.
///
/// Ownership moves from the producer into the queue at [`Queue::push_back`]
/// and out to the consumer at [`Queue::pop_front`]. Dropping a queue drops
/// every procedure still pending.
pub type Procedure = Box<dyn FnOnce() + Send>;

/// Error constructing a [`Queue`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The kernel readiness object (eventfd or pipe) could not be created.
    #[error("failed to create readiness notifier: {0}")]
    Notifier(#[source] io::Error),
}

/// State guarded by the queue's mutex.
struct Inner {
    procedures: VecDeque<Procedure>,
    /// Mirrors the kernel notifier exactly: true iff its fd polls readable.
    signaled: bool,
}

/// FIFO queue of procedures, pollable for readability.
///
/// `push_back`, `pop_front`, and `poke` never block beyond the internal
/// mutex and are infallible once construction has succeeded. The queue is
/// unbounded; capacity is limited only by memory.
///
/// # Waiting on a queue
///
/// The queue implements [`mio::event::Source`] and [`AsRawFd`], so it can be
/// registered with a [`mio::Poll`] as one resource among many. Only
/// [`Interest::READABLE`] is meaningful: pushing never blocks, so
/// registering with write interest is rejected with
/// [`io::ErrorKind::InvalidInput`], and a queue has no error condition.
///
/// # Example
///
/// ```
/// let queue = runq::Queue::new()?;
/// queue.push_back(|| println!("hello"));
/// assert_eq!(queue.len(), 1);
///
/// let procedure = queue.pop_front().expect("one procedure is pending");
/// procedure();
/// assert!(queue.is_empty());
/// # Ok::<(), runq::QueueError>(())
/// ```
pub struct Queue {
    inner: Mutex<Inner>,
    notifier: Notifier,
}

impl Queue {
    /// Creates an empty, unsignaled queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Notifier`] if the kernel readiness object
    /// cannot be created (fd exhaustion). The queue is never left partially
    /// initialized.
    pub fn new() -> Result<Self, QueueError> {
        let notifier = Notifier::new().map_err(QueueError::Notifier)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                procedures: VecDeque::new(),
                signaled: false,
            }),
            notifier,
        })
    }

    /// Appends a procedure to the back of the queue.
    ///
    /// If the queue transitions from empty to non-empty, the notifier is
    /// signaled and any consumer blocked on the queue's fd wakes up. The
    /// signal is issued under the lock, after the in-memory state change.
    pub fn push_back<F>(&self, procedure: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.lock();
        inner.procedures.push_back(Box::new(procedure));
        if !inner.signaled {
            inner.signaled = true;
            self.notifier
                .signal()
                .expect("readiness notifier signal failed");
        }
        debug_assert!(inner.signaled);
    }

    /// Removes and returns the procedure at the front of the queue.
    ///
    /// Never blocks beyond the internal mutex. Returns `None` if the queue
    /// is empty. Removing the last procedure clears the notifier before the
    /// lock is released, so no concurrent push can interleave with the
    /// clear. A leftover [`poke`] signal on an empty queue is consumed by
    /// the first `pop_front` that observes it.
    ///
    /// [`poke`]: Queue::poke
    pub fn pop_front(&self) -> Option<Procedure> {
        let mut inner = self.lock();
        if inner.procedures.is_empty() {
            if inner.signaled {
                inner.signaled = false;
                self.notifier
                    .clear()
                    .expect("readiness notifier clear failed");
            }
            return None;
        }
        debug_assert!(inner.signaled);
        if inner.procedures.len() == 1 {
            inner.signaled = false;
            self.notifier
                .clear()
                .expect("readiness notifier clear failed");
        }
        inner.procedures.pop_front()
    }

    /// Signals the queue without enqueuing work.
    ///
    /// Wakes a consumer blocked on the queue's fd so it re-evaluates
    /// whatever state its iteration depends on. The signal is one-shot: the
    /// consumer's next drain attempt clears it. A no-op if the queue is
    /// already signaled.
    pub fn poke(&self) {
        let mut inner = self.lock();
        if !inner.signaled {
            trace!("poke");
            inner.signaled = true;
            self.notifier
                .signal()
                .expect("readiness notifier signal failed");
        }
    }

    /// Number of pending procedures.
    ///
    /// Diagnostic only: the count can be stale the moment the lock is
    /// released, so it must not drive control decisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().procedures.len()
    }

    /// Whether no procedures are pending. Same staleness caveat as [`len`].
    ///
    /// [`len`]: Queue::len
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // the lock is never held across user code
        self.inner.lock().expect("queue mutex poisoned")
    }
}

impl AsRawFd for Queue {
    fn as_raw_fd(&self) -> RawFd {
        self.notifier.as_raw_fd()
    }
}

impl AsFd for Queue {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.notifier.as_fd()
    }
}

/// Rejects registrations that wait for anything but readability.
fn check_interests(interests: Interest) -> io::Result<()> {
    if interests.is_writable() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "queue is pollable for readability only; pushing never blocks",
        ));
    }
    Ok(())
}

impl Source for Queue {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        check_interests(interests)?;
        let fd = self.as_raw_fd();
        SourceFd(&fd).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        check_interests(interests)?;
        let fd = self.as_raw_fd();
        SourceFd(&fd).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        let fd = self.as_raw_fd();
        SourceFd(&fd).deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use mio::{Events, Poll};

    /// Samples the queue's readiness through a real poll instance.
    fn polls_readable(queue: &mut Queue) -> bool {
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(4);
        poll.registry()
            .register(queue, Token(7), Interest::READABLE)
            .unwrap();
        poll.poll(&mut events, Some(Duration::from_millis(100)))
            .unwrap();
        events
            .iter()
            .any(|event| event.token() == Token(7) && event.is_readable())
    }

    #[test]
    fn pop_front_on_empty_queue_returns_none() {
        let queue = Queue::new().unwrap();
        assert!(queue.pop_front().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn procedures_pop_in_push_order() {
        let queue = Queue::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            queue.push_back(move || order.lock().unwrap().push(i));
        }
        assert_eq!(queue.len(), 5);

        while let Some(procedure) = queue.pop_front() {
            procedure();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn readiness_tracks_pending_count() {
        let mut queue = Queue::new().unwrap();
        assert!(!polls_readable(&mut queue));

        queue.push_back(|| {});
        queue.push_back(|| {});
        assert!(polls_readable(&mut queue));

        // removing one of two leaves the queue readable
        queue.pop_front().unwrap()();
        assert!(polls_readable(&mut queue));

        // removing the last clears readability
        queue.pop_front().unwrap()();
        assert!(!polls_readable(&mut queue));
    }

    #[test]
    fn poke_is_a_one_shot_signal() {
        let mut queue = Queue::new().unwrap();
        queue.poke();
        assert!(polls_readable(&mut queue));

        // the drain attempt finds no work and consumes the signal
        assert!(queue.pop_front().is_none());
        assert!(!polls_readable(&mut queue));
    }

    #[test]
    fn poke_on_signaled_queue_is_a_noop() {
        let mut queue = Queue::new().unwrap();
        queue.push_back(|| {});
        queue.poke();
        assert_eq!(queue.len(), 1);

        queue.pop_front().unwrap()();
        assert!(queue.pop_front().is_none());
        assert!(!polls_readable(&mut queue));
    }

    #[test]
    fn write_interest_is_rejected() {
        let mut queue = Queue::new().unwrap();
        let poll = Poll::new().unwrap();

        let err = poll
            .registry()
            .register(&mut queue, Token(0), Interest::WRITABLE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = poll
            .registry()
            .register(&mut queue, Token(0), Interest::READABLE | Interest::WRITABLE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
