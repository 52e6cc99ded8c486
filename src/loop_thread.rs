//! Run-loop thread: wait, drain the procedure queue, repeat until quit.
//!
//! Responsibilities:
//! - Own one [`Queue`] and one private [`mio::Poll`] acting as the thread's
//!   wait set; the queue is registered under the reserved [`QUEUE_TOKEN`].
//! - Block until the queue signals, a user-registered resource becomes
//!   ready, or the handler-chosen timeout elapses.
//! - Run every pending procedure, in push order, on the loop thread.
//! - Hand the previous wait's events to the [`LoopHandler`] once per
//!   iteration and exit once [`quit`] is observed.
//!
//! [`quit`]: LoopThread::quit

use std::io;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use thiserror::Error;

use crate::queue::{Queue, QueueError};
use crate::trace::{debug, info};

/// Token under which a [`LoopThread`] registers its own queue.
///
/// Events carrying this token in [`LoopHandler::on_loop`] belong to the
/// internal queue; user resources must be registered with any other token.
pub const QUEUE_TOKEN: Token = Token(usize::MAX);

/// Error constructing a [`LoopThread`].
#[derive(Debug, Error)]
pub enum LoopError {
    /// The requested capacity leaves no room for the internal queue's slot.
    #[error("wait-set capacity {0} is too large")]
    Capacity(usize),
    /// The queue's readiness notifier could not be created.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The poll instance could not be created or its registry cloned.
    #[error("failed to create poll instance: {0}")]
    Poll(#[source] io::Error),
    /// The queue could not be registered with the poll instance.
    #[error("failed to register queue: {0}")]
    Register(#[source] io::Error),
}

/// Per-iteration hook of a [`LoopThread`], chosen at construction.
///
/// Implemented either on a type of your own or supplied as a closure
/// (`FnMut(&Events) -> Option<Duration>` implements the trait).
pub trait LoopHandler: Send {
    /// Called on the loop thread once before the first wait and then again
    /// after every drain pass.
    ///
    /// `triggered` holds the events of the previous wait, empty on the
    /// first call and after a wait that timed out. Events carrying
    /// [`QUEUE_TOKEN`] belong to the thread's own queue; everything else is
    /// a user-registered resource.
    ///
    /// The returned duration bounds the next wait; `None` waits until a
    /// resource becomes ready.
    fn on_loop(&mut self, triggered: &Events) -> Option<Duration>;

    /// Called once on the loop thread after quit is observed, right before
    /// the loop exits.
    fn on_quit(&mut self) {}
}

impl<F> LoopHandler for F
where
    F: FnMut(&Events) -> Option<Duration> + Send,
{
    fn on_loop(&mut self, triggered: &Events) -> Option<Duration> {
        self(triggered)
    }
}

/// Configuration for a [`LoopThread`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Name for the spawned OS thread.
    pub name: String,
    /// Number of user-registered resources the wait set is sized for.
    /// The internal queue occupies one extra slot.
    pub capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            name: "runq-loop".into(),
            capacity: 16,
        }
    }
}

/// Everything the spawned thread takes ownership of.
struct Worker {
    poll: Poll,
    events: Events,
    queue: Arc<Queue>,
    quit: Arc<AtomicBool>,
    handler: Box<dyn LoopHandler>,
}

impl Worker {
    fn run(mut self) {
        info!("loop thread running");
        while !self.quit.load(Ordering::Relaxed) {
            let timeout = self.handler.on_loop(&self.events);
            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                // an interrupted wait is a spurious wake; the drain below
                // still runs
                assert_eq!(
                    e.kind(),
                    io::ErrorKind::Interrupted,
                    "wait on poll failed: {e}"
                );
            }
            // re-check emptiness after every invocation, so a procedure
            // pushing to this same queue is picked up within this drain
            while let Some(procedure) = self.queue.pop_front() {
                procedure();
            }
        }
        self.handler.on_quit();
        info!("loop thread exiting");
    }
}

/// A thread driving one procedure queue plus user wait-able resources.
///
/// Lifecycle: construct, [`start`], then from any thread [`push_back`] /
/// [`poke`] / [`quit`], and finally [`join`]. A `LoopThread` must be joined
/// before it is dropped; debug builds detect a still-joinable thread being
/// dropped. `quit()` is idempotent and may be called before `start()`, in
/// which case the loop exits without a single wait.
///
/// [`start`]: LoopThread::start
/// [`push_back`]: LoopThread::push_back
/// [`poke`]: LoopThread::poke
/// [`quit`]: LoopThread::quit
/// [`join`]: LoopThread::join
pub struct LoopThread {
    name: String,
    queue: Arc<Queue>,
    quit: Arc<AtomicBool>,
    registry: Registry,
    worker: Mutex<Option<Worker>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LoopThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopThread")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl LoopThread {
    /// Creates a loop thread without starting it.
    ///
    /// The internal queue is created and registered with the thread's poll
    /// instance under [`QUEUE_TOKEN`]; procedures may be pushed before
    /// [`start`].
    ///
    /// # Errors
    ///
    /// Returns a [`LoopError`] naming the failing subsystem: an excessive
    /// `capacity`, the queue's notifier, the poll instance, or the queue
    /// registration.
    ///
    /// [`start`]: LoopThread::start
    pub fn new<H>(config: LoopConfig, handler: H) -> Result<Self, LoopError>
    where
        H: LoopHandler + 'static,
    {
        let capacity = config
            .capacity
            .checked_add(1)
            .ok_or(LoopError::Capacity(config.capacity))?;

        let queue = Arc::new(Queue::new()?);
        let poll = Poll::new().map_err(LoopError::Poll)?;
        let fd = queue.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), QUEUE_TOKEN, Interest::READABLE)
            .map_err(LoopError::Register)?;
        let registry = poll.registry().try_clone().map_err(LoopError::Poll)?;

        let quit = Arc::new(AtomicBool::new(false));
        Ok(Self {
            name: config.name,
            queue: Arc::clone(&queue),
            quit: Arc::clone(&quit),
            registry,
            worker: Mutex::new(Some(Worker {
                poll,
                events: Events::with_capacity(capacity),
                queue,
                quit,
                handler: Box::new(handler),
            })),
            handle: None,
        })
    }

    /// Starts the loop on a new OS thread.
    ///
    /// # Panics
    ///
    /// Panics if the thread was already started or if the OS refuses to
    /// spawn a thread.
    pub fn start(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .expect("loop thread state poisoned")
            .take()
            .expect("loop thread already started");
        debug!(name = %self.name, "starting loop thread");
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run())
            .expect("failed to spawn loop thread");
        self.handle = Some(handle);
    }

    /// Requests the loop to exit.
    ///
    /// Sets the quit flag and pokes the queue, so even an indefinite wait
    /// aborts. The current drain pass completes first; a procedure already
    /// executing is not preempted. Idempotent; may be called from any
    /// thread, including before [`start`].
    ///
    /// [`start`]: LoopThread::start
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
        self.queue.poke();
    }

    /// Waits for the loop thread to exit.
    ///
    /// A panic that escaped a procedure or the handler is resumed on the
    /// calling thread.
    ///
    /// # Panics
    ///
    /// Panics if the thread was never started or was already joined.
    pub fn join(&mut self) {
        let handle = self.handle.take().expect("loop thread not started");
        if let Err(panic) = handle.join() {
            std::panic::resume_unwind(panic);
        }
    }

    /// Pushes a procedure onto the thread's queue.
    ///
    /// The procedure runs on the loop thread during its next drain pass;
    /// pushing interrupts an in-progress wait.
    pub fn push_back<F>(&self, procedure: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push_back(procedure);
    }

    /// Wakes the loop thread without delivering work. See [`Queue::poke`].
    pub fn poke(&self) {
        self.queue.poke();
    }

    /// Shared handle to the thread's queue.
    ///
    /// For producers that outlive a borrow of the `LoopThread`, or for a
    /// procedure that pushes follow-up work onto the queue it runs from.
    /// Only the loop thread itself may pop.
    #[must_use]
    pub fn queue(&self) -> Arc<Queue> {
        Arc::clone(&self.queue)
    }

    /// Registry of the thread's wait set, for registering user resources.
    ///
    /// Registration is allowed from any thread, before or after [`start`],
    /// concurrently with the loop's own waits. Do not use [`QUEUE_TOKEN`]
    /// for user resources.
    ///
    /// [`start`]: LoopThread::start
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        if !thread::panicking() {
            debug_assert!(
                self.handle.is_none(),
                "loop thread dropped while joinable; quit() and join() it first"
            );
        }
    }
}
