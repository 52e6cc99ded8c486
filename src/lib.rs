//! Cross-thread procedure dispatch with a pollable readiness signal.
//!
//! Any thread can push zero-argument closures ("procedures") onto a
//! [`Queue`]; one designated consumer thread drains and runs them. The
//! queue exposes a native pollable handle and implements
//! [`mio::event::Source`], so the consumer can block in a single
//! `mio::Poll` wait on the queue alongside sockets, timers, or any other
//! registered resource.
//!
//! [`LoopThread`] packages that pattern: a thread that waits on its own
//! poll instance, runs every pending procedure in push order, consults a
//! per-iteration [`LoopHandler`] hook for the next wait timeout, and
//! repeats until [`quit`] is requested. A [`poke`] wakes the thread without
//! delivering work.
//!
//! [`quit`]: LoopThread::quit
//! [`poke`]: Queue::poke
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use runq::{Events, LoopConfig, LoopThread};
//!
//! fn idle(_triggered: &Events) -> Option<Duration> {
//!     None // wait until the queue or a registered resource is ready
//! }
//!
//! # fn main() -> Result<(), runq::LoopError> {
//! let mut thread = LoopThread::new(LoopConfig::default(), idle)?;
//! thread.start();
//!
//! // from any thread: hand the loop a procedure to run
//! thread.push_back(|| println!("runs on the loop thread"));
//!
//! thread.quit();
//! thread.join();
//! # Ok(())
//! # }
//! ```

pub mod loop_thread;
mod notify;
pub mod queue;
mod trace;

pub use loop_thread::{LoopConfig, LoopError, LoopHandler, LoopThread, QUEUE_TOKEN};
pub use queue::{Procedure, Queue, QueueError};
pub use trace::init_tracing;

// Re-export the mio types that appear in the public API.
pub use mio::{Events, Interest, Registry, Token};
