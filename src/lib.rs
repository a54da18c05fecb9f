//! # proc-graph: Hierarchical Lifecycle Coordination
//!
//! A small library for coordinating the orderly, exactly-once shutdown of a
//! graph of concurrent tasks. A [`Process`] is a lifecycle handle (not an
//! OS process) that pairs a unit of ongoing work with the teardown logic
//! that must run when the work ends.
//!
//! ## Key Features
//!
//! - **Graph-shaped ownership**: processes may have many parents and many
//!   children, and may wait on unrelated peers; cycles are tolerated and
//!   shut down without deadlock
//! - **Two lifecycle events**: *closing* (teardown has begun) and *closed*
//!   (teardown has fully finished), each a broadcast one-shot observable by
//!   any number of waiters, forever
//! - **Exactly-once teardown**: however many close triggers race, the
//!   teardown action runs once and every caller sees the same terminal
//!   status
//! - **Ordered shutdown**: a parent fires *closing* before its children are
//!   told to close, and fires *closed* only after its waited children,
//!   waitees, and spawned tasks are done
//! - **Task spawning**: [`Process::go`] ties a tokio task to a child
//!   process so shutdown drains the whole sub-tree
//! - **Signal bridging**: map OS signal delivery to a close call and hang a
//!   tree off it
//!
//! ## Quick Start
//!
//! ```no_run
//! use proc_graph::Process;
//!
//! #[tokio::main]
//! async fn main() -> proc_graph::Result<()> {
//!     // A root that closes on Ctrl-C.
//!     let root = Process::with_ctrl_c();
//!
//!     // Workers live as children of the root; each drains when the
//!     // graph starts closing.
//!     for _ in 0..4 {
//!         root.go(|p| async move {
//!             let closing = p.closing();
//!             loop {
//!                 tokio::select! {
//!                     () = closing.wait() => break,
//!                     () = tokio::time::sleep(std::time::Duration::from_millis(250)) => {
//!                         // do a unit of work
//!                     }
//!                 }
//!             }
//!         });
//!     }
//!
//!     // Returns once every worker has drained and teardown has run.
//!     root.closed().wait().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod event;
mod process;
mod signal;

pub use error::{Error, ErrorCode, Result};
pub use event::LifecycleEvent;
pub use process::{Process, ProcessId, ProcessState, ProcessStats, TeardownFn};

/// Version of the proc-graph library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
