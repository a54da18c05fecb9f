//! Process nodes and the close protocol.
//!
//! A [`Process`] is a lifecycle handle (not an OS process) that stands for
//! a unit of ongoing work together with the teardown logic that must run
//! when the work ends. Processes form a directed graph: a node may have any
//! number of parents and children, and may additionally wait on unrelated
//! peers before terminating. Cycles are tolerated.
//!
//! Every process moves through three states exactly once:
//!
//! * **Open**: accepting relationships and work.
//! * **Closing**: the [closing event](Process::closing) has fired, children
//!   have been told to close, and the process is waiting for its
//!   prerequisites (waited children, waitees, spawned tasks) before running
//!   its teardown action.
//! * **Closed**: teardown has returned and the
//!   [closed event](Process::closed) has fired.
//!
//! The close protocol commits the state transition under a short-lived
//! per-node lock, then performs all fan-out and waiting with no lock held.
//! That discipline is what lets cyclic graphs shut down without deadlock.
//!
//! # Example
//!
//! ```no_run
//! use proc_graph::Process;
//!
//! #[tokio::main]
//! async fn main() -> proc_graph::Result<()> {
//!     let root = Process::with_parent(&Process::background());
//!
//!     root.go(|p| async move {
//!         // Work until the graph starts shutting down.
//!         p.closing().wait().await;
//!     });
//!
//!     root.close().await
//! }
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use arc_swap::ArcSwapOption;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::event::LifecycleEvent;

/// Unique identifier for a process.
pub type ProcessId = u64;

/// Teardown action signature.
///
/// Runs exactly once, after every prerequisite of the close protocol has
/// resolved and before the closed event fires. An `Err` return becomes the
/// process's terminal status; it is stored on the node and handed back to
/// every caller of [`Process::close`], but never propagated to other
/// processes.
pub type TeardownFn =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + 'static>;

/// Allocator for process identifiers.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Shared always-open sentinel, initialized on first access.
static BACKGROUND: OnceLock<Process> = OnceLock::new();

/// Lifecycle state of a process. Monotone; never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProcessState {
    /// Accepting relationships and work.
    Open,
    /// Teardown has begun; prerequisites are being awaited.
    Closing,
    /// Teardown has fully finished, descendants included.
    Closed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Point-in-time snapshot of a process's relationships.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProcessStats {
    /// Current lifecycle state.
    pub state: ProcessState,
    /// Number of registered children (waited and no-wait).
    pub children: usize,
    /// Number of children whose closed event this process will await.
    pub waited_children: usize,
    /// Number of registered waitees.
    pub waitees: usize,
    /// Number of tasks spawned via [`Process::go`] that have not returned.
    pub tasks_in_flight: usize,
}

/// A registered child: the handle plus whether the parent awaits its closed
/// event during teardown. Registering the same child through both
/// [`Process::add_child`] and [`Process::add_child_no_wait`] keeps the
/// stronger flag.
struct ChildLink {
    handle: Process,
    wait: bool,
}

/// Mutable node state, guarded by the per-process lock.
///
/// The lock is held only for state transitions and set updates, never
/// across an await or the teardown invocation.
struct Node {
    phase: ProcessState,
    children: HashMap<ProcessId, ChildLink>,
    waitees: HashMap<ProcessId, Process>,
    /// Closed events this process must await before finishing its own
    /// close. Seeded when the node commits `Closing`; relationship calls
    /// append to it while the drain loop in `run_close` is active.
    pending: Vec<LifecycleEvent>,
    teardown: Option<TeardownFn>,
    /// Back-pointers to every node holding this process in a relationship
    /// set, used to unlink ourselves once closed.
    registrations: Vec<Weak<Inner>>,
}

struct Inner {
    id: ProcessId,
    /// Sentinel nodes (the background root) ignore close triggers and never
    /// fire their events.
    sentinel: bool,
    closing: LifecycleEvent,
    closed: LifecycleEvent,
    close_err: ArcSwapOption<Error>,
    tasks: AtomicUsize,
    node: Mutex<Node>,
}

/// A lifecycle handle in the process graph.
///
/// `Process` is a cheap clone of a shared node; all clones observe and
/// mutate the same state. Every operation is safe to call from any task at
/// any time. See the [module docs](self) for the lifecycle model.
#[derive(Clone)]
pub struct Process {
    inner: Arc<Inner>,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Process {
    fn build(sentinel: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                sentinel,
                closing: LifecycleEvent::new(),
                closed: LifecycleEvent::new(),
                close_err: ArcSwapOption::empty(),
                tasks: AtomicUsize::new(0),
                node: Mutex::new(Node {
                    phase: ProcessState::Open,
                    children: HashMap::new(),
                    waitees: HashMap::new(),
                    pending: Vec::new(),
                    teardown: None,
                    registrations: Vec::new(),
                }),
            }),
        }
    }

    /// Creates a new process with no parents and no teardown action.
    #[must_use]
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Creates a new process as a child of `parent`.
    ///
    /// If the parent is already closing or closed, the new process is
    /// immediately driven to close, but is still returned as a valid handle
    /// whose events may fire promptly.
    #[must_use]
    pub fn with_parent(parent: &Process) -> Self {
        let process = Self::new();
        parent.add_child(&process);
        process
    }

    /// Creates a new process as a child of every given parent.
    pub fn with_parents<'a, I>(parents: I) -> Self
    where
        I: IntoIterator<Item = &'a Process>,
    {
        let process = Self::new();
        for parent in parents {
            parent.add_child(&process);
        }
        process
    }

    /// Creates a new process with the given teardown action and no parents.
    pub fn with_teardown<F, Fut>(teardown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let process = Self::new();
        process.set_teardown(teardown);
        process
    }

    /// Returns the shared background sentinel.
    ///
    /// The background process is always open: its events never fire and
    /// close triggers on it are no-ops. It exists to serve as the root
    /// parent of process trees, so that no tree member is ever driven to
    /// close from above unless the caller wires that up explicitly.
    #[must_use]
    pub fn background() -> Self {
        BACKGROUND.get_or_init(|| Self::build(true)).clone()
    }

    /// Returns this process's unique identifier.
    #[must_use]
    pub fn id(&self) -> ProcessId {
        self.inner.id
    }

    /// Returns the current lifecycle state without blocking.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        if self.inner.closed.is_fired() {
            ProcessState::Closed
        } else if self.inner.closing.is_fired() {
            ProcessState::Closing
        } else {
            ProcessState::Open
        }
    }

    /// Returns the closing event: fired the moment teardown begins.
    #[must_use]
    pub fn closing(&self) -> LifecycleEvent {
        self.inner.closing.clone()
    }

    /// Returns the closed event: fired once teardown has fully finished,
    /// including all waited children, waitees, and spawned tasks.
    #[must_use]
    pub fn closed(&self) -> LifecycleEvent {
        self.inner.closed.clone()
    }

    /// Returns the terminal status recorded by the teardown action, if it
    /// failed. `None` before close completes and after a clean close.
    #[must_use]
    pub fn close_err(&self) -> Option<Error> {
        self.inner.close_err.load_full().map(|err| (*err).clone())
    }

    /// Returns a snapshot of the node's relationships.
    #[must_use]
    pub fn stats(&self) -> ProcessStats {
        let node = self.inner.node.lock();
        ProcessStats {
            state: node.phase,
            children: node.children.len(),
            waited_children: node.children.values().filter(|link| link.wait).count(),
            waitees: node.waitees.len(),
            tasks_in_flight: self.inner.tasks.load(Ordering::Acquire),
        }
    }

    /// Installs (or replaces) the teardown action.
    ///
    /// Ignored once the process has begun closing; the action that was in
    /// place when closing began is the one that runs.
    pub fn set_teardown<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let action: TeardownFn = Box::new(move || Box::pin(teardown()));
        let mut node = self.inner.node.lock();
        if node.phase == ProcessState::Open {
            node.teardown = Some(action);
        } else {
            debug!(
                process_id = self.inner.id,
                "teardown ignored: process is already closing"
            );
        }
    }

    /// Registers `child` as a waited child of this process.
    ///
    /// When this process begins closing it drives `child` to close and
    /// awaits the child's closed event before firing its own. Registering
    /// the same pair again has no additional effect.
    pub fn add_child(&self, child: &Process) {
        self.link_child(child, true);
    }

    /// Registers `child` as a no-wait child of this process.
    ///
    /// Like [`add_child`](Self::add_child), except this process does not
    /// await the child's closed event.
    pub fn add_child_no_wait(&self, child: &Process) {
        self.link_child(child, false);
    }

    /// Registers `other` as a waitee: this process awaits `other`'s closed
    /// event before firing its own, but never drives `other` to close.
    pub fn wait_for(&self, other: &Process) {
        let registered = {
            let mut node = self.inner.node.lock();
            if node.phase == ProcessState::Closed {
                false
            } else {
                if let Entry::Vacant(slot) = node.waitees.entry(other.id()) {
                    slot.insert(other.clone());
                    if node.phase == ProcessState::Closing && !other.inner.closing.is_fired() {
                        node.pending.push(other.inner.closed.clone());
                    }
                }
                true
            }
        };
        if registered {
            other.register_holder(&self.inner);
        }
    }

    /// Spawns `task` on a new tokio task with a fresh child process as its
    /// argument, and returns that child.
    ///
    /// The child cannot finish closing before `task` returns: a sentinel
    /// waitee pins it open for the duration. When `task` returns, the child
    /// is closed after its own children (so nested spawns drain first), and
    /// this process, which holds the child as a waited child, will not
    /// fire its closed event until the whole sub-tree is gone.
    ///
    /// Calling this on a process that is already closing still spawns the
    /// task; its child is simply driven to close right away.
    pub fn go<F, Fut>(&self, task: F) -> Process
    where
        F: FnOnce(Process) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let child = Process::new();
        let finished = Process::new();
        child.wait_for(&finished);
        self.add_child(&child);
        self.inner.tasks.fetch_add(1, Ordering::AcqRel);

        let owner = Arc::clone(&self.inner);
        let handle = child.clone();
        tokio::spawn(async move {
            task(handle.clone()).await;
            owner.tasks.fetch_sub(1, Ordering::AcqRel);
            let _ = finished.close().await;
            let _ = handle.close_after_children().await;
        });
        child
    }

    /// Triggers the close protocol and waits until this process is fully
    /// closed.
    ///
    /// The first trigger, from any source, runs the protocol; every other
    /// caller joins as a waiter on the closed event. All callers observe
    /// the same terminal outcome, and the teardown action runs exactly
    /// once. On the background sentinel this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the terminal status recorded by this process's teardown
    /// action. Teardown failures of descendants are not reported here.
    #[instrument(level = "debug", skip(self), fields(process_id = self.inner.id))]
    pub async fn close(&self) -> Result<()> {
        if self.inner.sentinel {
            return Ok(());
        }
        match self.begin_close() {
            Some(children) => self.run_close(children).await,
            None => self.inner.closed.wait().await,
        }
        self.terminal_status()
    }

    /// Waits for every currently-registered waited child and waitee to
    /// close, then triggers [`close`](Self::close).
    ///
    /// Unlike `close`, this never drives the children itself: they must be
    /// closed externally. Children registered while waiting are included.
    /// On the background sentinel this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the terminal status recorded by this process's teardown
    /// action, as [`close`](Self::close) does.
    pub async fn close_after_children(&self) -> Result<()> {
        if self.inner.sentinel {
            return Ok(());
        }
        // Children may keep arriving while we wait, so re-scan after every
        // completed wait instead of snapshotting once.
        loop {
            let next = {
                let node = self.inner.node.lock();
                node.children
                    .values()
                    .filter(|link| link.wait)
                    .map(|link| &link.handle)
                    .chain(node.waitees.values())
                    .find(|peer| !peer.inner.closed.is_fired())
                    .map(|peer| peer.inner.closed.clone())
            };
            match next {
                Some(done) => done.wait().await,
                None => break,
            }
        }
        self.close().await
    }

    /// Shared body of `add_child` / `add_child_no_wait`.
    fn link_child(&self, child: &Process, wait: bool) {
        let (registered, drive) = {
            let mut node = self.inner.node.lock();
            if node.phase == ProcessState::Closed {
                // Registration on a closed node has no effect on the node
                // itself, but the newcomer is still told to close.
                (false, true)
            } else {
                let newly_waited = match node.children.entry(child.id()) {
                    Entry::Occupied(mut slot) => {
                        let was_waited = slot.get().wait;
                        slot.get_mut().wait |= wait;
                        wait && !was_waited
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(ChildLink {
                            handle: child.clone(),
                            wait,
                        });
                        wait
                    }
                };
                if node.phase == ProcessState::Closing {
                    // Fan-out already ran; drive the latecomer ourselves and
                    // hand its closed event to the drain loop.
                    if newly_waited && !child.inner.closing.is_fired() {
                        node.pending.push(child.inner.closed.clone());
                    }
                    (true, true)
                } else {
                    (true, false)
                }
            }
        };

        if registered {
            child.register_holder(&self.inner);
        }
        if drive {
            drive_close(child.clone());
        }
    }

    /// Records `holder` as a node keeping this process in a relationship
    /// set, so we can unlink ourselves from it when we close.
    fn register_holder(&self, holder: &Arc<Inner>) {
        if self.inner.closed.is_fired() {
            return;
        }
        self.inner
            .node
            .lock()
            .registrations
            .push(Arc::downgrade(holder));
    }

    /// Attempts the `Open -> Closing` transition.
    ///
    /// On success, fires the closing event, fixes the prerequisite await
    /// set, and returns the children to fan out to. Returns `None` if
    /// another trigger got there first; such callers wait on the closed
    /// event instead.
    fn begin_close(&self) -> Option<Vec<Process>> {
        let mut node = self.inner.node.lock();
        if node.phase != ProcessState::Open {
            return None;
        }
        node.phase = ProcessState::Closing;
        // Our own closing event must be visible before we inspect peers:
        // in a close cycle this guarantees at least one side observes the
        // other as already closing and drops the await, so both terminate.
        self.inner.closing.fire();
        debug!(process_id = self.inner.id, "close initiated");

        let mut pending = Vec::new();
        for link in node.children.values() {
            if link.wait && !link.handle.inner.closing.is_fired() {
                pending.push(link.handle.inner.closed.clone());
            }
        }
        for peer in node.waitees.values() {
            if !peer.inner.closing.is_fired() {
                pending.push(peer.inner.closed.clone());
            }
        }
        node.pending = pending;

        Some(node.children.values().map(|link| link.handle.clone()).collect())
    }

    /// Runs the close protocol after a won `begin_close`: fan-out, await
    /// prerequisites, teardown, commit `Closed`, unlink from holders.
    ///
    /// Everything here executes without the node lock except the short
    /// drain/commit critical sections.
    async fn run_close(&self, children: Vec<Process>) {
        for child in children {
            drive_close(child);
        }

        // Await prerequisites. Relationship calls append to `pending`
        // while we are closing, so drain until a pass comes back empty.
        loop {
            let pending = {
                let mut node = self.inner.node.lock();
                std::mem::take(&mut node.pending)
            };
            if pending.is_empty() {
                break;
            }
            join_all(pending.iter().map(LifecycleEvent::wait)).await;
        }

        let teardown = self.inner.node.lock().teardown.take();
        if let Some(action) = teardown {
            if let Err(err) = action().await {
                warn!(process_id = self.inner.id, error = %err, "teardown failed");
                self.inner.close_err.store(Some(Arc::new(err)));
            } else {
                debug!(process_id = self.inner.id, "teardown complete");
            }
        }

        // Commit `Closed` atomically with observing an empty prerequisite
        // list, so a child registered during teardown is still awaited
        // before the closed event fires.
        loop {
            let pending = {
                let mut node = self.inner.node.lock();
                if node.pending.is_empty() {
                    node.phase = ProcessState::Closed;
                    node.children.clear();
                    node.waitees.clear();
                    self.inner.closed.fire();
                    break;
                }
                std::mem::take(&mut node.pending)
            };
            join_all(pending.iter().map(LifecycleEvent::wait)).await;
        }
        debug!(process_id = self.inner.id, "closed");

        // Unlink ourselves from every node still holding us, so long-lived
        // parents (the background sentinel in particular) do not accumulate
        // dead children.
        let holders = std::mem::take(&mut self.inner.node.lock().registrations);
        for holder in holders {
            if let Some(holder) = holder.upgrade() {
                let mut node = holder.node.lock();
                node.children.remove(&self.inner.id);
                node.waitees.remove(&self.inner.id);
            }
        }
    }

    fn terminal_status(&self) -> Result<()> {
        self.inner
            .close_err
            .load_full()
            .map_or(Ok(()), |err| Err((*err).clone()))
    }
}

/// Triggers `close` on a detached task. Fan-out never blocks the caller
/// and never recurses under a held lock.
fn drive_close(process: Process) {
    tokio::spawn(async move {
        let _ = process.close().await;
    });
}
