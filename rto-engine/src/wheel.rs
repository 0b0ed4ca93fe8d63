//! Global timer wheel.
//!
//! One tokio task owns every pending deadline of every registered
//! connection and calls back into the connection when one expires.
//!
//! ```text
//!  SharedConnection ──Schedule/Cancel──▶ ┌────────────────────────────┐
//!        ▲                               │ TimerWheel task            │
//!        │                               │   BinaryHeap<(deadline,    │
//!        │                               │       key, generation)>    │
//!        └────── FireTarget::fire ◀───── │   live: key → generation   │
//!                                        └────────────────────────────┘
//! ```
//!
//! Heap entries are never removed in place.  A cancel or re-arm only updates
//! `live`; entries whose `(generation, deadline)` no longer match are
//! skipped when they reach the top.  A fire answered with
//! [`FireOutcome::Deferred`] keeps its generation and is re-queued at the
//! returned instant.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionId, FireOutcome};
use crate::timer::{TimerKey, TimerKind};

/// Current time on the runtime's clock.
///
/// Under a paused test runtime this follows the virtual clock, so deadlines
/// computed from it line up with the wheel's sleeps.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Something the wheel can deliver expiries to.
pub trait FireTarget: Send + Sync {
    /// Deliver the expiry of slot `kind`, armed with `generation`.
    ///
    /// Must not block.
    fn fire(&self, kind: TimerKind, generation: u64, now: Instant) -> FireOutcome;
}

enum Command {
    Register {
        id: ConnectionId,
        target: Arc<dyn FireTarget>,
    },
    Schedule {
        key: TimerKey,
        deadline: Instant,
        generation: u64,
    },
    Cancel {
        key: TimerKey,
    },
    Deregister {
        id: ConnectionId,
    },
}

/// Cloneable sender side of the wheel.
///
/// Commands are applied in order.  Once the wheel task has exited they are
/// silently dropped.
#[derive(Clone)]
pub struct WheelHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl WheelHandle {
    pub fn register(&self, id: ConnectionId, target: Arc<dyn FireTarget>) {
        self.send(Command::Register { id, target });
    }

    pub fn schedule(&self, key: TimerKey, deadline: Instant, generation: u64) {
        self.send(Command::Schedule {
            key,
            deadline,
            generation,
        });
    }

    pub fn cancel(&self, key: TimerKey) {
        self.send(Command::Cancel { key });
    }

    /// Forget `id` and every deadline it still has pending.
    pub fn deregister(&self, id: ConnectionId) {
        self.send(Command::Deregister { id });
    }

    /// Mirror one slot: schedule its pending arm, or cancel if there is none.
    pub fn sync(&self, key: TimerKey, pending: Option<(Instant, u64)>) {
        match pending {
            Some((deadline, generation)) => self.schedule(key, deadline, generation),
            None => self.cancel(key),
        }
    }

    /// A handle that does not keep the wheel running.
    pub fn downgrade(&self) -> WeakWheelHandle {
        WeakWheelHandle {
            tx: self.tx.downgrade(),
        }
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            log::trace!("[wheel] command after shutdown dropped");
        }
    }
}

/// Non-owning [`WheelHandle`].  Held by registered connections so that the
/// wheel still stops once every strong handle is gone.
#[derive(Clone)]
pub struct WeakWheelHandle {
    tx: mpsc::WeakUnboundedSender<Command>,
}

impl WeakWheelHandle {
    /// `None` once the wheel has shut down.
    pub fn upgrade(&self) -> Option<WheelHandle> {
        self.tx.upgrade().map(|tx| WheelHandle { tx })
    }
}

/// Counters returned when the wheel task exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelStats {
    pub handled: u64,
    pub deferred: u64,
    pub stale: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    deadline: Instant,
    key: TimerKey,
    generation: u64,
}

#[derive(Default)]
struct Core {
    heap: BinaryHeap<Reverse<Entry>>,
    live: HashMap<TimerKey, (u64, Instant)>,
    targets: HashMap<ConnectionId, Arc<dyn FireTarget>>,
    stats: WheelStats,
}

/// The wheel task.  Create with [`TimerWheel::new`], then drive
/// [`TimerWheel::run`] (or use [`spawn`]).
pub struct TimerWheel {
    rx: mpsc::UnboundedReceiver<Command>,
    core: Core,
}

/// Start a wheel on the current runtime.
pub fn spawn() -> (WheelHandle, JoinHandle<WheelStats>) {
    let (wheel, handle) = TimerWheel::new();
    (handle, tokio::spawn(wheel.run()))
}

impl TimerWheel {
    pub fn new() -> (Self, WheelHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let wheel = Self {
            rx,
            core: Core::default(),
        };
        (wheel, WheelHandle { tx })
    }

    /// Run until every [`WheelHandle`] has been dropped.  Registered
    /// connections only hold a [`WeakWheelHandle`] and do not count.
    pub async fn run(self) -> WheelStats {
        let TimerWheel { mut rx, mut core } = self;

        // Parked far away whenever nothing is pending.
        let far_future = Duration::from_secs(365 * 24 * 3600);
        let sleep = tokio::time::sleep(far_future);
        tokio::pin!(sleep);

        loop {
            core.fire_due(now());

            let armed = match core.next_deadline() {
                Some(deadline) => {
                    sleep.as_mut().reset(tokio::time::Instant::from_std(deadline));
                    true
                }
                None => false,
            };

            tokio::select! {
                biased;

                cmd = rx.recv() => match cmd {
                    Some(cmd) => core.apply(cmd),
                    None => break,
                },
                _ = &mut sleep, if armed => {}
            }
        }

        log::debug!("[wheel] stopped: {:?}", core.stats);
        core.stats
    }
}

impl Core {
    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Register { id, target } => {
                self.targets.insert(id, target);
            }
            Command::Schedule {
                key,
                deadline,
                generation,
            } => {
                if self.live.get(&key) == Some(&(generation, deadline)) {
                    return;
                }
                self.live.insert(key, (generation, deadline));
                self.heap.push(Reverse(Entry {
                    deadline,
                    key,
                    generation,
                }));
            }
            Command::Cancel { key } => {
                self.live.remove(&key);
            }
            Command::Deregister { id } => {
                self.targets.remove(&id);
                for kind in [TimerKind::Retransmit, TimerKind::Linger] {
                    self.live.remove(&TimerKey { id, kind });
                }
            }
        }
    }

    /// Earliest live deadline, discarding dead heap entries on the way.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                return Some(top.deadline);
            }
            self.heap.pop();
        }
        None
    }

    fn is_live(&self, entry: &Entry) -> bool {
        self.live.get(&entry.key) == Some(&(entry.generation, entry.deadline))
    }

    fn fire_due(&mut self, now: Instant) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = *top;
            self.heap.pop();
            if !self.is_live(&entry) {
                continue;
            }
            self.live.remove(&entry.key);

            let Some(target) = self.targets.get(&entry.key.id).cloned() else {
                continue;
            };
            match target.fire(entry.key.kind, entry.generation, now) {
                FireOutcome::Handled => self.stats.handled += 1,
                FireOutcome::Stale => self.stats.stale += 1,
                FireOutcome::Deferred { retry_at } => {
                    self.stats.deferred += 1;
                    log::trace!("[wheel] {:?} deferred", entry.key);
                    self.live.insert(entry.key, (entry.generation, retry_at));
                    self.heap.push(Reverse(Entry {
                        deadline: retry_at,
                        ..entry
                    }));
                }
            }
        }
    }
}
