//! Exclusive access to a connection shared between the timer wheel and the
//! rest of the transport.
//!
//! [`SharedConnection`] wraps a [`Connection`] and its [`Hooks`] in one
//! mutex.  Entry points from the ACK path and the application block on the
//! lock.  A timer fire never does: it uses `try_lock` and, if another
//! context currently holds the connection, answers
//! [`FireOutcome::Deferred`] so the wheel retries one `defer_tick` later.
//!
//! After every call the connection's slots are mirrored into the wheel, so
//! the wheel's view of pending deadlines is never older than the last
//! completed operation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crate::connection::{Connection, ConnectionId, FireOutcome};
use crate::error::{ConnError, EngineError};
use crate::hooks::Hooks;
use crate::queue::AckOutcome;
use crate::state::ConnectionState;
use crate::timer::{TimerKey, TimerKind};
use crate::wheel::{self, FireTarget, WeakWheelHandle, WheelHandle};

struct Inner<H> {
    conn: Connection,
    hooks: H,
}

/// A [`Connection`] plus its hooks behind a busy guard.  Cheap to clone.
pub struct SharedConnection<H> {
    id: ConnectionId,
    defer_tick: Duration,
    inner: Arc<Mutex<Inner<H>>>,
    wheel: Option<WeakWheelHandle>,
}

impl<H> Clone for SharedConnection<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            defer_tick: self.defer_tick,
            inner: Arc::clone(&self.inner),
            wheel: self.wheel.clone(),
        }
    }
}

impl<H: Hooks + Send + 'static> SharedConnection<H> {
    /// Wrap without a wheel.  Fires must be delivered by hand via
    /// [`FireTarget::fire`].
    pub fn detached(conn: Connection, hooks: H) -> Self {
        Self {
            id: conn.id(),
            defer_tick: conn.config().defer_tick,
            inner: Arc::new(Mutex::new(Inner { conn, hooks })),
            wheel: None,
        }
    }

    /// Wrap, register with `wheel` and publish any deadline already armed.
    ///
    /// The connection keeps only a weak link to the wheel; once the caller's
    /// handles are gone its timers stop firing.
    pub fn attach(conn: Connection, hooks: H, wheel: &WheelHandle) -> Self {
        let mut shared = Self::detached(conn, hooks);
        shared.wheel = Some(wheel.downgrade());
        wheel.register(shared.id, Arc::new(shared.clone()));
        shared.with(|_, _| ());
        shared
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Block until the connection is free, run `f`, then publish its slots.
    pub fn with<R>(&self, f: impl FnOnce(&mut Connection, &mut H) -> R) -> R {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let out = f(&mut inner.conn, &mut inner.hooks);
        self.publish(&inner.conn);
        out
    }

    /// Read-only view of the connection.
    pub fn inspect<R>(&self, f: impl FnOnce(&Connection, &H) -> R) -> R {
        let guard = self.lock();
        f(&guard.conn, &guard.hooks)
    }

    pub fn state(&self) -> ConnectionState {
        self.inspect(|conn, _| conn.state())
    }

    pub fn enqueue(&self, seg_flags: u8, payload: Vec<u8>) -> Result<u32, EngineError> {
        self.with(|conn, _| conn.enqueue(seg_flags, payload, wheel::now()))
    }

    pub fn on_ack(&self, ack: u32) -> Result<AckOutcome, EngineError> {
        self.with(|conn, _| conn.on_ack(ack, wheel::now()))
    }

    pub fn on_window_update(&self, window: u32) -> Result<(), EngineError> {
        self.with(|conn, _| conn.on_window_update(window, wheel::now()))
    }

    pub fn nudge(&self) -> usize {
        self.with(|conn, hooks| conn.nudge(wheel::now(), hooks))
    }

    pub fn record_soft_error(&self, err: ConnError) {
        self.with(|conn, _| conn.record_soft_error(err));
    }

    pub fn transition(&self, next: ConnectionState) -> Result<(), EngineError> {
        self.with(|conn, _| conn.transition(next, wheel::now()))
    }

    pub fn set_keepalive(&self, enabled: bool) {
        self.with(|conn, _| conn.set_keepalive(enabled, wheel::now()));
    }

    pub fn close(&self) {
        self.with(|conn, hooks| conn.close(hooks));
    }

    fn lock(&self) -> MutexGuard<'_, Inner<H>> {
        // Recover from a panic inside a hook.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, conn: &Connection) {
        let Some(wheel) = self.wheel.as_ref().and_then(WeakWheelHandle::upgrade) else {
            return;
        };
        if conn.state() == ConnectionState::Closed {
            wheel.deregister(self.id);
            return;
        }
        for kind in [TimerKind::Retransmit, TimerKind::Linger] {
            wheel.sync(TimerKey { id: self.id, kind }, conn.pending(kind));
        }
    }
}

impl<H: Hooks + Send + 'static> FireTarget for SharedConnection<H> {
    fn fire(&self, kind: TimerKind, generation: u64, now: Instant) -> FireOutcome {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::debug!("[{}] busy; {:?} fire deferred", self.id, kind);
                return FireOutcome::Deferred {
                    retry_at: now + self.defer_tick,
                };
            }
        };
        let inner = &mut *guard;
        let outcome = inner.conn.on_timer(kind, generation, now, &mut inner.hooks);
        self.publish(&inner.conn);
        outcome
    }
}
