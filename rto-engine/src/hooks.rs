//! Collaborator interface supplied by the surrounding transport.
//!
//! The engine never builds or transmits packets itself.  Everything with an
//! outside effect goes through [`Hooks`]; implementations are expected to
//! hand the work off (queue a frame, signal a waiter) and return promptly.

use crate::connection::ConnectionId;
use crate::error::{ConnError, PathError};
use crate::queue::Segment;

pub trait Hooks {
    /// Put `segment` on the wire again, unchanged.
    fn resend(&mut self, id: ConnectionId, segment: &Segment);

    /// Send a one-byte zero-window probe.
    fn send_probe(&mut self, id: ConnectionId);

    /// Send a keepalive probe.
    fn send_keepalive(&mut self, id: ConnectionId);

    /// Best-effort route / neighbour re-check.  Errors are ignored.
    fn revalidate_path(&mut self, id: ConnectionId) -> Result<(), PathError>;

    /// Surface a fatal error to the owning application.
    fn report_error(&mut self, id: ConnectionId, err: &ConnError);

    /// The connection reached `CLOSED` and may be deallocated.
    fn terminate(&mut self, id: ConnectionId);
}
