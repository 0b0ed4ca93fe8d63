//! Connection finite-state machine (FSM) types.
//!
//! Only the subset of the TCP state diagram (RFC 793 §3.2) that the
//! retransmit engine reasons about is modelled here.  Handshake-side states
//! such as `LISTEN` or `SYN_RECEIVED` belong to the external handshake path
//! and never reach the engine.
//!
//! ```text
//!  SYN_SENT ──SYN-ACK──▶ ESTABLISHED ──close──▶ FIN_WAIT_1 ──ACK──▶ FIN_WAIT_2
//!     │                      │                     │                   │
//!     │ retries exhausted    │ retries exhausted   │ FIN               │ FIN
//!     ▼                      ▼                     ▼                   ▼
//!   CLOSED ◀──────────────  CLOSED              CLOSING ──────────▶ TIME_WAIT
//!     ▲                                                                 │
//!     └───────────────────────── linger expired ───────────────────────┘
//! ```
//!
//! Transitions driven by ACKs and the application are made by the caller via
//! [`crate::connection::Connection::transition`]; transitions driven by timer
//! fires live in [`crate::connection`].

/// All states a [`crate::connection::Connection`] can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN; waiting for ACK.
    FinWait1,
    /// ACK of local FIN received; waiting for peer's FIN.
    FinWait2,
    /// Both sides sent FIN simultaneously.
    Closing,
    /// Waiting out the linger interval before the tuple is released.
    TimeWait,
    /// No connection exists.
    #[default]
    Closed,
}

impl ConnectionState {
    /// `true` before the local side has started closing.
    pub fn is_pre_close(self) -> bool {
        matches!(self, Self::SynSent | Self::Established)
    }

    /// `true` once our FIN is out but the connection is not yet lingering.
    ///
    /// Running out of retries in one of these states still reserves the
    /// address tuple via TIME_WAIT.
    pub fn is_closing(self) -> bool {
        matches!(self, Self::FinWait1 | Self::FinWait2 | Self::Closing)
    }

    /// `true` for states in which the retransmit timer may legitimately run.
    pub fn is_active(self) -> bool {
        self.is_pre_close() || self.is_closing()
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SynSent => "SYN_SENT",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::Closing => "CLOSING",
            Self::TimeWait => "TIME_WAIT",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
