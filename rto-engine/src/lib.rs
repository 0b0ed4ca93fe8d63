//! `rto-engine`: the retransmission-timeout side of a reliable byte-stream
//! transport.
//!
//! # Architecture
//!
//! ```text
//!   ACK path / application                         timer wheel task
//!          │  on_ack, enqueue, close, ...                 │ expiry
//!          ▼                                              ▼
//!  ┌────────────────────────────────────────────────────────────┐
//!  │ SharedConnection  (mutex; fires use try_lock and defer)     │
//!  │  ┌──────────────────────────────────────────────────────┐  │
//!  │  │ Connection                                           │  │
//!  │  │   RtoEstimator   CongestionController   TimerSlot ×2 │  │
//!  │  │   RetransmitQueue                                    │  │
//!  │  └──────────────────────────────┬───────────────────────┘  │
//!  └─────────────────────────────────┼──────────────────────────┘
//!                                    │ resend / probe / keepalive /
//!                                    ▼ report_error / terminate
//!                                  Hooks
//! ```
//!
//! Each module has a single responsibility:
//! - [`connection`]: per-connection lifecycle guard and timer dispatch
//! - [`rto`]: RTT estimation and exponential backoff
//! - [`congestion`]: congestion window collapse and growth
//! - [`queue`]: unacknowledged segments and the retransmit driver
//! - [`timer`]: generation-stamped timer slots
//! - [`wheel`]: global tokio timer task
//! - [`guard`]: busy guard between the wheel and everything else
//! - [`hooks`]: collaborator interface to the transport
//! - [`state`]: connection states
//! - [`config`]: tunables
//! - [`error`]: error types
//! - [`simulator`]: seeded lossy path for tests and the CLI

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod queue;
pub mod rto;
pub mod simulator;
pub mod state;
pub mod timer;
pub mod wheel;
