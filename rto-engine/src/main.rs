//! Entry point for `rto-engine`.
//!
//! The only subcommand, `simulate`, drives one connection across a seeded
//! lossy path through the real timer wheel and prints what happened.  Set
//! `RUST_LOG=debug` to watch individual timeouts and retransmits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use rto_engine::config::EngineConfig;
use rto_engine::connection::{Connection, ConnectionId};
use rto_engine::error::EngineError;
use rto_engine::guard::SharedConnection;
use rto_engine::queue::flags;
use rto_engine::simulator::{SimHooks, SimulatorConfig};
use rto_engine::state::ConnectionState;
use rto_engine::wheel;

/// Retransmission-timeout engine for a reliable byte stream.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a batch of segments over a simulated lossy path.
    Simulate(SimulateArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Start {
    /// Begin with an active open.
    SynSent,
    /// Begin with the handshake already done.
    Established,
}

#[derive(clap::Args)]
struct SimulateArgs {
    /// State the connection starts in.
    #[arg(long, value_enum, default_value = "syn-sent")]
    start: Start,
    /// Number of data segments to send.
    #[arg(short, long, default_value_t = 20)]
    segments: u32,
    /// Payload bytes per segment.
    #[arg(long, default_value_t = 512)]
    segment_size: usize,
    /// Per-direction drop probability.
    #[arg(short, long, default_value_t = 0.2, value_parser = probability)]
    loss: f64,
    /// RNG seed for the loss model.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Path round-trip time in milliseconds.
    #[arg(long, default_value_t = 50)]
    rtt_ms: u64,
    /// Initial RTO in milliseconds.
    #[arg(long, default_value_t = 1000)]
    initial_rto_ms: u64,
    /// Lower RTO clamp in milliseconds.
    #[arg(long, default_value_t = 200)]
    rto_min_ms: u64,
    /// Upper RTO clamp in milliseconds.
    #[arg(long, default_value_t = 120_000)]
    rto_max_ms: u64,
    /// Retry ceiling in SYN_SENT.
    #[arg(long, default_value_t = 5)]
    syn_retries: u32,
    /// Retry ceiling in every other state.
    #[arg(long, default_value_t = 15)]
    hard_retries: u32,
    /// TIME_WAIT linger in milliseconds.
    #[arg(long, default_value_t = 1000)]
    linger_ms: u64,
}

/// Parse a drop probability in `[0.0, 1.0]`.
fn probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{s} is not in [0.0, 1.0]"))
    }
}

impl SimulateArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            syn_retries: self.syn_retries,
            hard_retries: self.hard_retries,
            initial_rto: Duration::from_millis(self.initial_rto_ms),
            rto_min: Duration::from_millis(self.rto_min_ms),
            rto_max: Duration::from_millis(self.rto_max_ms),
            time_wait_linger: Duration::from_millis(self.linger_ms),
            ..EngineConfig::default()
        }
    }

    fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            loss_rate: self.loss,
            rtt: Duration::from_millis(self.rtt_ms),
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Simulate(args) => simulate(args).await,
    }
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

enum Phase {
    Handshake,
    Data,
    Closing,
    Lingering,
}

async fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let config = Arc::new(args.engine_config());

    let (handle, wheel_task) = wheel::spawn();
    let id = ConnectionId(1);
    let isn = 1000;
    let now = wheel::now();
    let mut hooks = SimHooks::new(&args.simulator_config());

    let (conn, mut phase) = match args.start {
        Start::SynSent => (Connection::connect(id, isn, config, now), Phase::Handshake),
        Start::Established => (
            Connection::new(id, ConnectionState::Established, isn, config),
            Phase::Data,
        ),
    };
    let conn = conn.context("invalid engine configuration")?;
    if matches!(phase, Phase::Handshake) {
        hooks.transmit(isn + 1, now);
    }
    let shared = SharedConnection::attach(conn, hooks, &handle);
    log::info!("[{id}] simulating {} segment(s), loss={}", args.segments, args.loss);

    let mut queued = 0u32;
    while shared.state() != ConnectionState::Closed {
        // The wheel may tear the connection down between any two calls.
        if let Err(err) = step(&shared, &mut phase, &mut queued, &args) {
            log::debug!("[sim] {err}");
        }

        let next = shared.inspect(|_, hooks| hooks.next_arrival());
        let tick = wheel::now() + Duration::from_millis(10);
        let wake = next.map_or(tick, |at| at.min(tick));
        tokio::time::sleep_until(tokio::time::Instant::from_std(wake)).await;
    }

    let stats = shared.inspect(|_, hooks| hooks.stats.clone());
    drop(shared);
    drop(handle);
    let wheel_stats = wheel_task.await.context("timer wheel task failed")?;

    println!(
        "transmitted={} resent={} lost={} revalidations={} timer fires={} deferred={}",
        stats.transmitted,
        stats.resent,
        stats.lost,
        stats.revalidations,
        wheel_stats.handled,
        wheel_stats.deferred,
    );
    if let Some(err) = stats.error {
        bail!("connection failed after {queued} segment(s): {err} (errno {})", err.errno());
    }
    Ok(())
}

/// Deliver arrived ACKs, then move the transfer along by one step.
fn step(
    shared: &SharedConnection<SimHooks>,
    phase: &mut Phase,
    queued: &mut u32,
    args: &SimulateArgs,
) -> Result<(), EngineError> {
    let now = wheel::now();
    if let Some(ack) = shared.with(|_, hooks| hooks.take_due(now)) {
        let outcome = shared.on_ack(ack)?;
        log::debug!("[sim] ACK {ack} acked={} rtt={:?}", outcome.acked, outcome.rtt_sample);
    }

    let (state, drained) = shared.inspect(|conn, _| (conn.state(), conn.queue().is_empty()));
    match *phase {
        Phase::Handshake if drained && state == ConnectionState::SynSent => {
            shared.transition(ConnectionState::Established)?;
            *phase = Phase::Data;
        }
        Phase::Data => {
            fill_window(shared, queued, args)?;
            let drained = shared.inspect(|conn, _| conn.queue().is_empty());
            if *queued == args.segments && drained {
                transmit(shared, flags::FIN, Vec::new())?;
                shared.transition(ConnectionState::FinWait1)?;
                *phase = Phase::Closing;
            }
        }
        Phase::Closing if drained && state == ConnectionState::FinWait1 => {
            // The peer's FIN is assumed to follow its ACK of ours.
            shared.transition(ConnectionState::FinWait2)?;
            shared.transition(ConnectionState::TimeWait)?;
            *phase = Phase::Lingering;
        }
        _ => {}
    }
    Ok(())
}

/// Send new segments while the congestion window has room.
fn fill_window(
    shared: &SharedConnection<SimHooks>,
    queued: &mut u32,
    args: &SimulateArgs,
) -> Result<(), EngineError> {
    while *queued < args.segments {
        let room = shared.inspect(|conn, _| conn.queue().len() < conn.congestion().cwnd as usize);
        if !room {
            break;
        }
        transmit(shared, 0, vec![0u8; args.segment_size])?;
        *queued += 1;
    }
    Ok(())
}

/// First transmission of a new segment.
fn transmit(
    shared: &SharedConnection<SimHooks>,
    seg_flags: u8,
    payload: Vec<u8>,
) -> Result<(), EngineError> {
    shared.with(|conn, hooks| {
        let now = wheel::now();
        conn.enqueue(seg_flags, payload, now)?;
        hooks.transmit(conn.queue().next_seq, now);
        Ok::<(), EngineError>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_must_be_a_probability() {
        assert_eq!(probability("0.25"), Ok(0.25));
        assert!(probability("NaN").is_err());
        assert!(probability("1.5").is_err());
        assert!(probability("lots").is_err());
    }

    #[test]
    fn nan_loss_is_rejected_on_the_command_line() {
        let parsed = Cli::try_parse_from(["rto-engine", "simulate", "--loss", "NaN"]);
        assert!(parsed.is_err());
    }
}
