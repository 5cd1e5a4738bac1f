//! Agent process entry point.
//!
//! Each living individual runs this loop in its own OS process, isolated
//! from every other agent: connect to the bus, register, then wait for tick
//! signals, read the shared world slot, decide one action and submit it.
//! The environment is authoritative for everything; this process only ever
//! works on cached snapshots of its own record.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::agent::policy;
use crate::agent::{AgentId, AgentKind, Position};
use crate::protocol::{
    encode_line, decode_line, ActionMessage, AgentAction, LifecycleMessage, PROTOCOL_VERSION,
};
use crate::store::{SlotReader, StoreError};

/// Attempts to reach the bus / slot before giving up
const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_DELAY: Duration = Duration::from_millis(100);

/// Consecutive read timeouts tolerated before the process presumes the
/// coordinator lost and exits with a fault.
const SIGNAL_PATIENCE: u32 = 5;

/// Immutable startup arguments, fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct AgentOpts {
    pub agent_id: AgentId,
    pub kind: AgentKind,
    pub position: Position,
    pub energy: u32,
    pub sensing_radius: u8,
    pub bus_addr: String,
    pub world_slot: String,
    pub tick_interval_ms: u64,
}

/// Internal faults of an agent process; any of these exits nonzero
#[derive(Debug)]
pub enum AgentError {
    Io(io::Error),
    Protocol(serde_json::Error),
    Store(StoreError),
    /// No tick signal within the patience window
    SignalLost,
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::Store(e) => write!(f, "world store error: {}", e),
            Self::SignalLost => write!(f, "no tick signal from the environment"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<io::Error> for AgentError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e)
    }
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Run the agent loop to completion.
///
/// Returns `Ok(())` on a clean `Terminate` (or on observing its own record
/// reaped), an error on any internal fault; the caller maps that to the
/// process exit code the environment observes.
pub fn run(opts: &AgentOpts) -> Result<(), AgentError> {
    let stream = connect_with_retry(&opts.bus_addr)?;
    stream.set_nodelay(true).ok();

    // The read timeout bounds the wait for the next tick signal.
    let timeout = Duration::from_millis((opts.tick_interval_ms * 4).max(1000));
    stream.set_read_timeout(Some(timeout))?;

    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    // Register before emitting any event (spawn contract).
    let register = ActionMessage::Register {
        agent_id: opts.agent_id,
        pid: std::process::id(),
        protocol: PROTOCOL_VERSION,
    };
    writer.write_all(encode_line(&register)?.as_bytes())?;

    let slot = open_slot_with_retry(&opts.world_slot)?;

    let mut rng = ChaCha8Rng::seed_from_u64(opts.agent_id ^ ((std::process::id() as u64) << 32));
    let mut seq: u64 = 0;
    let mut quiet_reads: u32 = 0;
    let mut line = String::new();

    log::debug!(
        "agent {} ({}) up at {} with energy {}",
        opts.agent_id,
        opts.kind,
        opts.position,
        opts.energy
    );

    loop {
        match reader.read_line(&mut line) {
            Ok(0) => {
                // Coordinator closed the connection; nothing left to do.
                log::debug!("agent {}: bus closed, exiting", opts.agent_id);
                return Ok(());
            }
            Ok(_) => {
                quiet_reads = 0;
                let message: Result<LifecycleMessage, _> = decode_line(&line);
                line.clear();
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!("agent {}: undecodable lifecycle line: {}", opts.agent_id, e);
                        continue;
                    }
                };
                match message {
                    LifecycleMessage::Registered { tick, .. } => {
                        log::debug!("agent {}: registered at tick {}", opts.agent_id, tick);
                    }
                    LifecycleMessage::TickSignal { tick } => {
                        match act(opts, &slot, &mut writer, &mut seq, &mut rng) {
                            Ok(true) => {}
                            Ok(false) => {
                                // Own record gone or dead: clean exit.
                                log::debug!(
                                    "agent {}: reaped as of tick {}, exiting",
                                    opts.agent_id,
                                    tick
                                );
                                return Ok(());
                            }
                            Err(e) => {
                                // Abandon the record so the environment can
                                // reap without waiting out the deadline.
                                seq += 1;
                                let die = AgentAction::Die.into_message(opts.agent_id, seq);
                                if let Ok(line) = encode_line(&die) {
                                    let _ = writer.write_all(line.as_bytes());
                                }
                                return Err(e);
                            }
                        }
                    }
                    LifecycleMessage::Terminate => {
                        log::debug!("agent {}: terminate received", opts.agent_id);
                        return Ok(());
                    }
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                quiet_reads += 1;
                if quiet_reads >= SIGNAL_PATIENCE {
                    return Err(AgentError::SignalLost);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// One tick: read the snapshot, decide, submit. Returns false when the own
/// record is gone and the process should exit cleanly.
fn act<W: Write, R: rand::Rng>(
    opts: &AgentOpts,
    slot: &SlotReader,
    writer: &mut W,
    seq: &mut u64,
    rng: &mut R,
) -> Result<bool, AgentError> {
    let view = slot.read_snapshot()?;

    let me = match view.agent(opts.agent_id) {
        Some(record) if record.alive => record.clone(),
        _ => return Ok(false),
    };

    let action = policy::decide(&me, &view, opts.sensing_radius, rng);
    *seq += 1;
    let message = action.into_message(opts.agent_id, *seq);
    writer.write_all(encode_line(&message)?.as_bytes())?;
    Ok(true)
}

fn connect_with_retry(addr: &str) -> Result<TcpStream, AgentError> {
    let mut last = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last = Some(e);
                std::thread::sleep(CONNECT_DELAY);
            }
        }
    }
    Err(AgentError::Io(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotConnected, "bus unreachable")
    })))
}

fn open_slot_with_retry(path: &str) -> Result<SlotReader, AgentError> {
    let mut last = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match SlotReader::open(path) {
            Ok(slot) => return Ok(slot),
            Err(e) => {
                last = Some(e);
                std::thread::sleep(CONNECT_DELAY);
            }
        }
    }
    Err(match last {
        Some(e) => AgentError::Store(e),
        None => AgentError::Io(io::Error::new(io::ErrorKind::NotFound, "world slot missing")),
    })
}
