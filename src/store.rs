//! World store: the version-stamped grid + agent-directory state.
//!
//! Single writer (the environment coordinator), many readers. Two faces:
//!
//! - An in-process store for the control surface: an even/odd version
//!   counter around an `RwLock`ed view; readers check the counter before and
//!   after the copy and retry a torn read.
//! - A file-backed shared slot for agent processes, which attach to the slot
//!   path and poll it without any message exchange. The slot header carries
//!   magic bytes and the same even/odd version protocol, so an interrupted
//!   writer can never present a torn payload as stable.
//!
//! Raw bytes are never exposed; all access goes through `SlotWriter`,
//! `SlotReader` and `StoreReader`, which enforce the retry contract.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, TryLockError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentRecord};
use crate::config::SimParameters;
use crate::grid::FoodGrid;

/// Slot file magic bytes
const SLOT_MAGIC: &[u8; 4] = b"VIVW";

const VERSION_OFFSET: u64 = 4;
const LEN_OFFSET: u64 = 12;
const PAYLOAD_OFFSET: u64 = 16;

/// Bounded retries for a torn or in-progress read
const MAX_READ_RETRIES: u32 = 32;
/// Delay between read retries
const RETRY_DELAY: Duration = Duration::from_millis(1);

/// A self-consistent snapshot of the world, versioned by tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldView {
    pub tick: u64,
    pub grid_size: usize,
    pub food_cap: u32,
    /// Flattened row-major food densities
    pub grid: Vec<u32>,
    pub agents: Vec<AgentRecord>,
    pub params: SimParameters,
}

impl WorldView {
    pub fn new(tick: u64, grid: &FoodGrid, agents: Vec<AgentRecord>, params: SimParameters) -> Self {
        Self {
            tick,
            grid_size: grid.size(),
            food_cap: grid.cap(),
            grid: grid.cells().to_vec(),
            agents,
            params,
        }
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentRecord> {
        self.agents.iter().find(|record| record.id == id)
    }

    pub fn food_at(&self, x: u8, y: u8) -> u32 {
        let x = x as usize;
        let y = y as usize;
        if x < self.grid_size && y < self.grid_size {
            self.grid[y * self.grid_size + x]
        } else {
            0
        }
    }

    /// Living agents only
    pub fn live_agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.iter().filter(|record| record.alive)
    }

    /// Reconstruct a `FoodGrid` from the flattened cells
    pub fn food_grid(&self) -> FoodGrid {
        FoodGrid::from_cells(self.grid_size, self.food_cap, self.grid.clone())
    }
}

/// Errors produced by store access
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Codec(bincode::Error),
    BadMagic,
    /// Version changed under the reader on every bounded attempt
    TornRead,
    /// Exclusive section unavailable within the bounded wait
    Contention { waited_ms: u64 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::BadMagic => write!(f, "not a world slot file"),
            Self::TornRead => write!(f, "snapshot read kept tearing; giving up"),
            Self::Contention { waited_ms } => {
                write!(f, "exclusive section unavailable after {}ms", waited_ms)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        Self::Codec(e)
    }
}

/// Writer end of the file-backed shared slot. Created once by the
/// coordinator; the sole writer of the slot file.
pub struct SlotWriter {
    file: File,
    version: u64,
}

impl SlotWriter {
    /// Create (or truncate) the slot file and write an empty header
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all_at(SLOT_MAGIC, 0)?;
        file.write_all_at(&0u64.to_le_bytes(), VERSION_OFFSET)?;
        file.write_all_at(&0u32.to_le_bytes(), LEN_OFFSET)?;
        Ok(Self { file, version: 0 })
    }

    /// Publish a view: odd version while the payload is in flight, even
    /// (and larger) once it is stable.
    pub fn publish(&mut self, view: &WorldView) -> Result<u64, StoreError> {
        let payload = bincode::serialize(view)?;

        let writing = self.version + 1;
        self.file
            .write_all_at(&writing.to_le_bytes(), VERSION_OFFSET)?;
        self.file
            .write_all_at(&(payload.len() as u32).to_le_bytes(), LEN_OFFSET)?;
        self.file.write_all_at(&payload, PAYLOAD_OFFSET)?;

        self.version = writing + 1;
        self.file
            .write_all_at(&self.version.to_le_bytes(), VERSION_OFFSET)?;
        Ok(self.version)
    }
}

/// Reader end of the shared slot; used by agent processes.
pub struct SlotReader {
    file: File,
}

impl SlotReader {
    /// Attach to an existing slot file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        let mut magic = [0u8; 4];
        file.read_exact_at(&mut magic, 0)?;
        if &magic != SLOT_MAGIC {
            return Err(StoreError::BadMagic);
        }
        Ok(Self { file })
    }

    fn read_version(&self) -> Result<u64, StoreError> {
        let mut buf = [0u8; 8];
        self.file.read_exact_at(&mut buf, VERSION_OFFSET)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a self-consistent snapshot.
    ///
    /// The version is checked before and after the payload copy; a torn read
    /// (writer raced the copy) is retried up to a bound, never returned.
    pub fn read_snapshot(&self) -> Result<WorldView, StoreError> {
        for _ in 0..MAX_READ_RETRIES {
            let before = self.read_version()?;
            if before == 0 || before % 2 == 1 {
                std::thread::sleep(RETRY_DELAY);
                continue;
            }

            let mut len_buf = [0u8; 4];
            self.file.read_exact_at(&mut len_buf, LEN_OFFSET)?;
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match self.file.read_exact_at(&mut payload, PAYLOAD_OFFSET) {
                Ok(()) => {}
                // Writer truncated/grew the file mid-copy: a torn read.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    std::thread::sleep(RETRY_DELAY);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let after = self.read_version()?;
            if before == after {
                return Ok(bincode::deserialize(&payload)?);
            }
            std::thread::sleep(RETRY_DELAY);
        }
        Err(StoreError::TornRead)
    }
}

struct StoreShared {
    version: AtomicU64,
    view: RwLock<Arc<WorldView>>,
}

/// The in-process store. Owned by the coordinator; `apply` is the only
/// mutation path and the coordinator holds the only `WorldStore` value, so
/// single-writer discipline is enforced by ownership.
pub struct WorldStore {
    shared: Arc<StoreShared>,
    slot: Option<SlotWriter>,
    apply_timeout: Duration,
}

impl WorldStore {
    /// In-memory store (no shared slot); used by tests and embedded setups
    pub fn new(initial: WorldView, apply_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                version: AtomicU64::new(2),
                view: RwLock::new(Arc::new(initial)),
            }),
            slot: None,
            apply_timeout,
        }
    }

    /// Store backed by a shared slot file at `path`
    pub fn with_slot<P: AsRef<Path>>(
        initial: WorldView,
        apply_timeout: Duration,
        path: P,
    ) -> Result<Self, StoreError> {
        let mut slot = SlotWriter::create(path)?;
        slot.publish(&initial)?;
        let mut store = Self::new(initial, apply_timeout);
        store.slot = Some(slot);
        Ok(store)
    }

    /// Handle for concurrent in-process readers
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current stable version (even)
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::SeqCst)
    }

    /// Atomically replace the published view.
    ///
    /// Acquires the exclusive section with a bounded wait; on timeout the
    /// caller receives `Contention` and nothing was applied. No partial
    /// application is ever observable by a reader.
    pub fn apply(&mut self, view: WorldView) -> Result<u64, StoreError> {
        let started = Instant::now();
        let mut guard = loop {
            match self.shared.view.try_write() {
                Ok(guard) => break guard,
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    if waited >= self.apply_timeout {
                        return Err(StoreError::Contention {
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_micros(200));
                }
                Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
            }
        };

        let published = Arc::new(view);
        self.shared.version.fetch_add(1, Ordering::SeqCst);
        *guard = Arc::clone(&published);
        let version = self.shared.version.fetch_add(1, Ordering::SeqCst) + 1;
        drop(guard);

        if let Some(slot) = self.slot.as_mut() {
            slot.publish(&published)?;
        }
        Ok(version)
    }
}

/// In-process reader handle; never blocks a reader behind another reader.
#[derive(Clone)]
pub struct StoreReader {
    shared: Arc<StoreShared>,
}

impl StoreReader {
    /// Read a self-consistent snapshot, retrying torn reads up to a bound
    pub fn read_snapshot(&self) -> Result<Arc<WorldView>, StoreError> {
        for _ in 0..MAX_READ_RETRIES {
            let before = self.shared.version.load(Ordering::SeqCst);
            if before % 2 == 1 {
                std::thread::sleep(RETRY_DELAY);
                continue;
            }
            let view = match self.shared.view.try_read() {
                Ok(guard) => Arc::clone(&guard),
                Err(TryLockError::WouldBlock) => {
                    std::thread::sleep(RETRY_DELAY);
                    continue;
                }
                Err(TryLockError::Poisoned(poisoned)) => Arc::clone(&poisoned.into_inner()),
            };
            let after = self.shared.version.load(Ordering::SeqCst);
            if before == after {
                return Ok(view);
            }
            std::thread::sleep(RETRY_DELAY);
        }
        Err(StoreError::TornRead)
    }

    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::SeqCst)
    }
}
