//! Hybrid logical clock — 64-bit `wall_ms << 16 | counter` timestamps
//!
//! The packed layout gives 48 bits of wall-clock milliseconds and a 16-bit
//! logical counter, so numeric comparison is causal comparison. On JSON wire
//! surfaces an [`Hlc`] travels as the decimal string of the u64 value, which
//! survives every JSON parser without precision loss.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{LakeSyncError, Result};

/// Bits reserved for the logical counter
const COUNTER_BITS: u32 = 16;
const COUNTER_MASK: u64 = 0xFFFF;

/// Default bound on how far a peer wall clock may lead ours (1 minute)
pub const DEFAULT_MAX_DRIFT_MS: u64 = 60_000;

/// A hybrid logical clock timestamp: `wall_ms << 16 | counter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hlc(u64);

impl Hlc {
    /// The zero timestamp (epoch, counter 0)
    pub const ZERO: Hlc = Hlc(0);

    /// Pack a wall-clock millisecond value and a counter into a timestamp
    pub fn encode(wall_ms: u64, counter: u16) -> Self {
        Hlc((wall_ms << COUNTER_BITS) | counter as u64)
    }

    /// Wall-clock component in milliseconds since the Unix epoch
    pub fn wall_ms(&self) -> u64 {
        self.0 >> COUNTER_BITS
    }

    /// Logical counter component
    pub fn counter(&self) -> u16 {
        (self.0 & COUNTER_MASK) as u16
    }

    /// Raw 64-bit value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Hlc(raw)
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Hlc {
    type Err = LakeSyncError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Hlc)
            .map_err(|e| LakeSyncError::Serialization(format!("invalid HLC '{s}': {e}")))
    }
}

// Decimal-string serde: u64 does not survive JSON number parsing everywhere.
impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>().map(Hlc).map_err(serde::de::Error::custom)
    }
}

/// Pluggable wall-clock source so tests can inject deterministic time
pub trait WallClock: Send + Sync {
    /// Current wall time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

/// System wall clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Mutex<u64>,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self { now_ms: Mutex::new(now_ms) }
    }

    pub fn set(&self, now_ms: u64) {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner()) = now_ms;
    }

    pub fn advance(&self, delta_ms: u64) {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner()) += delta_ms;
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Strictly monotonic HLC generator with peer merge
///
/// Thread-safe: the last issued timestamp lives behind a mutex, so a single
/// instance can be shared across tasks via `Arc<HlcClock>`.
pub struct HlcClock {
    clock: Box<dyn WallClock>,
    last: Mutex<Hlc>,
    max_drift_ms: u64,
}

impl HlcClock {
    /// Clock backed by the system wall clock with the default drift bound
    pub fn system() -> Self {
        Self::new(Box::new(SystemClock))
    }

    pub fn new(clock: Box<dyn WallClock>) -> Self {
        Self {
            clock,
            last: Mutex::new(Hlc::ZERO),
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
        }
    }

    pub fn with_max_drift_ms(mut self, max_drift_ms: u64) -> Self {
        self.max_drift_ms = max_drift_ms;
        self
    }

    /// Current wall time as seen by the clock source
    pub fn wall_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Issue the next timestamp, strictly greater than any previous one
    ///
    /// Counter resets to 0 when the wall advances, increments when it does
    /// not. Counter saturation at `0xFFFF` advances the wall by one
    /// millisecond instead of wrapping.
    pub fn now(&self) -> Hlc {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let wall = self.clock.now_ms();
        let next = Self::advance(*last, wall);
        *last = next;
        next
    }

    /// Merge a peer timestamp into local state
    ///
    /// The returned timestamp is strictly greater than both the peer and
    /// every timestamp previously issued locally. Fails with `ClockDrift`
    /// when the peer wall leads the local wall by more than the configured
    /// bound; local state is left untouched in that case.
    pub fn update(&self, peer: Hlc) -> Result<Hlc> {
        let wall = self.clock.now_ms();
        if peer.wall_ms() > wall && peer.wall_ms() - wall > self.max_drift_ms {
            return Err(LakeSyncError::ClockDrift {
                peer_ms: peer.wall_ms(),
                local_ms: wall,
            });
        }

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let base = (*last).max(peer);
        let next = Self::advance(base, wall);
        *last = next;
        Ok(next)
    }

    /// Smallest timestamp strictly greater than `base` with wall at least `wall`
    fn advance(base: Hlc, wall: u64) -> Hlc {
        if wall > base.wall_ms() {
            return Hlc::encode(wall, 0);
        }
        // Wall regressed or stalled: stay on the base wall, bump the counter.
        if base.counter() == u16::MAX {
            return Hlc::encode(base.wall_ms() + 1, 0);
        }
        Hlc::encode(base.wall_ms(), base.counter() + 1)
    }

    /// Compare-order helper used by resolvers: `(hlc, client_id)` pairs
    pub fn winner_cmp(a: (Hlc, &str), b: (Hlc, &str)) -> Ordering {
        a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
    }
}
