//! Configuration Module
//!
//! Cache options supplied at construction, plus loading them from environment
//! variables for hosts that prefer that over hard-coded values.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

// == Strategy ==
/// Eviction strategy used when the cache has to pick a victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Any resident entry
    Random,
    /// Least recently inserted entry; reads never change the order
    #[default]
    Oldest,
    /// Least recently used entry; reads promote to the front
    #[serde(alias = "oldest_lru")]
    Lru,
    /// Entry with the smallest usage count, older entries lose ties
    Lfu,
}

impl Strategy {
    /// Whether a successful read moves the entry to the front.
    pub fn promotes_on_read(self) -> bool {
        matches!(self, Strategy::Lru)
    }
}

impl FromStr for Strategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Strategy::Random),
            "oldest" => Ok(Strategy::Oldest),
            "lru" | "oldest_lru" | "oldestlru" => Ok(Strategy::Lru),
            "lfu" => Ok(Strategy::Lfu),
            other => Err(CacheError::InvalidStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Random => "random",
            Strategy::Oldest => "oldest",
            Strategy::Lru => "lru",
            Strategy::Lfu => "lfu",
        };
        f.write_str(name)
    }
}

// == Cache Options ==
/// Cache configuration parameters. Zero disables the matching mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Resident count the reaper trims toward (0 = no periodic reaping)
    pub max_entries: usize,
    /// Hard cap enforced on every insert (0 = uncapped)
    pub upper: usize,
    /// Victim selection policy
    pub strategy: Strategy,
    /// Per-entry time to live (zero = entries never expire)
    #[serde(rename = "expiration_ms", with = "duration_ms")]
    pub expiration_time: Duration,
    /// Reaper wake period (zero = no reaper)
    #[serde(rename = "reap_interval_ms", with = "duration_ms")]
    pub reap_interval: Duration,
    /// Buffer the reaper leaves below `max_entries`
    pub safe_range: usize,
}

impl CacheOptions {
    /// Creates options with every mechanism disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` - Reaper target (default: 0)
    /// - `CACHE_UPPER` - Hard cap (default: 0)
    /// - `CACHE_STRATEGY` - `random`, `oldest`, `lru` or `lfu` (default: oldest)
    /// - `CACHE_EXPIRATION_MS` - TTL in milliseconds (default: 0)
    /// - `CACHE_REAP_INTERVAL_MS` - Reaper period in milliseconds (default: 0)
    /// - `CACHE_SAFE_RANGE` - Reaper buffer (default: 0)
    pub fn from_env() -> Self {
        Self {
            max_entries: env_parse("CACHE_MAX_ENTRIES").unwrap_or(0),
            upper: env_parse("CACHE_UPPER").unwrap_or(0),
            strategy: env_parse("CACHE_STRATEGY").unwrap_or_default(),
            expiration_time: Duration::from_millis(env_parse("CACHE_EXPIRATION_MS").unwrap_or(0)),
            reap_interval: Duration::from_millis(env_parse("CACHE_REAP_INTERVAL_MS").unwrap_or(0)),
            safe_range: env_parse("CACHE_SAFE_RANGE").unwrap_or(0),
        }
        .normalized()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_upper(mut self, upper: usize) -> Self {
        self.upper = upper;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.expiration_time = ttl;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_safe_range(mut self, safe_range: usize) -> Self {
        self.safe_range = safe_range;
        self
    }

    // == Normalize ==
    /// Raises `upper` to `max_entries` when the hard cap would sit below the
    /// reaper target.
    pub fn normalized(mut self) -> Self {
        if self.upper > 0 && self.max_entries > self.upper {
            self.upper = self.max_entries;
        }
        self
    }

    /// Resident count the reaper stops at, or `None` when reaping is off.
    pub fn reap_floor(&self) -> Option<usize> {
        if self.max_entries == 0 {
            return None;
        }
        Some(self.max_entries.saturating_sub(self.safe_range))
    }

    pub fn expires(&self) -> bool {
        !self.expiration_time.is_zero()
    }

    pub fn reaps(&self) -> bool {
        !self.reap_interval.is_zero() && self.max_entries > 0
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Whole milliseconds in `value`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::saturating_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
