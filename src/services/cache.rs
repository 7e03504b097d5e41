use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDomain {
    Wallet,
    Jobs,
    Status,
    Templates,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 4] = [
        CacheDomain::Wallet,
        CacheDomain::Jobs,
        CacheDomain::Status,
        CacheDomain::Templates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheDomain::Wallet => "wallet",
            CacheDomain::Jobs => "jobs",
            CacheDomain::Status => "status",
            CacheDomain::Templates => "templates",
        }
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheDomain::ALL
            .into_iter()
            .find(|domain| domain.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown cache domain: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub domain: CacheDomain,
    pub name: &'static str,
}

impl CacheKey {
    pub const WALLET_COUNT: CacheKey = CacheKey::new(CacheDomain::Wallet, "count");
    pub const JOB_LIST: CacheKey = CacheKey::new(CacheDomain::Jobs, "all");
    pub const STATUS: CacheKey = CacheKey::new(CacheDomain::Status, "summary");
    pub const TEMPLATES: CacheKey = CacheKey::new(CacheDomain::Templates, "all");

    pub const fn new(domain: CacheDomain, name: &'static str) -> Self {
        Self { domain, name }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.name)
    }
}

struct Entry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub hit_rate: f64,
    pub domains: Vec<DomainStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    pub domain: CacheDomain,
    pub entries: usize,
}

/// In-process TTL cache. Values are stored as JSON so any serde type can be cached.
pub struct TtlCache {
    entries: DashMap<CacheKey, Entry>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let now = self.clock.now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(component = "cache", cache_key = %key, "Cache MISS");
                return None;
            }
        };

        match value.and_then(|v| serde_json::from_value(v).ok()) {
            Some(decoded) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(component = "cache", cache_key = %key, "Cache HIT");
                Some(decoded)
            }
            None => {
                // Expired or no longer decodable as T.
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(component = "cache", cache_key = %key, "Cache MISS (stale)");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: CacheKey, value: &T, ttl: Duration) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(component = "cache", cache_key = %key, "Cache set error: {}", e);
                return false;
            }
        };
        let ttl = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => ttl,
            Err(e) => {
                tracing::warn!(component = "cache", cache_key = %key, "Invalid cache TTL: {}", e);
                return false;
            }
        };

        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: self.clock.now() + ttl,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn delete(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear_domain(&self, domain: CacheDomain) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.domain != domain);
        let removed = before.saturating_sub(self.entries.len());
        tracing::info!(component = "cache", domain = %domain, removed, "Cleared cache domain");
        removed
    }

    pub fn clear_all(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        tracing::info!(component = "cache", removed, "Cleared cache");
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let domains: Vec<DomainStats> = CacheDomain::ALL
            .into_iter()
            .map(|domain| DomainStats {
                domain,
                entries: self
                    .entries
                    .iter()
                    .filter(|entry| entry.key().domain == domain && entry.expires_at > now)
                    .count(),
            })
            .collect();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            enabled: true,
            entries: domains.iter().map(|d| d.entries).sum(),
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            domains,
        }
    }
}

/// Stats reported when caching is switched off.
pub fn disabled_stats() -> CacheStats {
    CacheStats {
        enabled: false,
        entries: 0,
        hits: 0,
        misses: 0,
        writes: 0,
        hit_rate: 0.0,
        domains: Vec::new(),
    }
}
