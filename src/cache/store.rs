//! In-memory response store.
//!
//! # Responsibilities
//! - Serve stored responses until their expiry, never after
//! - Bound the store by entry count and entry size
//! - Drop whole regions on demand
//! - Collapse concurrent misses on one key into a single fetch whose outcome,
//!   success or failure, is handed to every caller that joined it
//!
//! # Design Decisions
//! - Expired entries are removed lazily on lookup and in bulk by the
//!   maintenance sweep
//! - A full store rejects new keys instead of evicting live ones; the caller
//!   treats the rejection as a bypass

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::pipeline::request::GatewayResponse;

/// Result of one origin fetch.
pub type FetchOutcome = Result<GatewayResponse, GatewayError>;

type FlightSender = Arc<watch::Sender<Option<FetchOutcome>>>;

/// Store failures. Never fatal to a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("response of {size} bytes exceeds the {limit} byte entry limit")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("cache is full ({capacity} entries)")]
    Full { capacity: usize },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: GatewayResponse,
    expires_at: Instant,
    region: String,
}

/// Shared response cache for every cacheable route.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    flights: DashMap<String, FlightSender>,
    max_entries: usize,
    max_entry_bytes: usize,
}

impl ResponseCache {
    pub fn new(max_entries: usize, max_entry_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            max_entries,
            max_entry_bytes,
        }
    }

    /// Live entry for `key`. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<GatewayResponse> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.response.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn insert(
        &self,
        key: String,
        region: &str,
        response: GatewayResponse,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let size = response.body.len();
        if size > self.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                limit: self.max_entry_bytes,
            });
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                return Err(CacheError::Full {
                    capacity: self.max_entries,
                });
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: Instant::now() + ttl,
                region: region.to_string(),
            },
        );
        Ok(())
    }

    /// Drop every entry tagged with `region`. Returns how many were removed.
    pub fn clear_region(&self, region: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.region != region);
        before.saturating_sub(self.entries.len())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Join the fetch in progress for `key`, or start one.
    ///
    /// A leader re-checks the cache before dispatching: a previous flight may
    /// have stored the key just before it ended.
    pub fn join(&self, key: &str) -> Flight<'_> {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(flight) => Flight::Follower(FlightFollower {
                rx: flight.get().subscribe(),
            }),
            Entry::Vacant(slot) => {
                let (tx, _) = watch::channel(None);
                let tx = Arc::new(tx);
                slot.insert(tx.clone());
                Flight::Leader(FlightLeader {
                    cache: self,
                    key: key.to_string(),
                    tx,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A caller's role in the fetch for one key.
pub enum Flight<'a> {
    Leader(FlightLeader<'a>),
    Follower(FlightFollower),
}

/// The caller that dispatches. Ends the flight on drop, so a cancelled
/// leader releases its followers without an outcome.
pub struct FlightLeader<'a> {
    cache: &'a ResponseCache,
    key: String,
    tx: FlightSender,
}

impl FlightLeader<'_> {
    /// Hand the outcome to every follower.
    pub fn complete(self, outcome: &FetchOutcome) {
        self.tx.send_replace(Some(outcome.clone()));
    }
}

impl Drop for FlightLeader<'_> {
    fn drop(&mut self) {
        self.cache
            .flights
            .remove_if(&self.key, |_, tx| Arc::ptr_eq(tx, &self.tx));
    }
}

/// A caller waiting on another caller's fetch.
pub struct FlightFollower {
    rx: watch::Receiver<Option<FetchOutcome>>,
}

impl FlightFollower {
    /// The leader's outcome, or `None` if the leader went away first.
    pub async fn outcome(mut self) -> Option<FetchOutcome> {
        self.rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| (*outcome).clone())
    }
}
