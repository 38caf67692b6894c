//! Single-flight, disk-backed cache keyed by owner address.
//!
//! Reads answer from memory (hydrated from the record store on first touch)
//! and never wait on upstream. A stale or empty key schedules at most one
//! background refresh; its result replaces the record as a whole.

use super::{CacheState, CachedView, Loader};
use crate::db::{RecordStore, StoredRecord};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct Slot<T> {
    value: Option<T>,
    updated_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            value: None,
            updated_at: None,
            last_error: None,
        }
    }
}

/// Per-owner refresh bookkeeping.
///
/// An owner's generation advances on every invalidation. A refresh records
/// the generation it started under and only lands while that is current.
#[derive(Debug, Default)]
struct Refreshes {
    generations: HashMap<Address, u64>,
    in_flight: HashMap<Address, u64>,
}

impl Refreshes {
    fn generation(&self, owner: Address) -> u64 {
        self.generations.get(&owner).copied().unwrap_or(0)
    }
}

/// Clears the in-flight marker for `owner` however the refresh task ends,
/// unless an invalidation already replaced it.
struct InFlightGuard {
    refreshes: Arc<Mutex<Refreshes>>,
    owner: Address,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut refreshes = lock(&self.refreshes);
        if refreshes.in_flight.get(&self.owner) == Some(&self.generation) {
            refreshes.in_flight.remove(&self.owner);
        }
    }
}

/// One cache family (e.g. positions, fees) sharing a TTL, loader and store.
pub struct IncrementalCache<T> {
    family: String,
    ttl: Duration,
    store: Arc<dyn RecordStore>,
    loader: Arc<dyn Loader<T>>,
    slots: Mutex<HashMap<Address, Slot<T>>>,
    refreshes: Arc<Mutex<Refreshes>>,
}

impl<T> IncrementalCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        family: impl Into<String>,
        ttl: Duration,
        store: Arc<dyn RecordStore>,
        loader: Arc<dyn Loader<T>>,
    ) -> Self {
        Self {
            family: family.into(),
            ttl,
            store,
            loader,
            slots: Mutex::new(HashMap::new()),
            refreshes: Arc::new(Mutex::new(Refreshes::default())),
        }
    }

    /// Durable key for `owner`: `<family>:0x<lowercase hex>`.
    pub fn key_for(&self, owner: Address) -> String {
        format!("{}:0x{}", self.family, hex::encode(owner.as_slice()))
    }

    fn owner_from_key(&self, key: &str) -> Option<Address> {
        key.strip_prefix(&self.family)?
            .strip_prefix(':')?
            .parse()
            .ok()
    }

    /// Return the best known value for `owner`, scheduling a background
    /// refresh when it is empty or stale.
    pub async fn read(self: &Arc<Self>, owner: Address) -> CachedView<T> {
        self.hydrate(owner).await;
        let mut view = self.view(owner);
        if matches!(view.state, CacheState::Empty | CacheState::Stale) {
            // Either this read started the refresh or another one is running.
            self.spawn_refresh(owner);
            view.state = CacheState::RefreshInFlight;
        }
        view
    }

    /// Current state without triggering a refresh.
    pub async fn state(&self, owner: Address) -> CacheState {
        self.hydrate(owner).await;
        self.view(owner).state
    }

    /// Drop `owner`'s record from memory and the durable store.
    ///
    /// A refresh already in flight keeps running but its result is discarded,
    /// so the key reads as empty until a refresh started afterwards lands.
    pub async fn invalidate(&self, owner: Address) -> Result<(), crate::db::StorageError> {
        {
            let mut refreshes = lock(&self.refreshes);
            *refreshes.generations.entry(owner).or_insert(0) += 1;
            refreshes.in_flight.remove(&owner);
        }
        lock(&self.slots).remove(&owner);
        self.store.remove(&self.key_for(owner)).await?;
        info!(family = %self.family, %owner, "Cache record invalidated");
        Ok(())
    }

    /// Schedule refreshes for every known key that is stale, or empty after a
    /// failed refresh. Returns the number of refreshes started.
    pub async fn sweep(self: &Arc<Self>) -> usize {
        let mut owners: HashSet<Address> = lock(&self.slots).keys().copied().collect();
        match self.store.keys().await {
            Ok(keys) => owners.extend(keys.iter().filter_map(|k| self.owner_from_key(k))),
            Err(e) => warn!(family = %self.family, error = %e, "Failed to list stored keys"),
        }

        let mut started = 0;
        for owner in owners {
            self.hydrate(owner).await;
            let state = self.view(owner).state;
            if matches!(state, CacheState::Stale | CacheState::Empty) && self.spawn_refresh(owner) {
                started += 1;
            }
        }
        if started > 0 {
            info!(family = %self.family, started, "Sweep scheduled refreshes");
        }
        started
    }

    /// Load `owner`'s durable record into memory if it is not there yet.
    /// Storage failures are logged and leave the key empty.
    async fn hydrate(&self, owner: Address) {
        if lock(&self.slots).contains_key(&owner) {
            return;
        }

        let generation = lock(&self.refreshes).generation(owner);
        let key = self.key_for(owner);
        let slot = match self.store.load(&key).await {
            Ok(Some(record)) => match serde_json::from_value::<T>(record.value) {
                Ok(value) => Slot {
                    value: Some(value),
                    updated_at: Some(record.updated_at),
                    last_error: None,
                },
                Err(e) => {
                    warn!(%key, error = %e, "Discarding undecodable cache record");
                    Slot::empty()
                }
            },
            Ok(None) => Slot::empty(),
            Err(e) => {
                warn!(%key, error = %e, "Failed to load cache record, treating as empty");
                Slot::empty()
            }
        };

        // A refresh may have landed, or an invalidation, while we were reading.
        let refreshes = lock(&self.refreshes);
        if refreshes.generation(owner) == generation {
            lock(&self.slots).entry(owner).or_insert(slot);
        }
    }

    fn view(&self, owner: Address) -> CachedView<T> {
        let slot = lock(&self.slots).get(&owner).cloned().unwrap_or_else(Slot::empty);
        let state = if lock(&self.refreshes).in_flight.contains_key(&owner) {
            CacheState::RefreshInFlight
        } else {
            match slot.updated_at {
                None => CacheState::Empty,
                Some(at) if self.is_expired(at) => CacheState::Stale,
                Some(_) => CacheState::Fresh,
            }
        };
        CachedView {
            value: slot.value,
            updated_at: slot.updated_at,
            state,
            last_error: slot.last_error,
        }
    }

    fn is_expired(&self, updated_at: DateTime<Utc>) -> bool {
        let age = (Utc::now() - updated_at).to_std().unwrap_or(Duration::ZERO);
        age >= self.ttl
    }

    /// Start a background refresh unless one is already running for `owner`.
    fn spawn_refresh(self: &Arc<Self>, owner: Address) -> bool {
        let guard = {
            let mut refreshes = lock(&self.refreshes);
            if refreshes.in_flight.contains_key(&owner) {
                return false;
            }
            let generation = refreshes.generation(owner);
            refreshes.in_flight.insert(owner, generation);
            InFlightGuard {
                refreshes: Arc::clone(&self.refreshes),
                owner,
                generation,
            }
        };

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let generation = guard.generation;
            let _guard = guard;
            cache.refresh(owner, generation).await;
        });
        true
    }

    fn is_current(&self, owner: Address, generation: u64) -> bool {
        lock(&self.refreshes).generation(owner) == generation
    }

    async fn refresh(&self, owner: Address, generation: u64) {
        let key = self.key_for(owner);
        info!(%key, "Refreshing cache record");

        let value = match self.loader.load(owner).await {
            Ok(value) => value,
            Err(e) => {
                warn!(%key, error = %e, "Cache refresh failed, keeping previous value");
                let refreshes = lock(&self.refreshes);
                if refreshes.generation(owner) == generation {
                    lock(&self.slots)
                        .entry(owner)
                        .or_insert_with(Slot::empty)
                        .last_error = Some(e.to_string());
                }
                return;
            }
        };

        if !self.is_current(owner, generation) {
            info!(%key, "Discarding refresh started before invalidation");
            return;
        }

        let now = Utc::now();
        match serde_json::to_value(&value) {
            Ok(json) => {
                let record = StoredRecord::new(json, now);
                match self.store.save(&key, &record).await {
                    Ok(()) => info!(%key, records = record.record_count, "Cache record refreshed"),
                    Err(e) => warn!(%key, error = %e, "Failed to persist cache record"),
                }
            }
            Err(e) => warn!(%key, error = %e, "Failed to serialize cache record"),
        }

        let landed = {
            let refreshes = lock(&self.refreshes);
            let current = refreshes.generation(owner) == generation;
            if current {
                lock(&self.slots).insert(
                    owner,
                    Slot {
                        value: Some(value),
                        updated_at: Some(now),
                        last_error: None,
                    },
                );
            }
            current
        };
        if !landed {
            // Invalidated while persisting; take back the record just written.
            info!(%key, "Discarding refresh started before invalidation");
            if let Err(e) = self.store.remove(&key).await {
                warn!(%key, error = %e, "Failed to remove discarded cache record");
            }
        }
    }
}
