//! Owning manager for every log store sharing one device.
//!
//! The service is a thin registry: it creates stores, wires them to the
//! device for upcall routing, kicks off replay at boot, and runs the
//! collective half of the truncation protocol, where device reclamation
//! must respect the minimum barrier across all streams.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::LogStoreOptions;
use crate::device::LogDevice;
use crate::error::{Error, Result};
use crate::store::LogStore;
use crate::types::{DeviceKey, StoreId};

pub struct LogStoreService {
  device: Arc<dyn LogDevice>,
  stores: RwLock<HashMap<StoreId, Arc<LogStore>>>,
}

impl LogStoreService {
  pub fn new(device: Arc<dyn LogDevice>) -> Self {
    Self {
      device,
      stores: RwLock::new(HashMap::new()),
    }
  }

  /// Creates a store and registers it with the device for upcall routing.
  ///
  /// Uses the read-then-write pattern so concurrent creators of different
  /// stores do not serialize on the registry lock.
  pub fn create_store(&self, store_id: StoreId, options: LogStoreOptions) -> Result<Arc<LogStore>> {
    {
      let stores = self.stores.read();
      if stores.contains_key(&store_id) {
        return Err(Error::DuplicateStore(store_id));
      }
    }

    let store = Arc::new(LogStore::new(store_id, self.device.clone(), options)?);

    let mut stores = self.stores.write();
    if stores.contains_key(&store_id) {
      return Err(Error::DuplicateStore(store_id));
    }
    self.device.register_store(store.clone())?;
    stores.insert(store_id, store.clone());

    debug!(target: "plexlog::service", store_id, "created log store");
    Ok(store)
  }

  pub fn get_store(&self, store_id: StoreId) -> Option<Arc<LogStore>> {
    self.stores.read().get(&store_id).cloned()
  }

  /// Closes the store and detaches it from the device. In-flight requests
  /// surface error completions from the device.
  pub fn remove_store(&self, store_id: StoreId) -> Result<()> {
    let store = self
      .stores
      .write()
      .remove(&store_id)
      .ok_or(Error::UnknownStore(store_id))?;
    store.close();
    self.device.unregister_store(store_id);
    debug!(target: "plexlog::service", store_id, "removed log store");
    Ok(())
  }

  /// Drives boot-time replay: the device re-delivers every surviving entry
  /// to its registered store, then signals replay end on each. Call after
  /// every store has been created and its callbacks registered.
  pub fn replay(&self) -> Result<()> {
    self.device.replay()
  }

  /// Collective device truncation: gathers every store's oldest barrier,
  /// truncates the device once at the global minimum, and confirms it back
  /// to every store. Returns the reclaimed key, or `None` when no store
  /// had a barrier to offer.
  pub fn device_truncate(&self) -> Result<Option<DeviceKey>> {
    let stores: Vec<Arc<LogStore>> = self.stores.read().values().cloned().collect();

    let mut min_key: Option<DeviceKey> = None;
    for store in &stores {
      if let Some(barrier) = store.pre_device_truncation() {
        min_key = Some(match min_key {
          Some(current) => current.min(barrier.key),
          None => barrier.key,
        });
      }
    }

    let Some(key) = min_key else {
      return Ok(None);
    };

    self.device.truncate(key)?;
    for store in &stores {
      store.post_device_truncation(key);
    }

    info!(target: "plexlog::service", %key, "device truncation completed");
    Ok(Some(key))
  }
}
