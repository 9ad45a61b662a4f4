#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use plexlog::{
  decode_record, encode_record, DeviceKey, Error, LogBuffer, LogDevice, LogStore,
  LogStoreOptions, LogStoreService, Lsn, ReadCompCb, RecordKind, Result, StoreId,
};

/// In-memory log device for driving the stores deterministically.
///
/// In `auto` mode every submitted write is committed and completed inline,
/// followed by a one-record flush batch. In manual mode writes queue until
/// the test fires them with `complete_lsn` / `complete_all`, which lets
/// tests inject completions in any order and from any thread.
///
/// Durable records survive as encoded bytes keyed by device key, so a
/// "crash" is simply dropping the service and replaying the same device
/// into fresh stores.
pub struct SimDevice {
  auto_complete: AtomicBool,
  next_offset: AtomicU64,
  stores: RwLock<HashMap<StoreId, Arc<LogStore>>>,
  inner: Mutex<SimInner>,
}

struct SimInner {
  pending: Vec<PendingWrite>,
  durable: BTreeMap<DeviceKey, Vec<u8>>,
}

struct PendingWrite {
  store_id: StoreId,
  lsn: Lsn,
  kind: RecordKind,
  payload: Vec<u8>,
}

impl SimDevice {
  pub fn new(auto_complete: bool) -> Arc<Self> {
    Arc::new(Self {
      auto_complete: AtomicBool::new(auto_complete),
      next_offset: AtomicU64::new(0),
      stores: RwLock::new(HashMap::new()),
      inner: Mutex::new(SimInner {
        pending: Vec::new(),
        durable: BTreeMap::new(),
      }),
    })
  }

  fn alloc_key(&self) -> DeviceKey {
    DeviceKey::new(0, self.next_offset.fetch_add(1, Ordering::SeqCst))
  }

  fn commit(&self, write: &PendingWrite) -> DeviceKey {
    let key = self.alloc_key();
    let bytes = encode_record(write.store_id, write.lsn, write.kind, &write.payload).unwrap();
    self.inner.lock().durable.insert(key, bytes);
    key
  }

  fn dispatch_completion(&self, store_id: StoreId, lsn: Lsn, key: DeviceKey) {
    let store = self.stores.read().get(&store_id).cloned();
    if let Some(store) = store {
      store.on_write_completion(lsn, Ok(key));
      store.on_batch_completion(key);
    }
  }

  /// Fires the completion for one queued write (manual mode).
  pub fn complete_lsn(&self, store_id: StoreId, lsn: Lsn) {
    let write = {
      let mut inner = self.inner.lock();
      let pos = inner
        .pending
        .iter()
        .position(|w| w.store_id == store_id && w.lsn == lsn)
        .expect("no pending write at that lsn");
      inner.pending.remove(pos)
    };
    let key = self.commit(&write);
    self.dispatch_completion(store_id, lsn, key);
  }

  /// Fires every queued completion for a store in submission order.
  pub fn complete_all(&self, store_id: StoreId) {
    loop {
      let write = {
        let mut inner = self.inner.lock();
        match inner.pending.iter().position(|w| w.store_id == store_id) {
          Some(pos) => inner.pending.remove(pos),
          None => break,
        }
      };
      let key = self.commit(&write);
      self.dispatch_completion(write.store_id, write.lsn, key);
    }
  }

  pub fn pending_count(&self) -> usize {
    self.inner.lock().pending.len()
  }

  pub fn durable_count(&self) -> usize {
    self.inner.lock().durable.len()
  }
}

impl LogDevice for SimDevice {
  fn register_store(&self, store: Arc<LogStore>) -> Result<()> {
    let mut stores = self.stores.write();
    if stores.contains_key(&store.store_id()) {
      return Err(Error::DuplicateStore(store.store_id()));
    }
    stores.insert(store.store_id(), store);
    Ok(())
  }

  fn unregister_store(&self, store_id: StoreId) {
    self.stores.write().remove(&store_id);
    let mut inner = self.inner.lock();
    inner.pending.retain(|w| w.store_id != store_id);
  }

  fn submit_write(&self, store_id: StoreId, lsn: Lsn, kind: RecordKind, buf: LogBuffer) -> Result<()> {
    let write = PendingWrite {
      store_id,
      lsn,
      kind,
      payload: buf.as_slice().to_vec(),
    };
    if self.auto_complete.load(Ordering::Acquire) {
      let key = self.commit(&write);
      self.dispatch_completion(store_id, lsn, key);
    } else {
      self.inner.lock().pending.push(write);
    }
    Ok(())
  }

  fn submit_read(&self, key: DeviceKey, cb: ReadCompCb) {
    let bytes = self.inner.lock().durable.get(&key).cloned();
    match bytes {
      Some(bytes) => match decode_record(&mut bytes.as_slice()) {
        Ok((_, payload)) => cb(Ok(LogBuffer::from_slice(&payload))),
        Err(e) => cb(Err(e)),
      },
      None => cb(Err(Error::Device(format!("no record at {}", key)))),
    }
  }

  fn request_flush(&self, _store_id: StoreId, _upto_lsn: Lsn) -> Result<()> {
    // Completions already announce batches one record at a time; a flush
    // request has nothing extra to schedule here.
    Ok(())
  }

  fn truncate(&self, upto_key: DeviceKey) -> Result<()> {
    self.inner.lock().durable.retain(|key, _| *key > upto_key);
    Ok(())
  }

  fn record_rollback(&self, store_id: StoreId, to_lsn: Lsn) -> Result<()> {
    {
      let mut inner = self.inner.lock();
      inner.durable.retain(|_, bytes| {
        let (header, _) = decode_record(&mut bytes.as_slice()).unwrap();
        header.store_id != store_id || header.lsn <= to_lsn
      });
      let key = self.alloc_key();
      let marker = encode_record(store_id, to_lsn, RecordKind::Rollback, &[]).unwrap();
      inner.durable.insert(key, marker);
    }

    let store = self.stores.read().get(&store_id).cloned();
    if let Some(store) = store {
      store.on_rollback_completion(to_lsn);
    }
    Ok(())
  }

  fn replay(&self) -> Result<()> {
    let records: Vec<(DeviceKey, Vec<u8>)> = self
      .inner
      .lock()
      .durable
      .iter()
      .map(|(k, v)| (*k, v.clone()))
      .collect();
    let stores: Vec<Arc<LogStore>> = self.stores.read().values().cloned().collect();

    for (key, bytes) in records {
      let (header, payload) = decode_record(&mut bytes.as_slice())?;
      let Some(store) = stores.iter().find(|s| s.store_id() == header.store_id) else {
        continue;
      };
      match header.kind {
        RecordKind::Data => {
          store.on_log_found(header.lsn, key, key, Some(LogBuffer::from_slice(&payload)));
        }
        RecordKind::Gap => store.on_log_found(header.lsn, key, key, None),
        RecordKind::Rollback => {}
      }
    }

    for store in stores {
      store.on_replay_done();
    }
    Ok(())
  }
}

pub struct TestEnv {
  pub device: Arc<SimDevice>,
  pub service: LogStoreService,
}

impl TestEnv {
  /// Environment where every write completes inline.
  pub fn auto() -> Self {
    let device = SimDevice::new(true);
    let service = LogStoreService::new(device.clone());
    Self { device, service }
  }

  /// Environment where the test drives completions by hand.
  pub fn manual() -> Self {
    let device = SimDevice::new(false);
    let service = LogStoreService::new(device.clone());
    Self { device, service }
  }

  pub fn store(&self, store_id: StoreId) -> Arc<LogStore> {
    self
      .service
      .create_store(store_id, LogStoreOptions::new(1))
      .unwrap()
  }

  pub fn store_with(&self, store_id: StoreId, options: LogStoreOptions) -> Arc<LogStore> {
    self.service.create_store(store_id, options).unwrap()
  }
}

pub fn buf(data: &[u8]) -> LogBuffer {
  LogBuffer::from_slice(data)
}
