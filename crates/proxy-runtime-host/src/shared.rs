//! Process-wide shared state: the CAS key/value store and the shared-queue
//! registry.
//!
//! Both are carried as explicit state (so tests can substitute fresh
//! instances) with lazily-created process-wide singletons behind
//! [`global_shared_data`] / [`global_shared_queues`], which the default
//! handler uses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use proxy_runtime_common::{sync, HostResult, WasmResult};

/// Key/value store with compare-and-swap versioning. The CAS generation is
/// a single counter across all keys; every successful write bumps it.
#[derive(Debug, Default)]
pub struct SharedDataStore {
    items: Mutex<HashMap<String, SharedDataItem>>,
    generation: AtomicU32,
}

#[derive(Debug)]
struct SharedDataItem {
    value: Vec<u8>,
    cas: u32,
}

impl SharedDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key, returning its value and current CAS.
    pub fn get(&self, key: &str) -> HostResult<(Vec<u8>, u32)> {
        let items = sync::lock(&self.items);
        match items.get(key) {
            Some(item) => Ok((item.value.clone(), item.cas)),
            None => Err(WasmResult::NotFound),
        }
    }

    /// Write a key. `cas == 0` writes unconditionally; otherwise the write
    /// succeeds only if `cas` matches the stored generation.
    pub fn set(&self, key: &str, value: &[u8], cas: u32) -> WasmResult {
        if key.is_empty() {
            return WasmResult::BadArgument;
        }

        let mut items = sync::lock(&self.items);
        if let Some(item) = items.get_mut(key) {
            if cas != 0 && cas != item.cas {
                return WasmResult::CasMismatch;
            }
            item.value = value.to_vec();
            item.cas = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            return WasmResult::Ok;
        }

        items.insert(
            key.to_string(),
            SharedDataItem {
                value: value.to_vec(),
                cas: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            },
        );
        WasmResult::Ok
    }
}

/// A single named FIFO of byte strings.
#[derive(Debug)]
pub struct SharedQueue {
    id: u32,
    name: String,
    items: Mutex<VecDeque<Vec<u8>>>,
}

impl SharedQueue {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(&self, data: &[u8]) -> WasmResult {
        sync::lock(&self.items).push_back(data.to_vec());
        WasmResult::Ok
    }

    fn dequeue(&self) -> HostResult<Vec<u8>> {
        sync::lock(&self.items).pop_front().ok_or(WasmResult::Empty)
    }
}

/// Registry of shared queues: name to id, id to queue. Queue ids are stable
/// for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct SharedQueueRegistry {
    inner: Mutex<QueueMaps>,
    id_generator: AtomicU32,
}

#[derive(Debug, Default)]
struct QueueMaps {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, Arc<SharedQueue>>,
}

impl SharedQueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue id for `name`, creating the queue on first
    /// registration. Idempotent by name.
    pub fn register(&self, name: &str) -> HostResult<u32> {
        let mut inner = sync::lock(&self.inner);
        if let Some(id) = inner.by_name.get(name) {
            return Ok(*id);
        }

        let id = self.id_generator.fetch_add(1, Ordering::SeqCst) + 1;
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(
            id,
            Arc::new(SharedQueue {
                id,
                name: name.to_string(),
                items: Mutex::new(VecDeque::new()),
            }),
        );
        Ok(id)
    }

    /// Look up an existing queue id by name.
    pub fn resolve(&self, name: &str) -> HostResult<u32> {
        sync::lock(&self.inner)
            .by_name
            .get(name)
            .copied()
            .ok_or(WasmResult::NotFound)
    }

    pub fn enqueue(&self, queue_id: u32, data: &[u8]) -> WasmResult {
        match self.queue(queue_id) {
            Some(queue) => queue.enqueue(data),
            None => WasmResult::NotFound,
        }
    }

    pub fn dequeue(&self, queue_id: u32) -> HostResult<Vec<u8>> {
        self.queue(queue_id)
            .ok_or(WasmResult::NotFound)?
            .dequeue()
    }

    fn queue(&self, queue_id: u32) -> Option<Arc<SharedQueue>> {
        sync::lock(&self.inner).by_id.get(&queue_id).cloned()
    }
}

/// Process-wide shared-data singleton.
pub fn global_shared_data() -> Arc<SharedDataStore> {
    static STORE: OnceLock<Arc<SharedDataStore>> = OnceLock::new();
    Arc::clone(STORE.get_or_init(|| Arc::new(SharedDataStore::new())))
}

/// Process-wide queue-registry singleton.
pub fn global_shared_queues() -> Arc<SharedQueueRegistry> {
    static REGISTRY: OnceLock<Arc<SharedQueueRegistry>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| Arc::new(SharedQueueRegistry::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_law() {
        let store = SharedDataStore::new();

        assert_eq!(store.set("k", b"v1", 0), WasmResult::Ok);
        let (value, cas1) = store.get("k").unwrap();
        assert_eq!(value, b"v1");
        assert_eq!(cas1, 1);

        assert_eq!(store.set("k", b"v2", 1), WasmResult::Ok);
        let (value, cas2) = store.get("k").unwrap();
        assert_eq!(value, b"v2");
        assert_eq!(cas2, 2);

        // Stale CAS fails and leaves the value untouched.
        assert_eq!(store.set("k", b"v3", 1), WasmResult::CasMismatch);
        let (value, _) = store.get("k").unwrap();
        assert_eq!(value, b"v2");
    }

    #[test]
    fn test_cas_zero_is_unconditional() {
        let store = SharedDataStore::new();
        assert_eq!(store.set("k", b"v1", 0), WasmResult::Ok);
        assert_eq!(store.set("k", b"v2", 0), WasmResult::Ok);
        let (value, cas) = store.get("k").unwrap();
        assert_eq!(value, b"v2");
        assert_eq!(cas, 2);
    }

    #[test]
    fn test_cas_is_monotonic_across_keys() {
        let store = SharedDataStore::new();
        store.set("a", b"1", 0);
        store.set("b", b"2", 0);

        let (_, cas_a) = store.get("a").unwrap();
        let (_, cas_b) = store.get("b").unwrap();
        assert!(cas_b > cas_a);
    }

    #[test]
    fn test_missing_key_and_empty_key() {
        let store = SharedDataStore::new();
        assert_eq!(store.get("missing").unwrap_err(), WasmResult::NotFound);
        assert_eq!(store.set("", b"v", 0), WasmResult::BadArgument);
    }

    #[test]
    fn test_queue_lifecycle() {
        let registry = SharedQueueRegistry::new();

        let id = registry.register("q").unwrap();
        assert_eq!(id, 1);
        // Registration is idempotent by name.
        assert_eq!(registry.register("q").unwrap(), 1);
        assert_eq!(registry.resolve("q").unwrap(), 1);

        registry.enqueue(1, b"a");
        registry.enqueue(1, b"b");
        assert_eq!(registry.dequeue(1).unwrap(), b"a");
        assert_eq!(registry.dequeue(1).unwrap(), b"b");
        assert_eq!(registry.dequeue(1).unwrap_err(), WasmResult::Empty);

        assert_eq!(registry.dequeue(2).unwrap_err(), WasmResult::NotFound);
        assert_eq!(registry.enqueue(2, b"x"), WasmResult::NotFound);
        assert_eq!(registry.resolve("other").unwrap_err(), WasmResult::NotFound);
    }

    #[test]
    fn test_queue_ids_are_stable() {
        let registry = SharedQueueRegistry::new();
        let first = registry.register("one").unwrap();
        let second = registry.register("two").unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.resolve("one").unwrap(), first);
    }
}
