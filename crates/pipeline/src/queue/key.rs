//! Queue key minting and reclamation.

use std::collections::HashMap;
use std::sync::Mutex;

use super::QueueKey;

struct KeyEntry {
    name: String,
    refs: u32,
}

#[derive(Default)]
struct KeyTable {
    next: u64,
    by_name: HashMap<String, QueueKey>,
    by_key: HashMap<QueueKey, KeyEntry>,
}

/// Vends stable keys for queue names.
///
/// `get_key` is idempotent per name. Each queue manager retains the key when
/// it creates a queue and releases it on deletion; the name/key mapping is
/// reclaimed once the reference count drops to zero.
#[derive(Default)]
pub struct QueueKeyManager {
    inner: Mutex<KeyTable>,
}

impl QueueKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key for `name`, minting one on first use.
    pub fn get_key(&self, name: &str) -> QueueKey {
        let mut table = self.inner.lock().unwrap();
        if let Some(key) = table.by_name.get(name) {
            return *key;
        }
        let key = QueueKey(table.next);
        table.next += 1;
        table.by_name.insert(name.to_string(), key);
        table.by_key.insert(
            key,
            KeyEntry {
                name: name.to_string(),
                refs: 0,
            },
        );
        key
    }

    /// The name a key was minted for, if the key is still live.
    pub fn name(&self, key: QueueKey) -> Option<String> {
        let table = self.inner.lock().unwrap();
        table.by_key.get(&key).map(|e| e.name.clone())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.inner.lock().unwrap().by_name.contains_key(name)
    }

    pub(crate) fn retain(&self, key: QueueKey) {
        let mut table = self.inner.lock().unwrap();
        if let Some(entry) = table.by_key.get_mut(&key) {
            entry.refs += 1;
        }
    }

    pub(crate) fn release(&self, key: QueueKey) {
        let mut table = self.inner.lock().unwrap();
        let freed = match table.by_key.get_mut(&key) {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            None => false,
        };
        if freed {
            if let Some(entry) = table.by_key.remove(&key) {
                table.by_name.remove(&entry.name);
            }
        }
    }
}
