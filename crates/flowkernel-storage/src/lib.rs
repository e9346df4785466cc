//! sled-backed persistence shared by every stateful component. One named
//! tree per entity kind, bincode in and out, keyed by the 32-byte ids every
//! component already uses — the same shape as `chronx-state`'s `StateDb`,
//! generalized once instead of repeated per entity kind.

use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use flowkernel_core::{AuthHash, Id, IntentHash, KernelError, KernelResult};

/// A key type that can be used directly as a sled key: its canonical
/// 32-byte encoding.
pub trait AsBytes32 {
    fn as_bytes32(&self) -> [u8; 32];
}

impl AsBytes32 for Id {
    fn as_bytes32(&self) -> [u8; 32] {
        *self.as_bytes()
    }
}

impl AsBytes32 for AuthHash {
    fn as_bytes32(&self) -> [u8; 32] {
        *self.as_bytes()
    }
}

impl AsBytes32 for IntentHash {
    fn as_bytes32(&self) -> [u8; 32] {
        *self.as_bytes()
    }
}

/// Top-level handle on the embedded database. Each component opens the
/// named trees it needs from here at startup.
pub struct Database {
    db: sled::Db,
    meta: sled::Tree,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> KernelResult<Self> {
        let db = sled::open(path).map_err(|e| KernelError::Storage(e.to_string()))?;
        let meta = db
            .open_tree("meta")
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok(Self { db, meta })
    }

    /// An ephemeral, disk-free database for tests and fixtures.
    pub fn in_memory() -> KernelResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        let meta = db
            .open_tree("meta")
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok(Self { db, meta })
    }

    pub fn open_tree<K, V>(&self, name: &str) -> KernelResult<Store<K, V>>
    where
        K: AsBytes32,
        V: Serialize + DeserializeOwned,
    {
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok(Store {
            tree,
            _k: PhantomData,
            _v: PhantomData,
        })
    }

    pub fn put_meta(&self, key: &str, value: &[u8]) -> KernelResult<()> {
        self.meta
            .insert(key.as_bytes(), value)
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> KernelResult<Option<Vec<u8>>> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(|e| KernelError::Storage(e.to_string()))
    }

    pub fn flush(&self) -> KernelResult<()> {
        self.db.flush().map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// A single named tree, typed to the key/value pair it stores.
pub struct Store<K, V> {
    tree: sled::Tree,
    _k: PhantomData<K>,
    _v: PhantomData<V>,
}

impl<K, V> Store<K, V>
where
    K: AsBytes32,
    V: Serialize + DeserializeOwned,
{
    pub fn get(&self, key: &K) -> KernelResult<Option<V>> {
        match self
            .tree
            .get(key.as_bytes32())
            .map_err(|e| KernelError::Storage(e.to_string()))?
        {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| KernelError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &K, value: &V) -> KernelResult<()> {
        let bytes =
            bincode::serialize(value).map_err(|e| KernelError::Serialization(e.to_string()))?;
        self.tree
            .insert(key.as_bytes32(), bytes)
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, key: &K) -> KernelResult<()> {
        self.tree
            .remove(key.as_bytes32())
            .map_err(|e| KernelError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tree.contains_key(key.as_bytes32()).unwrap_or(false)
    }

    pub fn iter_values(&self) -> KernelResult<Vec<V>> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(|e| KernelError::Storage(e.to_string()))?;
            out.push(
                bincode::deserialize(&bytes).map_err(|e| KernelError::Serialization(e.to_string()))?,
            );
        }
        Ok(out)
    }

    pub fn len(&self) -> u64 {
        self.tree.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Widget {
        count: u32,
    }

    #[test]
    fn put_then_get_round_trips() {
        let db = Database::in_memory().unwrap();
        let store: Store<Id, Widget> = db.open_tree("widgets").unwrap();
        let id = Id::from_bytes([7; 32]);
        store.put(&id, &Widget { count: 3 }).unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(Widget { count: 3 }));
    }

    #[test]
    fn missing_key_returns_none() {
        let db = Database::in_memory().unwrap();
        let store: Store<Id, Widget> = db.open_tree("widgets").unwrap();
        assert_eq!(store.get(&Id::from_bytes([9; 32])).unwrap(), None);
    }

    #[test]
    fn remove_clears_entry() {
        let db = Database::in_memory().unwrap();
        let store: Store<Id, Widget> = db.open_tree("widgets").unwrap();
        let id = Id::from_bytes([1; 32]);
        store.put(&id, &Widget { count: 1 }).unwrap();
        store.remove(&id).unwrap();
        assert!(!store.contains(&id));
    }

    #[test]
    fn meta_tree_stores_raw_bytes() {
        let db = Database::in_memory().unwrap();
        db.put_meta("epoch", &42u64.to_be_bytes()).unwrap();
        assert_eq!(db.get_meta("epoch").unwrap(), Some(42u64.to_be_bytes().to_vec()));
    }
}
