use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::StoreError;
use crate::genomics::Locus;

/// Key-value store that checkpoints are written to.
///
/// Keys are 0-based reference positions (`Locus::position - 1`); values are
/// loci serialized with [`encode_locus`].
pub trait DurableStore {
    /// Serialized locus stored under `key`, if any.
    fn get(&self, key: u64) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: u64, value: &[u8]) -> Result<(), StoreError>;

    /// Store many entries. Backends may apply them atomically.
    fn set_many(&mut self, entries: &[(u64, Vec<u8>)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(*key, value)?;
        }
        Ok(())
    }
}

/// Serialize a locus. Likelihoods round-trip bit-exactly.
pub fn encode_locus(locus: &Locus) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(locus)?)
}

/// Deserialize a locus written by [`encode_locus`].
pub fn decode_locus(bytes: &[u8]) -> Result<Locus, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Fetch and decode the locus stored under `key`.
pub fn load_locus<S: DurableStore + ?Sized>(store: &S, key: u64) -> Result<Option<Locus>, StoreError> {
    store.get(key)?.map(|bytes| decode_locus(&bytes)).transpose()
}

/// Encode and store a locus under its key.
pub fn store_locus<S: DurableStore + ?Sized>(store: &mut S, locus: &Locus) -> Result<(), StoreError> {
    let bytes = encode_locus(locus)?;
    store.set(locus.key(), &bytes)
}

/// In-process durable store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<FxHashMap<u64, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Stored keys in ascending order.
    pub fn keys(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.entries.lock().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Decode every stored locus, ordered by position.
    pub fn loci(&self) -> Result<Vec<Locus>, StoreError> {
        let entries = self.entries.lock();
        let mut loci = entries
            .values()
            .map(|bytes| decode_locus(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        loci.sort_by_key(|locus| locus.position);
        Ok(loci)
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: u64) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(&key).cloned())
    }

    fn set(&mut self, key: u64, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key, value.to_vec());
        Ok(())
    }

    fn set_many(&mut self, entries: &[(u64, Vec<u8>)]) -> Result<(), StoreError> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert(*key, value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{Evidence, GenotypePriors};

    #[test]
    fn memory_store_round_trips_loci() {
        let mut store = MemoryStore::new();
        let mut locus = Locus::new(12, b'A', &GenotypePriors::default());
        locus.observe(&Evidence {
            position: 12,
            reference_base: b'A',
            observed_base: b'C',
            error_probability: 0.02,
        });

        store_locus(&mut store, &locus).unwrap();
        assert_eq!(store.keys(), vec![12]);
        assert_eq!(load_locus(&store, 12).unwrap(), Some(locus.clone()));
        assert_eq!(load_locus(&store, 13).unwrap(), None);

        let shared = store.clone();
        assert_eq!(shared.loci().unwrap(), vec![locus]);
    }

    #[test]
    fn corrupt_values_surface_codec_errors() {
        let mut store = MemoryStore::new();
        store.set(1, b"{not json").unwrap();
        assert!(matches!(load_locus(&store, 1), Err(StoreError::Codec(_))));
    }
}
