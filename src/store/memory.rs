use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{Record, Repository, StoreError};

/// `DashMap`-backed repository. Ids start at 1 and are never reused.
pub struct MemoryRepository<T> {
    records: DashMap<u64, T>,
    next_id: AtomicU64,
}

impl<T: Record> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: Record> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Repository<T> for MemoryRepository<T> {
    fn get(&self, id: u64) -> Result<T, StoreError> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound {
                entity: T::ENTITY,
                id,
            })
    }

    fn list(&self, filter: &dyn Fn(&T) -> bool) -> Result<Vec<T>, StoreError> {
        let mut records: Vec<T> = self
            .records
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| record.id());
        Ok(records)
    }

    fn create(&self, mut record: T) -> Result<T, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        record.set_id(id);
        self.records.insert(id, record.clone());
        Ok(record)
    }

    fn update(&self, record: T) -> Result<(), StoreError> {
        let id = record.id();
        let mut stored = self.records.get_mut(&id).ok_or(StoreError::NotFound {
            entity: T::ENTITY,
            id,
        })?;
        *stored = record;
        Ok(())
    }

    fn delete(&self, id: u64) -> Result<(), StoreError> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: T::ENTITY,
                id,
            })
    }
}
