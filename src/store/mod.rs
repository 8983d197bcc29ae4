//! Persistence collaborator consulted by the dispatch core.
//!
//! Calls are synchronous and each one is assumed to be atomic and strongly
//! consistent on its own. Nothing here spans several calls; callers order
//! their writes so that a crash leaves durable state behind before any
//! side effect fires.

pub mod memory;

use std::sync::Arc;

use thiserror::Error;

use crate::models::booking::{Booking, BookingStatusRecord};
use crate::models::driver::Driver;
use crate::models::message::ChatMessage;

pub use memory::MemoryRepository;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A persisted entity addressed by an integer id assigned on creation.
pub trait Record: Clone + Send + Sync + 'static {
    const ENTITY: &'static str;

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

pub trait Repository<T: Record>: Send + Sync {
    fn get(&self, id: u64) -> Result<T, StoreError>;

    /// Records matching `filter`, in ascending id order.
    fn list(&self, filter: &dyn Fn(&T) -> bool) -> Result<Vec<T>, StoreError>;

    /// Persists `record` under a fresh id and returns the stored copy.
    fn create(&self, record: T) -> Result<T, StoreError>;

    fn update(&self, record: T) -> Result<(), StoreError>;

    fn delete(&self, id: u64) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct Store {
    pub bookings: Arc<dyn Repository<Booking>>,
    pub statuses: Arc<dyn Repository<BookingStatusRecord>>,
    pub drivers: Arc<dyn Repository<Driver>>,
    pub messages: Arc<dyn Repository<ChatMessage>>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self {
            bookings: Arc::new(MemoryRepository::new()),
            statuses: Arc::new(MemoryRepository::new()),
            drivers: Arc::new(MemoryRepository::new()),
            messages: Arc::new(MemoryRepository::new()),
        }
    }
}

impl Record for Booking {
    const ENTITY: &'static str = "booking";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Record for BookingStatusRecord {
    const ENTITY: &'static str = "booking status";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Record for Driver {
    const ENTITY: &'static str = "driver";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Record for ChatMessage {
    const ENTITY: &'static str = "message";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}
