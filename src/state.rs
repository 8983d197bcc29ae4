use std::sync::Arc;

use crate::config::ConnectionSettings;
use crate::engine::dispatch::Dispatcher;
use crate::engine::locator::{DriverLocator, LinearScanLocator};
use crate::observability::metrics::Metrics;
use crate::realtime::chat::ChatRelay;
use crate::realtime::registry::ConnectionRegistry;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Dispatcher,
    pub chat: ChatRelay,
    pub metrics: Metrics,
    pub connections: ConnectionSettings,
}

impl AppState {
    pub fn new(connections: ConnectionSettings) -> Self {
        Self::with_parts(Store::in_memory(), Arc::new(LinearScanLocator), connections)
    }

    pub fn with_parts(
        store: Store,
        locator: Arc<dyn DriverLocator>,
        connections: ConnectionSettings,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Metrics::new();

        Self {
            dispatcher: Dispatcher::new(
                store.clone(),
                registry.clone(),
                locator,
                metrics.clone(),
            ),
            chat: ChatRelay::new(store.clone(), registry.clone(), metrics.clone()),
            store,
            registry,
            metrics,
            connections,
        }
    }
}
