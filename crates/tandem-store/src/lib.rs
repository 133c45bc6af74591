pub mod memory;
pub mod registry;
pub mod sqlite;

use std::sync::Arc;

use tandem_core::config::{StoreBackend, StoreConfig};
use tandem_core::error::Result;
use tandem_core::traits::OrderStore;

pub use memory::MemoryOrderStore;
pub use registry::OrderRegistry;
pub use sqlite::SqliteOrderStore;

/// Build the order store selected by config.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn OrderStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryOrderStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteOrderStore::open(&config.resolved_path())?)),
    }
}
