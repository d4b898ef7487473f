pub mod connection;
pub mod handler_store;

pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use handler_store::SqliteHandlerStore;
