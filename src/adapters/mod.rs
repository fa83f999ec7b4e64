// Adapters layer: concrete implementations for external systems (http, storage, parquet).

pub mod aemet;
pub mod http;
pub mod parquet_sink;
pub mod storage;

pub use storage::LocalStorage;
