//! SQLite-backed collaborators for the wave-core session runner: candle and
//! signal stores, the parameter-history source, and an idempotent result sink.

pub mod sqlite_store;

pub use sqlite_store::{
    init_schema, load_candles, SqliteResultSink, SqliteStore, StoreError,
};
