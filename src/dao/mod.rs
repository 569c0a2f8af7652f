/// Room state storage and transcript operations.
pub mod room_store;
/// Persistence model definitions.
pub mod models;
/// Storage abstraction layer for backend failures.
pub mod storage;
