//! Directory service clients.

pub mod memory;
pub mod redis;
pub mod traits;

pub use self::{
    memory::InMemoryDirectory,
    redis::RedisError,
    traits::{DirectoryService, StorageError, StorageResult},
};
