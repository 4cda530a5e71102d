//! Response caching for the backend proxy

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, ProxyCaches, ResponseCache};
