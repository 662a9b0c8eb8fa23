pub mod key;
pub mod store;

pub use key::{generate_key, CacheKey};
pub use store::ResponseCache;
