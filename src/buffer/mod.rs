pub mod buffer_pool_manager;
pub mod lru_replacer;

pub use buffer_pool_manager::BufferPoolManager;
pub use lru_replacer::LruReplacer;
