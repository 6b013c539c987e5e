//! Storage management core: Disk Manager, LRU Replacer, and Buffer Pool
//! Manager. Mediates all access between durable on-disk page storage and
//! in-memory working copies, presenting higher layers (record managers,
//! index managers, query execution) with a page abstraction: a fixed-size
//! mutable buffer identified by `(file_id, page_no)` that is guaranteed
//! resident and stable while pinned.
//!
//! Recovery (WAL replay, checkpointing), the query engine, and configuration
//! parsing are out of scope; this crate exposes the hooks (`flush_page`,
//! `flush_all_pages`) a recovery subsystem would be built on top of.

pub mod buffer;
pub mod common;
pub mod error;
pub mod storage;

pub use buffer::{BufferPoolManager, LruReplacer};
pub use common::config::{FileId, FrameId, PageId, PageNo, INVALID_PAGE_NO, PAGE_SIZE};
pub use error::{BufferPoolError, Result};
pub use storage::{DiskManager, Page, PageGuard, ReadPageGuard, WritePageGuard};
