//! Buffer pool: frames, replacement policy, RAII page guards (spec.md §4.2–4.4).

pub mod frame;
pub mod guard;
pub mod pool;
pub mod replacer;

pub use frame::FrameId;
pub use guard::{ReadPageGuard, WritePageGuard};
pub use pool::BufferPoolManager;
pub use replacer::{Lru, LruK, Replacer};
